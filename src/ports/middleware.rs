use async_trait::async_trait;
use eyre::Result;

use crate::core::MountPoint;

/// Middleware defines the port for components that mount routes on the
/// server. Middleware initializes strictly in declared order.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Mount routes and perform any setup that needs the mount point
    async fn initialize(&self, mount: &MountPoint) -> Result<()>;
}
