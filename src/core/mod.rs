pub mod lifecycle;
pub mod mount;
pub mod resolver;
pub mod retry;
pub mod server;

pub use lifecycle::{LifecycleBus, LifecycleEvent, LifecycleMessage};
pub use mount::MountPoint;
pub use resolver::{RemoteSchemaResolver, RemoteSchemaStatus, ResolverConfig, ResolverError};
pub use retry::{RetryOperation, RetryOutcome, RetryPolicy};
pub use server::Server;
