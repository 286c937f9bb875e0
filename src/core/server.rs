//! The gateway server and its readiness state machine.
//!
//! `start` binds the listener right away and publishes `SERVER_STARTED`; the
//! rest of startup runs in the background: every connector in parallel, then
//! every middleware in declared order. Each milestone is appended to the
//! server's lifecycle history and published on the bus.
//!
//! The application is ready once `MIDDLEWARE_READY` is in the history and no
//! resolver has a remote schema fetch in flight.
use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::serve::ListenerExt;
use eyre::{Result, WrapErr, bail};
use futures_util::future::try_join_all;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::{
    lifecycle::{LifecycleBus, LifecycleEvent, LifecycleMessage},
    mount::MountPoint,
};
use crate::{
    config::ServerConfig,
    ports::{Connector, Middleware},
};

struct Listening {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ServerState {
    history: Vec<LifecycleEvent>,
    /// In-flight phases keyed by the publishing component
    pending: Vec<(LifecycleEvent, String)>,
    listening: Option<Listening>,
    /// Serve task of a stopped listener that may still be draining
    draining: Option<JoinHandle<()>>,
}

struct ServerInner {
    id: String,
    bus: Arc<LifecycleBus>,
    connectors: Vec<Arc<dyn Connector>>,
    middleware: Vec<Arc<dyn Middleware>>,
    mount: MountPoint,
    state: Mutex<ServerState>,
    handlers_registered: AtomicBool,
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(
        bus: Arc<LifecycleBus>,
        connectors: Vec<Arc<dyn Connector>>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        let inner = Arc::new(ServerInner {
            id: format!("server:{}", uuid::Uuid::new_v4()),
            bus,
            connectors,
            middleware,
            mount: MountPoint::new(),
            state: Mutex::new(ServerState::default()),
            handlers_registered: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.mount.set_readiness(move || {
            weak.upgrade()
                .is_some_and(|inner| inner.is_application_ready())
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Route table the middleware mounts onto.
    pub fn mount(&self) -> &MountPoint {
        &self.inner.mount
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .lock_state()
            .listening
            .as_ref()
            .map(|listening| listening.local_addr)
    }

    /// Events published since the last `start`.
    pub fn history(&self) -> Vec<LifecycleEvent> {
        self.inner.lock_state().history.clone()
    }

    pub fn is_application_ready(&self) -> bool {
        self.inner.is_application_ready()
    }

    /// Bind the listener and kick off connector and middleware startup.
    ///
    /// Returns once the socket is listening; startup continues in the
    /// background. A failing connector or middleware halts startup and the
    /// server stays unready.
    pub async fn start(&self, config: &ServerConfig) -> Result<SocketAddr> {
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .wrap_err_with(|| format!("Invalid listen address '{}'", config.listen_addr))?;

        {
            let mut state = self.inner.lock_state();
            if let Some(listening) = &state.listening {
                bail!("Server is already listening on {}", listening.local_addr);
            }
            state.history.clear();
        }
        self.inner.register_handlers();

        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("Failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;
        let tcp_nodelay = config.tcp_nodelay;
        let listener = listener.tap_io(move |tcp| {
            if tcp_nodelay {
                if let Err(e) = tcp.set_nodelay(true) {
                    tracing::trace!("Failed to set TCP_NODELAY on connection: {e}");
                }
            }
        });

        let shutdown = CancellationToken::new();
        let app = self.inner.mount.service().layer(TraceLayer::new_for_http());
        let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
        let task = tokio::spawn(async move {
            if let Err(e) = serve.await {
                tracing::error!("Server error: {e}");
            }
        });

        self.inner.lock_state().listening = Some(Listening {
            local_addr,
            shutdown,
            task,
        });
        tracing::info!(server = %self.inner.id, %local_addr, "Listener bound");
        self.inner.publish(LifecycleEvent::Started);

        tokio::spawn(self.inner.clone().run_startup());
        Ok(local_addr)
    }

    /// Close the listener and reset the history. Startup work and remote
    /// schema retries already in flight keep running.
    pub fn stop(&self) {
        let stopped = {
            let mut state = self.inner.lock_state();
            match state.listening.take() {
                Some(listening) => {
                    listening.shutdown.cancel();
                    state.draining = Some(listening.task);
                    state.history.clear();
                    true
                }
                None => false,
            }
        };

        if stopped {
            tracing::info!(server = %self.inner.id, "Server stopped");
            self.inner.publish(LifecycleEvent::Stopped);
        } else {
            tracing::warn!("No http server to stop");
        }
    }

    /// Wait for a stopped listener to finish serving in-flight requests.
    pub async fn closed(&self) {
        let task = self.inner.lock_state().draining.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Server task failed: {e}");
            }
        }
    }
}

impl ServerInner {
    fn is_application_ready(&self) -> bool {
        let state = self.lock_state();
        state.history.contains(&LifecycleEvent::MiddlewareReady)
            && !state
                .pending
                .iter()
                .any(|(event, _)| *event == LifecycleEvent::RemoteSchemasFetching)
    }

    fn publish(&self, event: LifecycleEvent) {
        let local_addr = {
            let mut state = self.lock_state();
            state.history.push(event);
            state.listening.as_ref().map(|listening| listening.local_addr)
        };
        self.bus
            .publish(LifecycleMessage::new(event, self.id.clone()).with_local_addr(local_addr));
    }

    /// Subscribe the bookkeeping handlers. Runs once per server.
    fn register_handlers(self: &Arc<Self>) {
        if self.handlers_registered.swap(true, Ordering::SeqCst) {
            return;
        }

        let server = Arc::downgrade(self);
        self.bus
            .subscribe(LifecycleEvent::MiddlewareReady, move |message| {
                let Some(server) = server.upgrade() else {
                    return Ok(());
                };
                if message.source == server.id {
                    if let Some(addr) = message.local_addr {
                        tracing::info!("Server listening on http://{addr}");
                    }
                }
                Ok(())
            });

        let server = Arc::downgrade(self);
        self.bus
            .subscribe(LifecycleEvent::RemoteSchemasFetching, move |message| {
                if let Some(server) = server.upgrade() {
                    let mut state = server.lock_state();
                    let key = (LifecycleEvent::RemoteSchemasFetching, message.source.clone());
                    if !state.pending.contains(&key) {
                        state.pending.push(key);
                    }
                }
                Ok(())
            });

        let server = Arc::downgrade(self);
        self.bus
            .subscribe(LifecycleEvent::RemoteSchemasFetched, move |message| {
                if let Some(server) = server.upgrade() {
                    server.lock_state().pending.retain(|(event, source)| {
                        !(*event == LifecycleEvent::RemoteSchemasFetching && *source == message.source)
                    });
                    tracing::info!(source = %message.source, "Remote schemas fetched");
                }
                Ok(())
            });
    }

    async fn run_startup(self: Arc<Self>) {
        let connectors = self.connectors.iter().map(|connector| async move {
            connector
                .initialize()
                .await
                .wrap_err_with(|| format!("Connector '{}' failed to initialize", connector.name()))
        });
        if let Err(e) = try_join_all(connectors).await {
            tracing::error!(server = %self.id, "Startup halted: {e:?}");
            return;
        }
        tracing::info!("Connectors Ready");
        self.publish(LifecycleEvent::ConnectorsReady);

        for middleware in &self.middleware {
            if let Err(e) = middleware.initialize(&self.mount).await {
                tracing::error!(
                    server = %self.id,
                    middleware = middleware.name(),
                    "Startup halted: {e:?}"
                );
                return;
            }
            tracing::debug!(middleware = middleware.name(), "Middleware initialized");
        }
        tracing::info!("Middleware Ready");
        self.publish(LifecycleEvent::MiddlewareReady);
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.inner.id)
            .field("connectors", &self.inner.connectors.len())
            .field("middleware", &self.inner.middleware.len())
            .finish()
    }
}
