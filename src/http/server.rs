//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: job websocket route and proxied services
//! - Wire up middleware (tracing, timeout, request ID, CORS)
//! - Start the notification listener and the admin API next to the server
//! - Bind server to listener, plain or TLS
//! - Drain everything on shutdown

use axum::{
    routing::{any, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::{GatewayConfig, TlsConfig};
use crate::correlation::CorrelationStore;
use crate::dispatch::{CloudTasksQueue, JobDispatcher, TaskQueue};
use crate::http::websocket::{job_ws_handler, JobRoute};
use crate::lifecycle::Shutdown;
use crate::notify::{ListenerExit, NotificationListener, PullSubscription, Subscription};
use crate::proxy::{proxy_handler, Proxy, ServiceTable};
use crate::session::OriginPolicy;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: CorrelationStore,
    /// Present when the job route is enabled.
    pub jobs: Option<Arc<JobRoute>>,
    pub proxy: Arc<Proxy>,
    pub shutdown: Shutdown,
    pub started_at: Instant,
}

/// External collaborators of the job flow.
#[derive(Default)]
pub struct Backends {
    /// Where jobs are dispatched. Required when the job route is enabled.
    pub queue: Option<Arc<dyn TaskQueue>>,
    /// Where notifications come from. No listener runs without one.
    pub subscription: Option<Box<dyn Subscription>>,
    /// Bearer token for proxied services.
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid target for service '{name}': {source}")]
    InvalidService {
        name: String,
        #[source]
        source: url::ParseError,
    },

    #[error("the job route is enabled but no task queue was provided")]
    MissingQueue,

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    admin: Option<Router>,
    state: AppState,
    subscription: Option<Box<dyn Subscription>>,
}

impl HttpServer {
    /// Create a server around the given backends.
    pub fn new(config: GatewayConfig, backends: Backends) -> Result<Self, ServerError> {
        let config = Arc::new(config);
        let shutdown = Shutdown::new();
        let store = CorrelationStore::new();

        let services = ServiceTable::from_config(
            &config.services,
            Duration::from_secs(config.timeouts.upstream_secs),
        )
        .map_err(|(name, source)| ServerError::InvalidService { name, source })?;
        let proxy = Arc::new(Proxy::new(services, backends.token));

        let jobs = if config.jobs.enabled {
            let queue = backends.queue.ok_or(ServerError::MissingQueue)?;
            let dispatcher = JobDispatcher::new(
                queue,
                config.jobs.target.clone(),
                Duration::from_secs(config.timeouts.dispatch_secs),
            );
            Some(Arc::new(JobRoute {
                store: store.clone(),
                dispatcher: Arc::new(dispatcher),
                origins: OriginPolicy::new(config.jobs.allowed_origins.iter().cloned()),
                outbound_buffer: config.jobs.outbound_buffer,
                shutdown: shutdown.clone(),
            }))
        } else {
            None
        };

        let state = AppState {
            config: config.clone(),
            store,
            jobs,
            proxy,
            shutdown,
            started_at: Instant::now(),
        };

        let router = Self::build_router(&config, state.clone());
        let admin = config
            .admin
            .enabled
            .then(|| setup_admin_router(state.clone()));

        Ok(Self {
            router,
            admin,
            state,
            subscription: backends.subscription,
        })
    }

    /// Create a server talking to Cloud Tasks and Pub/Sub as configured.
    ///
    /// `insecure` drops the outbound bearer token.
    pub fn from_config(config: GatewayConfig, insecure: bool) -> Result<Self, ServerError> {
        let token = config.outbound_token(insecure);

        let queue = config.jobs.enabled.then(|| {
            Arc::new(CloudTasksQueue::new(&config.jobs.queue, token.clone())) as Arc<dyn TaskQueue>
        });
        let subscription = config.broker.enabled.then(|| {
            Box::new(PullSubscription::new(&config.broker, token.clone())) as Box<dyn Subscription>
        });

        Self::new(
            config,
            Backends {
                queue,
                subscription,
                token,
            },
        )
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        // Websocket sessions outlive any request timeout, so it only wraps
        // the proxied routes.
        let proxied = Router::new()
            .route("/{service}/{*path}", any(proxy_handler))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));

        let mut router = Router::new();
        if state.jobs.is_some() {
            router = router.route(&config.jobs.route, get(job_ws_handler));
        }

        let router = router
            .merge(proxied)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        if config.http.cors_allow_all {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// The correlation store shared by sessions and the listener.
    pub fn store(&self) -> CorrelationStore {
        self.state.store.clone()
    }

    /// Handle for triggering a graceful shutdown.
    pub fn shutdown(&self) -> Shutdown {
        self.state.shutdown.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }

    /// State shared by the handlers of both routers.
    pub fn app_state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(mut self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = self.state.shutdown.subscribe();
        let background = self.start_background().await?;

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        background.join().await;
        Ok(())
    }

    /// Run the server over TLS on the configured bind address.
    pub async fn run_tls(mut self, tls: &TlsConfig) -> Result<(), ServerError> {
        let address = self.state.config.listener.bind_address.clone();
        let addr: SocketAddr = address.parse().map_err(|e| ServerError::Bind {
            address: address.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;
        let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
        tracing::info!(address = %addr, "HTTPS server starting");

        let mut stop = self.state.shutdown.subscribe();
        let background = self.start_background().await?;

        let handle = axum_server::Handle::new();
        let on_stop = handle.clone();
        tokio::spawn(async move {
            let _ = stop.recv().await;
            on_stop.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        background.join().await;
        Ok(())
    }

    async fn start_background(&mut self) -> Result<Background, ServerError> {
        let listener = self.subscription.take().map(|subscription| {
            let broker = &self.state.config.broker;
            let listener = NotificationListener::new(subscription, self.state.store.clone())
                .with_backoff(broker.backoff_base_ms, broker.backoff_max_ms);
            tokio::spawn(listener.run(self.state.shutdown.subscribe()))
        });
        if listener.is_none() {
            tracing::warn!("No broker subscription, job notifications will not be delivered");
        }

        let admin = match self.admin.take() {
            Some(router) => {
                let address = self.state.config.admin.bind_address.clone();
                let socket = TcpListener::bind(&address)
                    .await
                    .map_err(|source| ServerError::Bind { address, source })?;
                tracing::info!(address = %socket.local_addr()?, "Admin API listening");

                let mut stop = self.state.shutdown.subscribe();
                Some(tokio::spawn(async move {
                    let served = axum::serve(socket, router)
                        .with_graceful_shutdown(async move {
                            let _ = stop.recv().await;
                        })
                        .await;
                    if let Err(e) = served {
                        tracing::error!(error = %e, "Admin API failed");
                    }
                }))
            }
            None => None,
        };

        Ok(Background { listener, admin })
    }
}

/// Tasks running next to the main server.
struct Background {
    listener: Option<JoinHandle<ListenerExit>>,
    admin: Option<JoinHandle<()>>,
}

impl Background {
    async fn join(self) {
        if let Some(listener) = self.listener {
            match listener.await {
                Ok(exit) => tracing::info!(exit = ?exit, "Notification listener finished"),
                Err(e) => tracing::error!(error = %e, "Notification listener panicked"),
            }
        }
        if let Some(admin) = self.admin {
            let _ = admin.await;
        }
    }
}
