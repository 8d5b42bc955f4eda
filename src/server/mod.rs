//! Generic server configuration and run loop
//!
//! This is the interface the bootstrap core consumes: a
//! [`RecommendedConfig`] that option groups apply themselves onto, the
//! `Config -> CompletedConfig -> Server` build steps, and a run loop
//! that serves TLS until its cancellation token fires. Post-start hooks
//! fire once, after the listener reports ready, and their completion is
//! visible through `/readyz`.

pub mod hooks;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::AdmissionChain;
use crate::api::{MultiGroupVersioner, ResourceRegistry};
use crate::client::LoopbackClientConfig;
use crate::error::Error;
use crate::informers::InformerFactory;

pub use hooks::{HookReadiness, HookState, PostStartHookContext, PostStartHooks};

/// How long the listener gets to drain connections on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Install the process-wide rustls crypto provider
///
/// Must run before any TLS config or kube client is built. Safe to call
/// more than once; only the first call installs.
pub fn init_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// TLS serving material and bind address
#[derive(Clone, Debug)]
pub struct ServingInfo {
    /// Address to bind the secure listener to
    pub addr: SocketAddr,
    /// PEM-encoded serving certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

/// Storage backend configuration produced by the etcd option group
#[derive(Clone, Debug, PartialEq)]
pub struct StorageConfig {
    /// etcd endpoint URLs
    pub servers: Vec<String>,
    /// Key prefix all stored objects live under
    pub prefix: String,
    /// Whether list reads use chunked/paginated requests
    pub paging: bool,
    /// Resource encoding policy for objects at rest
    pub encode_versioner: MultiGroupVersioner,
}

/// Authentication settings produced by the auth option group
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthenticationConfig {
    /// Whether unauthenticated requests are admitted as `system:anonymous`
    pub anonymous: bool,
    /// Static bearer token file, if configured
    pub token_file: Option<PathBuf>,
}

/// How requests are authorized
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum AuthorizationMode {
    /// Every authenticated request is allowed
    #[default]
    AlwaysAllow,
    /// Every request is denied; useful for lockdown testing
    AlwaysDeny,
    /// Authorization is delegated to the parent control plane
    Webhook,
}

/// Authorization settings produced by the auth option group
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthorizationConfig {
    /// Active authorization mode
    pub mode: AuthorizationMode,
}

/// How much of each request the audit trail records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum AuditLevel {
    /// Record nothing
    None,
    /// Record request metadata only
    #[default]
    Metadata,
    /// Record metadata and request bodies
    Request,
    /// Record metadata, request and response bodies
    RequestResponse,
}

/// Audit policy produced by the audit option group
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AuditPolicy {
    /// Recording level applied to every request
    pub level: AuditLevel,
    /// Where audit events are written; `-` means stdout
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

/// The generic server configuration option groups apply themselves onto
///
/// Created bare by config assembly (step 4) carrying only the resource
/// registry; each option group fills in its slice during application.
pub struct RecommendedConfig {
    /// The server's type table
    pub registry: ResourceRegistry,
    /// TLS serving material; set by the secure-serving group
    pub serving: Option<ServingInfo>,
    /// Loopback credentials; set by the secure-serving group
    pub loopback: Option<LoopbackClientConfig>,
    /// Storage backend; set by the etcd group
    pub storage: Option<StorageConfig>,
    /// Authentication settings
    pub authentication: AuthenticationConfig,
    /// Authorization settings
    pub authorization: AuthorizationConfig,
    /// Audit policy, if auditing is enabled
    pub audit: Option<AuditPolicy>,
    /// Assembled admission chain; set by the admission group
    pub admission: Option<AdmissionChain>,
    /// The generic framework's own informer factory
    pub generic_informers: Option<InformerFactory>,
    informers: Option<InformerFactory>,
}

impl RecommendedConfig {
    /// Create a bare configuration carrying the server's type table
    pub fn new(registry: ResourceRegistry) -> Self {
        Self {
            registry,
            serving: None,
            loopback: None,
            storage: None,
            authentication: AuthenticationConfig::default(),
            authorization: AuthorizationConfig::default(),
            audit: None,
            admission: None,
            generic_informers: None,
            informers: None,
        }
    }

    /// Install the admission informer factory
    ///
    /// The factory is installed exactly once, by the deferred admission
    /// initializer during option application. A second installation is
    /// a wiring error, never a silent overwrite.
    pub fn set_informers(&mut self, informers: InformerFactory) -> Result<(), Error> {
        if self.informers.is_some() {
            return Err(Error::apply(
                "admission",
                "informer factory is already installed",
            ));
        }
        self.informers = Some(informers);
        Ok(())
    }

    /// The admission informer factory, if one was installed
    pub fn informers(&self) -> Option<&InformerFactory> {
        self.informers.as_ref()
    }
}

impl std::fmt::Debug for RecommendedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendedConfig")
            .field("registry", &self.registry)
            .field("serving", &self.serving.as_ref().map(|s| s.addr))
            .field("storage", &self.storage)
            .field("informers_installed", &self.informers.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration specific to the aggregated server, beyond the generic
/// framework's concerns
///
/// Currently carries nothing; it exists so the `Config` shape matches
/// every other flotilla server and server-specific wiring has a home.
#[derive(Clone, Debug, Default)]
pub struct ExtraConfig {}

/// The assembled, immutable server configuration
#[derive(Debug)]
pub struct Config {
    /// Generic framework configuration
    pub generic: RecommendedConfig,
    /// Server-specific extra configuration
    pub extra: ExtraConfig,
}

impl Config {
    /// Freeze the configuration for server construction
    pub fn complete(self) -> CompletedConfig {
        CompletedConfig(self)
    }
}

/// A configuration that has passed the completion step
#[derive(Debug)]
pub struct CompletedConfig(Config);

impl CompletedConfig {
    /// Build the server
    ///
    /// Fails with a build error when serving material or loopback
    /// credentials are missing, i.e. when option application was skipped
    /// or incomplete.
    pub fn build(self) -> Result<Server, Error> {
        let Config { generic, extra: _ } = self.0;
        let serving = generic
            .serving
            .ok_or_else(|| Error::build("no serving configuration was applied"))?;
        let loopback = generic
            .loopback
            .ok_or_else(|| Error::build("no loopback client configuration was applied"))?;

        Ok(Server {
            serving,
            loopback,
            hooks: PostStartHooks::new(),
        })
    }
}

/// The constructed server, ready to register hooks and run
///
/// Lifecycle: built, then hooks registered, then [`Server::run`] drives
/// it until the supplied token is cancelled.
pub struct Server {
    serving: ServingInfo,
    loopback: LoopbackClientConfig,
    hooks: PostStartHooks,
}

impl Server {
    /// Register a post-start hook under a fixed name
    ///
    /// The hook fires once, after the listener reports ready. A
    /// registration failure (duplicate name) is fatal to startup.
    pub fn add_post_start_hook<F, Fut>(&mut self, name: &str, hook: F) -> Result<(), Error>
    where
        F: FnOnce(PostStartHookContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.hooks.add(name, hook)
    }

    /// Names of the registered post-start hooks
    pub fn post_start_hook_names(&self) -> Vec<String> {
        self.hooks.names()
    }

    /// The loopback client configuration this server was built with
    pub fn loopback(&self) -> &LoopbackClientConfig {
        &self.loopback
    }

    /// Serve until `shutdown` is cancelled
    ///
    /// Binds the secure listener, fires the post-start hooks once the
    /// listener is ready, then serves. Cancellation is the only clean
    /// shutdown path: the listener drains gracefully and everything the
    /// hooks started observes a child of `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        let Server {
            serving,
            mut loopback,
            hooks,
        } = self;

        let readiness = hooks.readiness();
        let router = diagnostics_router(readiness);

        let tls = RustlsConfig::from_pem(
            serving.cert_pem.clone().into_bytes(),
            serving.key_pem.clone().into_bytes(),
        )
        .await
        .map_err(|e| Error::build(format!("TLS config error: {e}")))?;

        let handle = Handle::new();
        let mut serve_task = tokio::spawn(
            axum_server::bind_rustls(serving.addr, tls)
                .handle(handle.clone())
                .serve(router.into_make_service()),
        );

        // Wait for the listener before firing hooks.
        let listen_addr = tokio::select! {
            addr = handle.listening() => match addr {
                Some(addr) => addr,
                None => {
                    let err = match serve_task.await {
                        Ok(Err(e)) => e.to_string(),
                        Ok(Ok(())) => "listener closed before becoming ready".to_string(),
                        Err(e) => e.to_string(),
                    };
                    return Err(Error::serve(format!("failed to bind {}: {err}", serving.addr)));
                }
            },
            _ = shutdown.cancelled() => {
                handle.shutdown();
                let _ = serve_task.await;
                return Ok(());
            }
        };
        info!(addr = %listen_addr, "aggregated API server listening");

        // Hooks get loopback credentials pointing at the port actually
        // bound; with an ephemeral port this differs from the configured
        // one, which only clients built before bind ever see.
        loopback.server_url = format!("https://127.0.0.1:{}", listen_addr.port());
        let hook_ctx = PostStartHookContext {
            listen_addr,
            loopback,
            shutdown: shutdown.child_token(),
        };
        if let Err(err) = hooks.run(&hook_ctx).await {
            warn!(error = %err, "post-start hook failed, shutting down");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            let _ = serve_task.await;
            return Err(err);
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, draining connections");
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            }
            result = &mut serve_task => {
                let err = match result {
                    Ok(Err(e)) => e.to_string(),
                    Ok(Ok(())) => "listener closed unexpectedly".to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(Error::serve(err));
            }
        }

        let _ = serve_task.await;
        info!("aggregated API server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.serving.addr)
            .field("hooks", &self.hooks.names())
            .finish_non_exhaustive()
    }
}

/// Health and readiness routes
///
/// `/healthz` and `/livez` report liveness; `/readyz` additionally
/// requires every post-start hook to have finished, reported as
/// `poststarthook/<name>` checks.
fn diagnostics_router(readiness: Arc<HookReadiness>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/livez", get(|| async { "ok" }))
        .route("/readyz", get(readyz_handler))
        .with_state(readiness)
}

async fn readyz_handler(State(readiness): State<Arc<HookReadiness>>) -> (StatusCode, String) {
    let snapshot = readiness.snapshot();
    let mut ready = true;
    let mut body = String::new();
    for (name, state) in &snapshot {
        match state {
            HookState::Finished => {
                body.push_str(&format!("[+]poststarthook/{name} ok\n"));
            }
            HookState::Pending => {
                ready = false;
                body.push_str(&format!("[-]poststarthook/{name} not finished\n"));
            }
            HookState::Failed(reason) => {
                ready = false;
                body.push_str(&format!("[-]poststarthook/{name} failed: {reason}\n"));
            }
        }
    }
    if ready {
        body.push_str("readyz check passed\n");
        (StatusCode::OK, body)
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, body)
    }
}
