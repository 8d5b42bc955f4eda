//! Post-start hooks
//!
//! A post-start hook runs exactly once, after the server begins
//! accepting connections, and is the only sanctioned place to start
//! background subsystems that must not run before serving is possible.
//! Every hook is registered under a fixed name; its completion state is
//! surfaced through the readiness endpoint as `poststarthook/<name>`.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::LoopbackClientConfig;
use crate::error::Error;

/// Context handed to a post-start hook when it fires
#[derive(Clone)]
pub struct PostStartHookContext {
    /// Address the server actually bound; differs from the configured
    /// address when an ephemeral port was requested
    pub listen_addr: SocketAddr,
    /// Loopback credentials for calling back into this server
    pub loopback: LoopbackClientConfig,
    /// Cancelled when the server shuts down; everything the hook starts
    /// must observe it
    pub shutdown: CancellationToken,
}

type HookFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
type HookFn = Box<dyn FnOnce(PostStartHookContext) -> HookFuture + Send>;

/// Completion state of a named hook, as reported by `/readyz`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookState {
    /// The hook has not run yet
    Pending,
    /// The hook ran and returned success
    Finished,
    /// The hook ran and failed
    Failed(String),
}

/// Shared record of hook completion, consulted by the readiness endpoint
#[derive(Debug, Default)]
pub struct HookReadiness {
    states: Mutex<BTreeMap<String, HookState>>,
}

impl HookReadiness {
    fn register(&self, name: &str) {
        self.states
            .lock()
            .expect("hook readiness lock poisoned")
            .insert(name.to_string(), HookState::Pending);
    }

    fn record(&self, name: &str, state: HookState) {
        self.states
            .lock()
            .expect("hook readiness lock poisoned")
            .insert(name.to_string(), state);
    }

    /// Snapshot of every hook's completion state
    pub fn snapshot(&self) -> BTreeMap<String, HookState> {
        self.states
            .lock()
            .expect("hook readiness lock poisoned")
            .clone()
    }

    /// True once every registered hook has finished successfully
    pub fn all_finished(&self) -> bool {
        self.states
            .lock()
            .expect("hook readiness lock poisoned")
            .values()
            .all(|s| *s == HookState::Finished)
    }
}

/// Ordered registry of named post-start hooks
///
/// Hooks are registered before the run loop starts and consumed when
/// they fire; duplicate names are rejected at registration time.
#[derive(Default)]
pub struct PostStartHooks {
    hooks: Vec<(String, HookFn)>,
    readiness: Arc<HookReadiness>,
}

impl PostStartHooks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under `name`
    ///
    /// Fails if the name is already taken. A failed registration is
    /// fatal to startup: the caller must not continue with a partially
    /// wired server.
    pub fn add<F, Fut>(&mut self, name: &str, hook: F) -> Result<(), Error>
    where
        F: FnOnce(PostStartHookContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        if self.hooks.iter().any(|(existing, _)| existing == name) {
            return Err(Error::hook_registration(format!(
                "hook {name:?} is already registered"
            )));
        }
        self.readiness.register(name);
        self.hooks.push((
            name.to_string(),
            Box::new(move |ctx| Box::pin(hook(ctx)) as HookFuture),
        ));
        Ok(())
    }

    /// Names of the registered hooks, in registration order
    pub fn names(&self) -> Vec<String> {
        self.hooks.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Shared readiness record for the diagnostic endpoints
    pub fn readiness(&self) -> Arc<HookReadiness> {
        Arc::clone(&self.readiness)
    }

    /// Fire every hook once, in registration order
    ///
    /// Consumes the registry. Each hook's result is recorded for the
    /// readiness endpoint; the first failure aborts the remaining hooks
    /// and is returned to the caller.
    pub async fn run(self, ctx: &PostStartHookContext) -> Result<(), Error> {
        for (name, hook) in self.hooks {
            info!(hook = %name, "running post-start hook");
            match hook(ctx.clone()).await {
                Ok(()) => self.readiness.record(&name, HookState::Finished),
                Err(err) => {
                    error!(hook = %name, error = %err, "post-start hook failed");
                    self.readiness
                        .record(&name, HookState::Failed(err.to_string()));
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_context() -> PostStartHookContext {
        PostStartHookContext {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8443),
            loopback: LoopbackClientConfig::new(8443, "unused"),
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn hooks_run_once_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = PostStartHooks::new();

        for name in ["first", "second"] {
            let order = Arc::clone(&order);
            hooks
                .add(name, move |_ctx| async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                })
                .unwrap();
        }

        let readiness = hooks.readiness();
        hooks.run(&test_context()).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert!(readiness.all_finished());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let mut hooks = PostStartHooks::new();
        hooks.add("informers", |_ctx| async { Ok(()) }).unwrap();
        let err = hooks
            .add("informers", |_ctx| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, Error::HookRegistration(_)));
    }

    #[tokio::test]
    async fn failure_is_recorded_and_aborts_later_hooks() {
        let ran_after = Arc::new(AtomicUsize::new(0));
        let mut hooks = PostStartHooks::new();
        hooks
            .add("boom", |_ctx| async { Err(Error::serve("exploded")) })
            .unwrap();
        {
            let ran_after = Arc::clone(&ran_after);
            hooks
                .add("after", move |_ctx| async move {
                    ran_after.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        let readiness = hooks.readiness();
        let err = hooks.run(&test_context()).await.unwrap_err();
        assert!(matches!(err, Error::Serve(_)));
        assert_eq!(ran_after.load(Ordering::SeqCst), 0);

        let snapshot = readiness.snapshot();
        assert!(matches!(snapshot["boom"], HookState::Failed(_)));
        assert_eq!(snapshot["after"], HookState::Pending);
        assert!(!readiness.all_finished());
    }
}
