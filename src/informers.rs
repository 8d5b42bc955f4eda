//! Reflector-backed cache factory
//!
//! The informer factory maintains locally cached, eventually-consistent
//! views of API resources, refreshed via watch. Stores are registered
//! before startup; [`InformerFactory::start`] launches every registered
//! watch loop exactly once, and all loops stop promptly when the
//! supplied cancellation token fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::TryStreamExt;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Upper bound on the watch timeout we hand to the API server
///
/// Kubernetes caps watch requests at around five minutes; staying below
/// that keeps the server, not the client, in charge of closing watches.
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

type StartFn = Box<dyn FnOnce(CancellationToken) + Send>;

struct Inner {
    client: Client,
    resync: Duration,
    started: AtomicBool,
    pending: Mutex<Vec<StartFn>>,
}

/// Factory for reflector-backed resource caches
///
/// Cheaply cloneable handle; clones share registrations and the
/// started-once guard, mirroring how a shared informer factory is passed
/// around by reference.
#[derive(Clone)]
pub struct InformerFactory {
    inner: Arc<Inner>,
}

impl InformerFactory {
    /// Create a factory over the given client
    ///
    /// `resync` bounds how long an individual watch request stays open
    /// before the API server is asked to close and re-open it; callers
    /// derive it from the loopback client's request timeout.
    pub fn new(client: Client, resync: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                resync,
                started: AtomicBool::new(false),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a cache for a cluster-scoped resource and return its store
    ///
    /// The store stays empty until [`start`](Self::start) runs. Stores
    /// must be registered before the factory starts; a registration that
    /// arrives afterwards is never started and only logged.
    pub fn watch<K>(&self) -> Store<K>
    where
        K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
        K::DynamicType: Default + Clone + Eq + std::hash::Hash + Send + Sync,
    {
        let (reader, writer) = reflector::store::<K>();
        let api: Api<K> = Api::all(self.inner.client.clone());
        let timeout_secs =
            (self.inner.resync.as_secs() as u32).clamp(1, MAX_WATCH_TIMEOUT_SECS);
        let config = watcher::Config::default().timeout(timeout_secs);

        let start: StartFn = Box::new(move |token: CancellationToken| {
            tokio::spawn(async move {
                let stream = reflector::reflector(writer, watcher(api, config))
                    .default_backoff()
                    .touched_objects();
                let mut stream = std::pin::pin!(stream);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!("informer cancelled, stopping watch");
                            break;
                        }
                        item = stream.try_next() => match item {
                            Ok(Some(obj)) => {
                                trace!(name = %obj.name_any(), "cache updated");
                            }
                            Ok(None) => break,
                            Err(err) => {
                                warn!(error = %err, "watch stream error");
                            }
                        }
                    }
                }
            });
        });

        if self.inner.started.load(Ordering::SeqCst) {
            warn!("informer registered after factory start; its cache will not be filled");
        } else {
            self.inner
                .pending
                .lock()
                .expect("informer registration lock poisoned")
                .push(start);
        }
        reader
    }

    /// Start every registered watch loop
    ///
    /// Runs the registered loops exactly once for the factory's lifetime;
    /// later calls are no-ops. All loops observe `shutdown` and stop
    /// promptly when it is cancelled.
    pub fn start(&self, shutdown: CancellationToken) {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("informer factory already started");
            return;
        }
        let pending = std::mem::take(
            &mut *self
                .inner
                .pending
                .lock()
                .expect("informer registration lock poisoned"),
        );
        debug!(informers = pending.len(), "starting informer factory");
        for start in pending {
            start(shutdown.clone());
        }
    }

    /// Whether [`start`](Self::start) has already run
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// The resync interval this factory was built with
    pub fn resync(&self) -> Duration {
        self.inner.resync
    }
}

impl std::fmt::Debug for InformerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InformerFactory")
            .field("resync", &self.inner.resync)
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Cluster;
    use crate::client::LoopbackClientConfig;
    use crate::pki::SelfSignedCert;
    use std::net::{IpAddr, Ipv4Addr};

    fn offline_factory(resync: Duration) -> InformerFactory {
        crate::server::init_crypto_provider();
        let ca = SelfSignedCert::generate("localhost", &[IpAddr::V4(Ipv4Addr::LOCALHOST)])
            .unwrap()
            .cert_pem;
        let client = LoopbackClientConfig::new(1, ca).client().unwrap();
        InformerFactory::new(client, resync)
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let factory = offline_factory(Duration::from_secs(30));
        let _store = factory.watch::<Cluster>();

        let token = CancellationToken::new();
        token.cancel();
        factory.start(token.clone());
        assert!(factory.is_started());
        // The second start must not panic or spawn anything new.
        factory.start(token);
        assert!(factory.is_started());
    }

    #[tokio::test]
    async fn store_is_empty_before_start() {
        let factory = offline_factory(Duration::from_secs(30));
        let store = factory.watch::<Cluster>();
        assert!(store.state().is_empty());
        assert!(!factory.is_started());
    }

    #[tokio::test]
    async fn resync_carries_the_loopback_timeout() {
        let factory = offline_factory(Duration::from_secs(17));
        assert_eq!(factory.resync(), Duration::from_secs(17));
    }
}
