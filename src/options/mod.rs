//! Command-line options and config assembly
//!
//! Options flow through four stages: parse (clap), validate (every
//! group, findings aggregated), assemble (each group applied onto a
//! [`RecommendedConfig`] in a fixed order), and run (build the server,
//! register the informer post-start hook, serve until cancelled).

pub mod admission;
pub mod audit;
pub mod auth;
pub mod etcd;
pub mod features;
pub mod secure_serving;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission::{DependencyInitializer, PluginInitializer};
use crate::api::{Cluster, ResourceRegistry};
use crate::client::LoopbackClientConfig;
use crate::error::{Error, ValidationErrors};
use crate::informers::InformerFactory;
use crate::server::{Config, ExtraConfig, RecommendedConfig};
use crate::START_INFORMERS_HOOK;

use self::admission::AdmissionOptions;
use self::audit::AuditOptions;
use self::auth::AuthOptions;
use self::etcd::EtcdOptions;
use self::features::{FeatureGates, FeatureOptions, API_LIST_CHUNKING};
use self::secure_serving::SecureServingOptions;

/// The complete option surface of the aggregated API server
#[derive(Parser, Debug, Default)]
#[command(
    name = "flotilla-apiserver",
    about = "Aggregated API server for the flotilla.dev resource group",
    version
)]
pub struct Options {
    /// Secure serving flags
    #[command(flatten)]
    pub secure_serving: SecureServingOptions,

    /// Storage backend flags
    #[command(flatten)]
    pub etcd: EtcdOptions,

    /// Authentication and authorization flags
    #[command(flatten)]
    pub auth: AuthOptions,

    /// Audit flags
    #[command(flatten)]
    pub audit: AuditOptions,

    /// Admission flags
    #[command(flatten)]
    pub admission: AdmissionOptions,

    /// Feature gate flags
    #[command(flatten)]
    pub features: FeatureOptions,
}

impl Options {
    /// Create an option set carrying every group's defaults
    ///
    /// Equivalent to parsing an empty command line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in defaults that depend on values from other option groups
    ///
    /// Runs after parsing and before validation. No group currently
    /// derives a default from another group's value, so this is a no-op;
    /// it exists so cross-group defaulting has a fixed place in the
    /// pipeline when a group grows one.
    pub fn complete(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Run every group's checks and aggregate the findings
    ///
    /// Never stops at the first failure; a single returned error carries
    /// every finding from every group.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        errs.extend(self.secure_serving.validate());
        errs.extend(self.etcd.validate());
        errs.extend(self.auth.validate());
        errs.extend(self.audit.validate());
        errs.extend(self.admission.validate());
        errs.extend(self.features.validate());
        errs.into_result()
    }

    /// Assemble the server configuration from the validated options
    ///
    /// Defaults the serving certificate if none was supplied, resolves
    /// the pagination gate into storage configuration, installs the
    /// deferred admission initializer factory, and applies every group
    /// onto a fresh [`RecommendedConfig`] in a fixed order. Serving must
    /// be applied first so the loopback credentials exist by the time the
    /// admission group consumes them.
    pub fn config(&mut self, gates: &FeatureGates) -> Result<Config, Error> {
        self.secure_serving.maybe_default_self_signed()?;
        self.etcd.paging = gates.enabled(API_LIST_CHUNKING);

        self.admission
            .set_initializer_factory(Box::new(|loopback: &LoopbackClientConfig| {
                let client = loopback.client()?;
                let informers = InformerFactory::new(client.clone(), loopback.timeout);
                let _clusters = informers.watch::<Cluster>();
                let initializers: Vec<Arc<dyn PluginInitializer>> = vec![Arc::new(
                    DependencyInitializer::new(client, informers.clone()),
                )];
                Ok((informers, initializers))
            }));

        let mut generic = RecommendedConfig::new(ResourceRegistry::flotilla());
        self.secure_serving.apply_to(&mut generic)?;
        self.etcd.apply_to(&mut generic)?;
        self.auth.apply_to(&mut generic)?;
        self.audit.apply_to(&mut generic)?;
        self.admission.apply_to(&mut generic)?;

        if let Some(loopback) = &generic.loopback {
            let client = loopback.client()?;
            let informers = InformerFactory::new(client, loopback.timeout);
            let _clusters = informers.watch::<Cluster>();
            generic.generic_informers = Some(informers);
        }

        debug!(?generic, "configuration assembled");
        Ok(Config {
            generic,
            extra: ExtraConfig {},
        })
    }

    /// Validate, assemble, build and run the server until cancelled
    ///
    /// Both informer factories are started from a post-start hook, so
    /// their caches only begin filling after the listener is accepting
    /// connections.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), Error> {
        self.complete()?;
        self.validate()?;
        let gates = self.features.resolve();
        let config = self.config(&gates)?;

        let admission_informers = config.generic.informers().cloned();
        let generic_informers = config.generic.generic_informers.clone();

        let mut server = config.complete().build()?;
        server.add_post_start_hook(START_INFORMERS_HOOK, move |ctx| async move {
            info!(hook = START_INFORMERS_HOOK, "starting informer caches");
            if let Some(informers) = admission_informers {
                informers.start(ctx.shutdown.clone());
            }
            if let Some(informers) = generic_informers {
                informers.start(ctx.shutdown);
            }
            Ok(())
        })?;

        server.run(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::init_crypto_provider;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Options {
        let mut argv = vec!["flotilla-apiserver"];
        argv.extend_from_slice(args);
        Options::parse_from(argv)
    }

    #[test]
    fn new_matches_an_empty_command_line() {
        let parsed = parse(&[]);
        let fresh = Options::new();
        assert_eq!(parsed.secure_serving, fresh.secure_serving);
        assert_eq!(parsed.etcd, fresh.etcd);
        assert_eq!(parsed.auth, fresh.auth);
        assert_eq!(parsed.audit, fresh.audit);
        assert_eq!(parsed.features, fresh.features);
        assert!(parsed.admission.enabled.is_empty());
    }

    #[test]
    fn validation_aggregates_across_groups() {
        let mut opts = Options::new();
        opts.etcd.servers = vec!["".to_string()];
        opts.features.overrides = vec!["Warp=true".to_string()];
        opts.admission.enabled = vec!["Ghost".to_string()];

        let errs = opts.validate().unwrap_err();
        assert_eq!(errs.len(), 3, "got {errs}");
        let groups: Vec<_> = errs.iter().map(|e| e.group).collect();
        assert!(groups.contains(&"etcd"));
        assert!(groups.contains(&"feature-gates"));
        assert!(groups.contains(&"admission"));
    }

    #[tokio::test]
    async fn pagination_follows_the_chunking_gate() {
        init_crypto_provider();
        let mut gates = FeatureGates::defaults();
        gates.set(API_LIST_CHUNKING, false);

        let mut opts = Options::new();
        let config = opts.config(&gates).unwrap();
        assert!(!config.generic.storage.unwrap().paging);

        let mut opts = Options::new();
        let config = opts.config(&FeatureGates::defaults()).unwrap();
        assert!(config.generic.storage.unwrap().paging);
    }

    #[tokio::test]
    async fn config_defaults_self_signed_serving_and_wires_informers() {
        init_crypto_provider();
        let mut opts = Options::new();
        let config = opts.config(&FeatureGates::defaults()).unwrap();

        assert!(opts.secure_serving.is_self_signed());
        let serving = config.generic.serving.as_ref().unwrap();
        assert!(serving.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(config.generic.loopback.is_some());

        let admission_informers = config.generic.informers().unwrap();
        assert_eq!(admission_informers.resync(), Duration::from_secs(30));
        assert!(!admission_informers.is_started());
        assert!(config.generic.generic_informers.is_some());
        assert!(config.generic.admission.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn explicit_certificates_are_not_replaced() {
        init_crypto_provider();
        let dir = tempfile::tempdir().unwrap();
        let cert = crate::pki::SelfSignedCert::generate("localhost", &[]).unwrap();
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("tls.key");
        std::fs::write(&cert_path, &cert.cert_pem).unwrap();
        std::fs::write(&key_path, &cert.key_pem).unwrap();

        let mut opts = parse(&[
            "--tls-cert-file",
            cert_path.to_str().unwrap(),
            "--tls-private-key-file",
            key_path.to_str().unwrap(),
        ]);
        opts.validate().unwrap();
        let config = opts.config(&FeatureGates::defaults()).unwrap();
        assert!(!opts.secure_serving.is_self_signed());
        assert_eq!(
            config.generic.serving.unwrap().cert_pem,
            cert.cert_pem
        );
    }
}
