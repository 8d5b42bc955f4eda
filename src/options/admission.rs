//! Admission options
//!
//! Carries the enabled plugin names, the plugin registry, and the
//! deferred admission initializer factory. The factory is a one-shot
//! closure installed during config assembly and consumed during option
//! application, once the loopback client configuration exists: it builds
//! the loopback client and the informer factory, and returns them
//! forward by value together with the plugin initializers. It never
//! talks to the network - it only wires objects together.

use std::fmt;
use std::sync::Arc;

use clap::Args;

use crate::admission::{AdmissionChain, PluginInitializer, PluginRegistry};
use crate::client::LoopbackClientConfig;
use crate::error::{Error, ValidationError};
use crate::informers::InformerFactory;
use crate::server::RecommendedConfig;

/// One-shot factory producing the admission informer factory and the
/// plugin initializers from the server's loopback credentials
pub type DeferredInitializerFactory = Box<
    dyn FnOnce(
            &LoopbackClientConfig,
        ) -> Result<(InformerFactory, Vec<Arc<dyn PluginInitializer>>), Error>
        + Send,
>;

/// Admission option group
#[derive(Args, Default)]
pub struct AdmissionOptions {
    /// Admission plugins to enable, in evaluation order
    #[arg(
        long = "enable-admission-plugins",
        value_name = "NAME",
        value_delimiter = ','
    )]
    pub enabled: Vec<String>,

    /// Registry of known plugins
    #[arg(skip)]
    pub registry: PluginRegistry,

    #[arg(skip)]
    initializer_factory: Option<DeferredInitializerFactory>,
}

impl AdmissionOptions {
    /// Validate that every enabled plugin is registered
    pub fn validate(&self) -> Vec<ValidationError> {
        self.enabled
            .iter()
            .filter(|name| !self.registry.is_registered(name))
            .map(|name| {
                ValidationError::new("admission", format!("unknown admission plugin {name:?}"))
            })
            .collect()
    }

    /// Install the deferred initializer factory
    ///
    /// Called by config assembly before option application; the factory
    /// is consumed, at most once, when this group is applied.
    pub fn set_initializer_factory(&mut self, factory: DeferredInitializerFactory) {
        self.initializer_factory = Some(factory);
    }

    /// Whether a deferred factory is installed and not yet consumed
    pub fn has_initializer_factory(&self) -> bool {
        self.initializer_factory.is_some()
    }

    /// Apply the admission chain onto the generic configuration
    ///
    /// Executes the deferred factory with the loopback configuration the
    /// secure-serving group applied earlier, installs the resulting
    /// informer factory, and assembles the plugin chain.
    pub fn apply_to(&mut self, config: &mut RecommendedConfig) -> Result<(), Error> {
        let initializers = match self.initializer_factory.take() {
            Some(factory) => {
                let loopback = config.loopback.as_ref().ok_or_else(|| {
                    Error::apply(
                        "admission",
                        "loopback client configuration must be applied before admission",
                    )
                })?;
                let (informers, initializers) = factory(loopback)?;
                config.set_informers(informers)?;
                initializers
            }
            None => Vec::new(),
        };

        let plugins = self
            .registry
            .new_plugins(&self.enabled)
            .map_err(|e| Error::apply("admission", e.to_string()))?;
        let chain = AdmissionChain::new(plugins, &initializers)
            .map_err(|e| Error::apply("admission", e.to_string()))?;
        config.admission = Some(chain);
        Ok(())
    }
}

impl fmt::Debug for AdmissionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionOptions")
            .field("enabled", &self.enabled)
            .field("registered", &self.registry.registered_names())
            .field("factory_installed", &self.has_initializer_factory())
            .finish()
    }
}
