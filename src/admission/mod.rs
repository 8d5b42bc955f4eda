//! Admission plugin wiring
//!
//! Only the wiring lives here: a plugin registry keyed by name, the
//! initializer mechanism that supplies shared dependencies (loopback
//! client, informer factory) to plugins before the chain is assembled,
//! and the chain itself. Admission decisions are out of scope - concrete
//! plugins are registered by the embedding server.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kube::Client;
use thiserror::Error;

use crate::informers::InformerFactory;

/// The kind of resource operation being checked for admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A resource creation
    Create,
    /// A resource update
    Update,
    /// A resource deletion
    Delete,
    /// A subresource connect, e.g. proxy
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::Connect => write!(f, "CONNECT"),
        }
    }
}

/// Admission wiring errors
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// A requested plugin is not present in the registry
    #[error("unknown admission plugin: {0}")]
    UnknownPlugin(String),

    /// A plugin reported that its dependencies were never supplied
    #[error("plugin {plugin} not initialized: {message}")]
    NotInitialized {
        /// Name of the plugin
        plugin: String,
        /// Which dependency is missing
        message: String,
    },
}

/// Shared dependencies handed to plugins before the chain is assembled
#[derive(Clone)]
pub struct PluginDependencies {
    /// Loopback client for reading the server's own API
    pub client: Client,
    /// Informer factory over the server's own resources
    pub informers: InformerFactory,
}

/// An admission plugin
///
/// Plugins receive their shared dependencies through
/// [`Plugin::inject_dependencies`] and may veto chain assembly from
/// [`Plugin::validate_initialization`] if something they need never
/// arrived.
pub trait Plugin: Send + Sync {
    /// Stable name the plugin is registered and enabled under
    fn name(&self) -> &'static str;

    /// Whether this plugin wants to see the given operation
    fn handles(&self, operation: Operation) -> bool;

    /// Receive shared dependencies; called by an initializer
    fn inject_dependencies(&mut self, _deps: &PluginDependencies) {}

    /// Verify that every required dependency arrived
    fn validate_initialization(&self) -> Result<(), AdmissionError> {
        Ok(())
    }
}

/// Supplies shared dependencies to admission plugins before they run
pub trait PluginInitializer: Send + Sync {
    /// Initialize the given plugin
    fn initialize(&self, plugin: &mut dyn Plugin);
}

/// The standard initializer: hands every plugin the loopback client and
/// the informer factory
pub struct DependencyInitializer {
    deps: PluginDependencies,
}

impl DependencyInitializer {
    /// Create an initializer carrying the given dependencies
    pub fn new(client: Client, informers: InformerFactory) -> Self {
        Self {
            deps: PluginDependencies { client, informers },
        }
    }
}

impl PluginInitializer for DependencyInitializer {
    fn initialize(&self, plugin: &mut dyn Plugin) {
        plugin.inject_dependencies(&self.deps);
    }
}

/// Factory creating a fresh plugin instance
pub type PluginFactory = fn() -> Box<dyn Plugin>;

/// Registry of admission plugins, keyed by name
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin factory under its name
    pub fn register(&mut self, name: &str, factory: PluginFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Whether a plugin name is known
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered plugin names, sorted
    pub fn registered_names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Instantiate the named plugins in the order given
    pub fn new_plugins(&self, names: &[String]) -> Result<Vec<Box<dyn Plugin>>, AdmissionError> {
        names
            .iter()
            .map(|name| {
                self.factories
                    .get(name)
                    .map(|factory| factory())
                    .ok_or_else(|| AdmissionError::UnknownPlugin(name.clone()))
            })
            .collect()
    }
}

/// An ordered chain of initialized admission plugins
pub struct AdmissionChain {
    plugins: Vec<Box<dyn Plugin>>,
}

impl AdmissionChain {
    /// Assemble a chain: run every initializer over every plugin, in
    /// order, then verify each plugin saw its dependencies
    pub fn new(
        mut plugins: Vec<Box<dyn Plugin>>,
        initializers: &[Arc<dyn PluginInitializer>],
    ) -> Result<Self, AdmissionError> {
        for plugin in plugins.iter_mut() {
            for initializer in initializers {
                initializer.initialize(plugin.as_mut());
            }
            plugin.validate_initialization()?;
        }
        Ok(Self { plugins })
    }

    /// Number of plugins in the chain
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// True if the chain carries no plugins
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Whether any plugin in the chain wants the given operation
    pub fn handles(&self, operation: Operation) -> bool {
        self.plugins.iter().any(|p| p.handles(operation))
    }
}

impl fmt::Debug for AdmissionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionChain")
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
