//! Error types for the aggregated API server bootstrap
//!
//! Startup is a one-shot sequence: every error below the run loop is
//! returned upward with the stage that produced it, and nothing is
//! retried. Validation is the exception to fail-fast - all option groups
//! are validated and their findings merged into one [`ValidationErrors`].

use std::fmt;

use thiserror::Error;

/// Main error type for server bootstrap operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// One or more option groups failed validation
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Defaulting failed, e.g. self-signed certificate generation
    #[error("defaulting error: {0}")]
    Defaulting(String),

    /// A dependency could not be constructed, e.g. the loopback client
    /// or the informer factory built from it
    #[error("dependency construction error: {0}")]
    Dependency(String),

    /// An option group rejected being applied to the server configuration
    #[error("apply error in {stage}: {message}")]
    Apply {
        /// The option group or apply stage that failed
        stage: &'static str,
        /// What went wrong
        message: String,
    },

    /// Server construction from a completed configuration failed
    #[error("server build error: {0}")]
    Build(String),

    /// A post-start hook could not be registered
    ///
    /// This is fatal to startup: the process must not continue with a
    /// partially wired server.
    #[error("post-start hook registration error: {0}")]
    HookRegistration(String),

    /// The run loop failed while serving
    #[error("serve error: {0}")]
    Serve(String),
}

impl Error {
    /// Create a defaulting error with the given message
    pub fn defaulting(msg: impl Into<String>) -> Self {
        Self::Defaulting(msg.into())
    }

    /// Create a dependency-construction error with the given message
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// Create an apply error for the given stage
    pub fn apply(stage: &'static str, msg: impl Into<String>) -> Self {
        Self::Apply {
            stage,
            message: msg.into(),
        }
    }

    /// Create a server build error with the given message
    pub fn build(msg: impl Into<String>) -> Self {
        Self::Build(msg.into())
    }

    /// Create a hook registration error with the given message
    pub fn hook_registration(msg: impl Into<String>) -> Self {
        Self::HookRegistration(msg.into())
    }

    /// Create a serve error with the given message
    pub fn serve(msg: impl Into<String>) -> Self {
        Self::Serve(msg.into())
    }
}

/// A single validation finding, attributed to the option group that
/// produced it
#[derive(Debug, Clone, Error)]
#[error("{group}: {message}")]
pub struct ValidationError {
    /// The option group the finding belongs to, e.g. "etcd"
    pub group: &'static str,
    /// What is wrong with the supplied value
    pub message: String,
}

impl ValidationError {
    /// Create a validation finding for the given option group
    pub fn new(group: &'static str, message: impl Into<String>) -> Self {
        Self {
            group,
            message: message.into(),
        }
    }
}

/// Aggregate of validation findings across all option groups
///
/// Validation never stops at the first failure: every group runs its own
/// checks and the findings are merged here. Zero wrapped findings means
/// success, which [`ValidationErrors::into_result`] maps to `Ok(())`.
#[derive(Debug, Clone, Default)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single finding
    pub fn push(&mut self, err: ValidationError) {
        self.errors.push(err);
    }

    /// Merge the findings of one option group into the aggregate
    pub fn extend(&mut self, errs: Vec<ValidationError>) {
        self.errors.extend(errs);
    }

    /// True if no group reported a problem
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of wrapped findings
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate over the wrapped findings
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Treat zero wrapped findings as success
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no errors");
        }
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "[{joined}]")
    }
}

impl std::error::Error for ValidationErrors {}
