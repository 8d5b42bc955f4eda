//! Storage backend options
//!
//! Location and encoding policy for the etcd backend. The storage
//! protocol itself lives in the framework; this group only validates the
//! endpoints and applies a [`StorageConfig`] onto the generic
//! configuration.

use clap::Args;

use crate::api::MultiGroupVersioner;
use crate::error::{Error, ValidationError};
use crate::server::{RecommendedConfig, StorageConfig};

/// Default key prefix stored objects live under
pub const DEFAULT_STORAGE_PREFIX: &str = "/registry/flotilla.dev";

/// etcd backend option group
#[derive(Args, Clone, Debug, PartialEq)]
pub struct EtcdOptions {
    /// etcd endpoints the server persists through
    #[arg(
        long = "etcd-servers",
        value_name = "URL",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:2379"
    )]
    pub servers: Vec<String>,

    /// Key prefix all stored objects live under
    #[arg(long = "etcd-prefix", default_value = DEFAULT_STORAGE_PREFIX)]
    pub prefix: String,

    /// Whether list reads use chunked requests; overwritten from the
    /// APIListChunking gate during config assembly
    #[arg(skip = true)]
    pub paging: bool,

    /// Encoding policy for objects at rest
    #[arg(skip = MultiGroupVersioner::flotilla_default())]
    pub encode_versioner: MultiGroupVersioner,
}

impl Default for EtcdOptions {
    fn default() -> Self {
        Self {
            servers: vec!["http://127.0.0.1:2379".to_string()],
            prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            paging: true,
            encode_versioner: MultiGroupVersioner::flotilla_default(),
        }
    }
}

impl EtcdOptions {
    /// Validate endpoint syntax and the key prefix
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errs = Vec::new();
        if self.servers.is_empty() {
            errs.push(ValidationError::new("etcd", "no servers configured"));
        }
        for server in &self.servers {
            match server.parse::<http::Uri>() {
                Ok(uri) => {
                    let scheme_ok = matches!(uri.scheme_str(), Some("http") | Some("https"));
                    if !scheme_ok || uri.host().is_none() {
                        errs.push(ValidationError::new(
                            "etcd",
                            format!("server address {server:?} must be an http(s) URL with a host"),
                        ));
                    }
                }
                Err(e) => {
                    errs.push(ValidationError::new(
                        "etcd",
                        format!("malformed server address {server:?}: {e}"),
                    ));
                }
            }
        }
        if !self.prefix.starts_with('/') {
            errs.push(ValidationError::new(
                "etcd",
                format!("prefix {:?} must start with '/'", self.prefix),
            ));
        }
        errs
    }

    /// Apply the storage configuration onto the generic configuration
    pub fn apply_to(&self, config: &mut RecommendedConfig) -> Result<(), Error> {
        config.storage = Some(StorageConfig {
            servers: self.servers.clone(),
            prefix: self.prefix.clone(),
            paging: self.paging,
            encode_versioner: self.encode_versioner.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ResourceRegistry, GROUP};

    #[test]
    fn defaults_validate_cleanly() {
        assert!(EtcdOptions::default().validate().is_empty());
    }

    #[test]
    fn unparsable_address_yields_exactly_one_storage_error() {
        let opts = EtcdOptions {
            servers: vec!["://not a url".to_string()],
            ..Default::default()
        };
        let errs = opts.validate();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].group, "etcd");
    }

    #[test]
    fn wrong_scheme_is_rejected() {
        let opts = EtcdOptions {
            servers: vec!["ftp://127.0.0.1:2379".to_string()],
            ..Default::default()
        };
        assert_eq!(opts.validate().len(), 1);
    }

    #[test]
    fn relative_prefix_is_rejected() {
        let opts = EtcdOptions {
            prefix: "registry".to_string(),
            ..Default::default()
        };
        let errs = opts.validate();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("prefix"));
    }

    #[test]
    fn apply_carries_versioner_and_paging() {
        let mut config = RecommendedConfig::new(ResourceRegistry::flotilla());
        let opts = EtcdOptions {
            paging: false,
            ..Default::default()
        };
        opts.apply_to(&mut config).unwrap();

        let storage = config.storage.unwrap();
        assert!(!storage.paging);
        assert_eq!(storage.prefix, DEFAULT_STORAGE_PREFIX);
        assert!(storage.encode_versioner.encode_version_for(GROUP).is_some());
    }
}
