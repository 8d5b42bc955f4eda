//! Audit options
//!
//! Audit is opt-in: without a policy file the server records nothing.
//! The policy file is YAML and parsed during option application, so a
//! malformed file surfaces as an apply error naming this group.

use std::path::PathBuf;

use clap::Args;

use crate::error::{Error, ValidationError};
use crate::server::{AuditPolicy, RecommendedConfig};

/// Audit option group
#[derive(Args, Clone, Debug, Default, PartialEq)]
pub struct AuditOptions {
    /// YAML file defining the audit policy; auditing is disabled when unset
    #[arg(long = "audit-policy-file", value_name = "PATH")]
    pub policy_file: Option<PathBuf>,

    /// Where audit events are written; `-` means stdout
    #[arg(long = "audit-log-path", value_name = "PATH")]
    pub log_path: Option<PathBuf>,
}

impl AuditOptions {
    /// Validate the policy file, if auditing is enabled
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errs = Vec::new();
        if let Some(path) = &self.policy_file {
            if !path.exists() {
                errs.push(ValidationError::new(
                    "audit",
                    format!("policy file {} does not exist", path.display()),
                ));
            }
        }
        if self.policy_file.is_none() && self.log_path.is_some() {
            errs.push(ValidationError::new(
                "audit",
                "--audit-log-path requires --audit-policy-file",
            ));
        }
        errs
    }

    /// Parse the policy file and apply it onto the generic configuration
    pub fn apply_to(&self, config: &mut RecommendedConfig) -> Result<(), Error> {
        let Some(path) = &self.policy_file else {
            return Ok(());
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::apply("audit", format!("reading {}: {e}", path.display())))?;
        let mut policy: AuditPolicy = serde_yaml::from_str(&contents)
            .map_err(|e| Error::apply("audit", format!("parsing {}: {e}", path.display())))?;
        if policy.log_path.is_none() {
            policy.log_path = self.log_path.clone();
        }
        config.audit = Some(policy);
        Ok(())
    }
}
