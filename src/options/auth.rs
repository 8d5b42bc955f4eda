//! Authentication and authorization options

use std::path::PathBuf;

use clap::Args;

use crate::error::{Error, ValidationError};
use crate::server::{AuthorizationMode, RecommendedConfig};

/// Authentication and authorization option group
#[derive(Args, Clone, Debug, PartialEq)]
pub struct AuthOptions {
    /// Admit unauthenticated requests as `system:anonymous`
    #[arg(long = "anonymous-auth", default_value_t = true)]
    pub anonymous_auth: bool,

    /// Static bearer token file for authentication
    #[arg(long = "token-auth-file", value_name = "PATH")]
    pub token_auth_file: Option<PathBuf>,

    /// How requests are authorized
    #[arg(long = "authorization-mode", value_enum, default_value_t = AuthorizationMode::AlwaysAllow)]
    pub authorization_mode: AuthorizationMode,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            anonymous_auth: true,
            token_auth_file: None,
            authorization_mode: AuthorizationMode::AlwaysAllow,
        }
    }
}

impl AuthOptions {
    /// Validate the token file, if one is configured
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errs = Vec::new();
        if let Some(path) = &self.token_auth_file {
            if !path.exists() {
                errs.push(ValidationError::new(
                    "auth",
                    format!("token file {} does not exist", path.display()),
                ));
            }
        }
        errs
    }

    /// Apply authn/authz settings onto the generic configuration
    pub fn apply_to(&self, config: &mut RecommendedConfig) -> Result<(), Error> {
        config.authentication.anonymous = self.anonymous_auth;
        config.authentication.token_file = self.token_auth_file.clone();
        config.authorization.mode = self.authorization_mode;
        Ok(())
    }
}
