//! Secure serving options
//!
//! Bind address and TLS material for the secure endpoint. When no
//! explicit certificate is configured the group defaults to a
//! self-signed certificate for `localhost`/`127.0.0.1`; the resulting
//! trust bundle also seeds the loopback client configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Args;

use crate::client::LoopbackClientConfig;
use crate::error::{Error, ValidationError};
use crate::pki::SelfSignedCert;
use crate::server::{RecommendedConfig, ServingInfo};
use crate::DEFAULT_SECURE_PORT;

/// Secure serving option group
#[derive(Args, Clone, Debug, PartialEq)]
pub struct SecureServingOptions {
    /// Address the secure listener binds to
    #[arg(long = "bind-address", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Port of the secure listener; 0 asks for an ephemeral port
    #[arg(long = "secure-port", default_value_t = DEFAULT_SECURE_PORT)]
    pub secure_port: u16,

    /// PEM file with the serving certificate chain
    #[arg(long = "tls-cert-file", value_name = "PATH")]
    pub cert_file: Option<PathBuf>,

    /// PEM file with the serving private key
    #[arg(long = "tls-private-key-file", value_name = "PATH")]
    pub key_file: Option<PathBuf>,

    /// Self-signed material generated by certificate defaulting
    #[arg(skip)]
    generated: Option<SelfSignedCert>,
}

impl Default for SecureServingOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            secure_port: DEFAULT_SECURE_PORT,
            cert_file: None,
            key_file: None,
            generated: None,
        }
    }
}

impl SecureServingOptions {
    /// Validate the certificate flag pairing
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errs = Vec::new();
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) => errs.push(ValidationError::new(
                "secure-serving",
                "--tls-cert-file requires --tls-private-key-file",
            )),
            (None, Some(_)) => errs.push(ValidationError::new(
                "secure-serving",
                "--tls-private-key-file requires --tls-cert-file",
            )),
            _ => {}
        }
        for path in [&self.cert_file, &self.key_file].into_iter().flatten() {
            if !path.exists() {
                errs.push(ValidationError::new(
                    "secure-serving",
                    format!("file {} does not exist", path.display()),
                ));
            }
        }
        errs
    }

    /// Default to a self-signed certificate when none is configured
    ///
    /// Generates a certificate for hostname `localhost` and address
    /// `127.0.0.1`. An explicitly configured certificate is preserved
    /// unchanged, and repeated calls reuse the first generated material.
    pub fn maybe_default_self_signed(&mut self) -> Result<(), Error> {
        if self.cert_file.is_some() || self.generated.is_some() {
            return Ok(());
        }
        let cert =
            SelfSignedCert::generate("localhost", &[IpAddr::V4(Ipv4Addr::LOCALHOST)])
                .map_err(|e| {
                    Error::defaulting(format!("creating self-signed certificate: {e}"))
                })?;
        self.generated = Some(cert);
        Ok(())
    }

    /// Whether certificate defaulting generated the serving material
    pub fn is_self_signed(&self) -> bool {
        self.generated.is_some()
    }

    /// Apply serving material and loopback credentials onto the generic
    /// configuration
    ///
    /// Must run after [`maybe_default_self_signed`](Self::maybe_default_self_signed)
    /// unless explicit certificate files are configured.
    pub fn apply_to(&self, config: &mut RecommendedConfig) -> Result<(), Error> {
        let (cert_pem, key_pem) = match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => {
                let cert_pem = std::fs::read_to_string(cert).map_err(|e| {
                    Error::apply(
                        "secure-serving",
                        format!("reading {}: {e}", cert.display()),
                    )
                })?;
                let key_pem = std::fs::read_to_string(key).map_err(|e| {
                    Error::apply(
                        "secure-serving",
                        format!("reading {}: {e}", key.display()),
                    )
                })?;
                (cert_pem, key_pem)
            }
            _ => {
                let generated = self.generated.as_ref().ok_or_else(|| {
                    Error::apply(
                        "secure-serving",
                        "no certificate configured and defaulting never ran",
                    )
                })?;
                (generated.cert_pem.clone(), generated.key_pem.clone())
            }
        };

        config.serving = Some(ServingInfo {
            addr: SocketAddr::new(self.bind_address, self.secure_port),
            cert_pem: cert_pem.clone(),
            key_pem,
        });
        // The serving certificate doubles as the loopback trust bundle.
        config.loopback = Some(LoopbackClientConfig::new(self.secure_port, cert_pem));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ResourceRegistry;

    #[test]
    fn defaulting_generates_localhost_material_once() {
        let mut opts = SecureServingOptions::default();
        assert!(!opts.is_self_signed());

        opts.maybe_default_self_signed().unwrap();
        assert!(opts.is_self_signed());
        let first = opts.generated.clone().unwrap();

        opts.maybe_default_self_signed().unwrap();
        assert_eq!(opts.generated.unwrap().cert_pem, first.cert_pem);
    }

    #[test]
    fn explicit_certificates_are_preserved_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let cert = SelfSignedCert::generate("example.test", &[]).unwrap();
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("tls.key");
        std::fs::write(&cert_path, &cert.cert_pem).unwrap();
        std::fs::write(&key_path, &cert.key_pem).unwrap();

        let mut opts = SecureServingOptions {
            cert_file: Some(cert_path),
            key_file: Some(key_path),
            ..Default::default()
        };
        assert!(opts.validate().is_empty());

        opts.maybe_default_self_signed().unwrap();
        assert!(!opts.is_self_signed());

        let mut config = RecommendedConfig::new(ResourceRegistry::flotilla());
        opts.apply_to(&mut config).unwrap();
        assert_eq!(config.serving.unwrap().cert_pem, cert.cert_pem);
    }

    #[test]
    fn cert_without_key_fails_validation() {
        let opts = SecureServingOptions {
            cert_file: Some(PathBuf::from("/nonexistent/tls.crt")),
            ..Default::default()
        };
        let errs = opts.validate();
        // Missing key pairing and the nonexistent file are both reported.
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| e.group == "secure-serving"));
    }

    #[test]
    fn apply_without_defaulting_is_an_apply_error() {
        let opts = SecureServingOptions::default();
        let mut config = RecommendedConfig::new(ResourceRegistry::flotilla());
        let err = opts.apply_to(&mut config).unwrap_err();
        assert!(matches!(err, Error::Apply { stage: "secure-serving", .. }));
    }

    #[test]
    fn loopback_points_at_the_secure_port() {
        let mut opts = SecureServingOptions {
            secure_port: 9443,
            ..Default::default()
        };
        opts.maybe_default_self_signed().unwrap();

        let mut config = RecommendedConfig::new(ResourceRegistry::flotilla());
        opts.apply_to(&mut config).unwrap();
        let loopback = config.loopback.unwrap();
        assert_eq!(loopback.server_url, "https://127.0.0.1:9443");
    }
}
