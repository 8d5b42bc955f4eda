//! Loopback client construction
//!
//! The server calls back into its own API as a privileged internal
//! client. The credentials are assembled during option application: the
//! serving certificate doubles as the trust bundle, and a per-process
//! bearer token authenticates the client. Nothing here talks to the
//! network - building a [`kube::Client`] only wires the service stack.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use kube::Client;
use rand::RngCore;
use secrecy::SecretString;

use crate::error::Error;

/// Default request timeout for loopback calls
///
/// Also serves as the resync interval of the informer factories built
/// from this configuration.
pub const DEFAULT_LOOPBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials and endpoint for the server's own loopback API access
#[derive(Clone, Debug)]
pub struct LoopbackClientConfig {
    /// Base URL of the server's secure endpoint, e.g. `https://127.0.0.1:8443`
    pub server_url: String,
    /// PEM-encoded trust bundle for the serving certificate
    pub ca_pem: String,
    /// Bearer token identifying the loopback client
    pub token: String,
    /// Request timeout; doubles as the informer resync interval
    pub timeout: Duration,
}

impl LoopbackClientConfig {
    /// Assemble a loopback configuration for a local secure port
    ///
    /// With port 0 (ephemeral) the URL built here is not reachable;
    /// clients constructed before the listener binds can only connect
    /// once the run loop has rewritten `server_url` with the real bound
    /// port, which it does for the configuration handed to post-start
    /// hooks.
    pub fn new(port: u16, ca_pem: impl Into<String>) -> Self {
        Self {
            server_url: format!("https://127.0.0.1:{port}"),
            ca_pem: ca_pem.into(),
            token: generate_token(),
            timeout: DEFAULT_LOOPBACK_TIMEOUT,
        }
    }

    /// Build a typed client from this configuration
    ///
    /// Fails with a dependency-construction error if the endpoint URL or
    /// the trust bundle cannot be used; no connection is attempted.
    pub fn client(&self) -> Result<Client, Error> {
        let uri: http::Uri = self
            .server_url
            .parse()
            .map_err(|e| Error::dependency(format!("loopback URL {}: {e}", self.server_url)))?;

        let ca_der = pem::parse(self.ca_pem.as_bytes())
            .map_err(|e| Error::dependency(format!("loopback CA bundle: {e}")))?
            .into_contents();

        let mut config = kube::Config::new(uri);
        config.root_cert = Some(vec![ca_der]);
        config.connect_timeout = Some(self.timeout);
        config.read_timeout = Some(self.timeout);
        config.tls_server_name = Some("localhost".to_string());
        config.auth_info.token = Some(SecretString::from(self.token.clone()));

        Client::try_from(config)
            .map_err(|e| Error::dependency(format!("loopback client: {e}")))
    }
}

/// Generate a random bearer token for the loopback identity
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::SelfSignedCert;
    use std::net::{IpAddr, Ipv4Addr};

    fn serving_ca() -> String {
        crate::server::init_crypto_provider();
        SelfSignedCert::generate("localhost", &[IpAddr::V4(Ipv4Addr::LOCALHOST)])
            .unwrap()
            .cert_pem
    }

    #[tokio::test]
    async fn builds_a_client_without_touching_the_network() {
        let loopback = LoopbackClientConfig::new(8443, serving_ca());
        assert_eq!(loopback.server_url, "https://127.0.0.1:8443");
        loopback.client().unwrap();
    }

    #[test]
    fn corrupt_trust_bundle_is_a_dependency_error() {
        let mut loopback = LoopbackClientConfig::new(8443, serving_ca());
        loopback.ca_pem = "not a certificate".to_string();
        let err = loopback.client().err().unwrap();
        assert!(matches!(err, Error::Dependency(_)), "got {err}");
    }

    #[test]
    fn malformed_url_is_a_dependency_error() {
        let mut loopback = LoopbackClientConfig::new(8443, serving_ca());
        loopback.server_url = "https://127 .0.0.1:0".to_string();
        let err = loopback.client().err().unwrap();
        assert!(matches!(err, Error::Dependency(_)), "got {err}");
    }

    #[test]
    fn tokens_are_unique_per_process_start() {
        let a = LoopbackClientConfig::new(1, serving_ca());
        let b = LoopbackClientConfig::new(1, serving_ca());
        assert_ne!(a.token, b.token);
    }
}
