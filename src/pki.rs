//! Self-signed serving certificate generation
//!
//! The aggregated API server defaults to a self-signed serving
//! certificate when no explicit certificate is configured. The generated
//! certificate doubles as the trust bundle for the server's own loopback
//! client, so the SAN list must cover the loopback hostname and address.

use std::net::IpAddr;

use rcgen::{
    string::Ia5String, CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose,
    KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// A requested SAN entry is not a valid DNS name
    #[error("invalid subject alternative name: {0}")]
    InvalidSan(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// A generated serving certificate with its private key, both PEM-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfSignedCert {
    /// PEM-encoded leaf certificate
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

impl SelfSignedCert {
    /// Generate a self-signed serving certificate for the given hostname
    /// and IP addresses
    ///
    /// The hostname becomes the common name and a DNS SAN; every address
    /// becomes an IP SAN. Validity is ten years - the certificate only
    /// ever protects loopback traffic and local development setups.
    pub fn generate(hostname: &str, addresses: &[IpAddr]) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(hostname.to_string()));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("Flotilla".to_string()),
        );
        params.distinguished_name = dn;

        let dns_san = Ia5String::try_from(hostname)
            .map_err(|e| PkiError::InvalidSan(format!("{hostname}: {e}")))?;
        params.subject_alt_names = vec![SanType::DnsName(dns_san)];
        params
            .subject_alt_names
            .extend(addresses.iter().map(|ip| SanType::IpAddress(*ip)));

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        // 10 year validity
        params.not_before = rcgen::date_time_ymd(2024, 1, 1);
        params.not_after = rcgen::date_time_ymd(2034, 1, 1);

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate serving key: {}", e))
        })?;
        let key_pem = key_pair.serialize_pem();

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!(
                "failed to create serving cert: {}",
                e
            ))
        })?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem,
        })
    }
}
