//! Flotilla aggregated API server - bootstrap and lifecycle layer
//!
//! Flotilla is a multi-cluster control plane. This crate is the bootstrap
//! layer of its aggregated API server: the extension server that serves
//! `Cluster` resources (group `flotilla.dev`) and plugs into the parent
//! control plane.
//!
//! The crate turns composable option groups into a validated, immutable
//! server configuration, wires a loopback client and an informer factory
//! into the admission pipeline, and sequences startup so that background
//! caches start exactly once, after the listener is ready, via a
//! post-start hook. The whole server lifetime is bound to one cancellable
//! execution token.
//!
//! # Startup sequence
//!
//! ```text
//! clap flags → Options (option groups)
//!     → Options::complete()        cross-group defaulting
//!     → Options::validate()        every group, errors aggregated
//!     → Options::config(gates)     defaulting + apply → Config (immutable)
//!     → Config::complete().build() → Server
//!     → add_post_start_hook(START_INFORMERS_HOOK)
//!     → Server::run(shutdown)      serve until the token is cancelled
//! ```
//!
//! # Modules
//!
//! - [`options`] - composable option groups, validation, config assembly
//! - [`server`] - generic server configuration, post-start hooks, run loop
//! - [`informers`] - reflector-backed cache factory
//! - [`admission`] - admission plugin wiring (registry, initializers, chain)
//! - [`api`] - the Cluster resource and the server's resource registry
//! - [`client`] - loopback client construction
//! - [`pki`] - self-signed serving certificate generation
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod admission;
pub mod api;
pub mod client;
pub mod error;
pub mod informers;
pub mod options;
pub mod pki;
pub mod server;

pub use error::{Error, ValidationErrors};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port for the aggregated API server's secure endpoint
///
/// Port 8443 is used instead of 443 to avoid requiring root privileges.
/// A port of 0 asks the kernel for an ephemeral port, which the test
/// suite relies on.
pub const DEFAULT_SECURE_PORT: u16 = 8443;

/// Name of the post-start hook that starts the informer factories.
///
/// The name is stable: it appears as `poststarthook/<name>` in the
/// server's readiness diagnostics and downstream tooling keys on it.
pub const START_INFORMERS_HOOK: &str = "start-flotilla-informers";
