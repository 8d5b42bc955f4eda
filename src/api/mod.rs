//! The Cluster resource and the server's resource registry
//!
//! The aggregated API server serves the `flotilla.dev` group. The
//! [`ResourceRegistry`] is the type table config assembly threads through
//! the generic server configuration, and the [`MultiGroupVersioner`]
//! pins every kind of the group onto one storage group-version so that
//! objects at rest stay decodable across served-version bumps.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// API group served by the aggregated server
pub const GROUP: &str = "flotilla.dev";

/// Version of the group currently served
pub const VERSION: &str = "v1alpha1";

/// How a member cluster synchronizes with the control plane
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SyncMode {
    /// The control plane pushes state to the member cluster
    #[default]
    Push,
    /// An agent on the member cluster pulls state from the control plane
    Pull,
}

/// Specification of a member cluster registered with the control plane
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "flotilla.dev",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.syncMode"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// URL of the member cluster's API server
    pub api_endpoint: String,

    /// How the member cluster synchronizes with the control plane
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Name of the secret holding credentials for the member cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

/// Observed state of a member cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Kubernetes version reported by the member cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Standard conditions (Ready, Reachable, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// An API group paired with one of its versions, e.g. `flotilla.dev/v1alpha1`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupVersion {
    /// API group name; empty for the core group
    pub group: String,
    /// Version within the group
    pub version: String,
}

impl GroupVersion {
    /// Create a group-version pair
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// Maps every kind of a set of API groups onto one storage group-version
///
/// This is the resource encoding policy the storage option group carries:
/// whatever version a Cluster object arrives in, it is encoded for
/// storage at the target group-version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiGroupVersioner {
    target: GroupVersion,
    groups: Vec<String>,
}

impl MultiGroupVersioner {
    /// Create a versioner encoding the given groups at `target`
    pub fn new(target: GroupVersion, groups: Vec<String>) -> Self {
        Self { target, groups }
    }

    /// The versioner for the flotilla.dev group at its current storage version
    pub fn flotilla_default() -> Self {
        Self::new(
            GroupVersion::new(GROUP, VERSION),
            vec![GROUP.to_string()],
        )
    }

    /// Storage encoding version for a kind of the given group, or `None`
    /// if the group is not covered by this versioner
    pub fn encode_version_for(&self, group: &str) -> Option<&GroupVersion> {
        if self.groups.iter().any(|g| g == group) {
            Some(&self.target)
        } else {
            None
        }
    }
}

/// The server's type table: which group, versions, and kinds it serves
///
/// Stands in for a full scheme/codec registry; config assembly threads it
/// into the generic server configuration, and storage wiring consults it
/// for the served kinds.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRegistry {
    /// API group served by this server
    pub group: String,
    /// Served versions, preferred first
    pub versions: Vec<String>,
    /// Kinds served within the group
    pub kinds: Vec<String>,
}

impl ResourceRegistry {
    /// The registry for the aggregated server's flotilla.dev group
    pub fn flotilla() -> Self {
        Self {
            group: GROUP.to_string(),
            versions: vec![VERSION.to_string()],
            kinds: vec!["Cluster".to_string()],
        }
    }
}
