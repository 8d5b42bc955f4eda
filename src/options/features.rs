//! Feature gates
//!
//! Gates are resolved once, at the process edge, into a plain
//! [`FeatureGates`] map that is passed explicitly into config assembly.
//! The default table below is the only process-wide registry; nothing in
//! the core reads it directly.

use std::collections::BTreeMap;

use clap::Args;

use crate::error::ValidationError;

/// Gate controlling whether storage list reads use chunked/paginated
/// requests
pub const API_LIST_CHUNKING: &str = "APIListChunking";

/// Known gates with their default state
const DEFAULT_GATES: &[(&str, bool)] = &[(API_LIST_CHUNKING, true)];

/// A resolved set of named feature gates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureGates {
    gates: BTreeMap<String, bool>,
}

impl FeatureGates {
    /// The default gate table
    pub fn defaults() -> Self {
        Self {
            gates: DEFAULT_GATES
                .iter()
                .map(|(name, enabled)| (name.to_string(), *enabled))
                .collect(),
        }
    }

    /// Whether the named gate is enabled; unknown gates are disabled
    pub fn enabled(&self, name: &str) -> bool {
        self.gates.get(name).copied().unwrap_or(false)
    }

    /// Set a known gate
    ///
    /// Returns `false` when the gate name is unknown, leaving the set
    /// unchanged.
    pub fn set(&mut self, name: &str, enabled: bool) -> bool {
        match self.gates.get_mut(name) {
            Some(slot) => {
                *slot = enabled;
                true
            }
            None => false,
        }
    }
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Process-wide feature gate flags
#[derive(Args, Clone, Debug, Default, PartialEq)]
pub struct FeatureOptions {
    /// Feature gate overrides as name=bool pairs
    #[arg(
        long = "feature-gates",
        value_name = "NAME=BOOL",
        value_delimiter = ','
    )]
    pub overrides: Vec<String>,
}

impl FeatureOptions {
    /// Validate the override syntax and gate names
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errs = Vec::new();
        let known = FeatureGates::defaults();
        for entry in &self.overrides {
            match parse_override(entry) {
                Some((name, _)) if !known.gates.contains_key(name) => {
                    errs.push(ValidationError::new(
                        "feature-gates",
                        format!("unknown feature gate {name:?}"),
                    ));
                }
                Some(_) => {}
                None => {
                    errs.push(ValidationError::new(
                        "feature-gates",
                        format!("malformed override {entry:?}, expected NAME=BOOL"),
                    ));
                }
            }
        }
        errs
    }

    /// Resolve the defaults plus these overrides into a gate set
    ///
    /// Assumes [`validate`](Self::validate) passed; malformed entries
    /// are skipped here rather than re-reported.
    pub fn resolve(&self) -> FeatureGates {
        let mut gates = FeatureGates::defaults();
        for entry in &self.overrides {
            if let Some((name, enabled)) = parse_override(entry) {
                gates.set(name, enabled);
            }
        }
        gates
    }
}

fn parse_override(entry: &str) -> Option<(&str, bool)> {
    let (name, value) = entry.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    match value.trim() {
        "true" => Some((name, true)),
        "false" => Some((name, false)),
        _ => None,
    }
}
