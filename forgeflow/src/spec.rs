//! Typed build specification and canonical hashing.
//!
//! A [`BuildSpec`] is schema-checked at admission: unknown fields are
//! rejected, enumerated fields must come from known sets, and package names
//! must be syntactically valid. The canonical hash is stable under field
//! reordering so semantically identical specs share a cache key.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::errors::OrchestratorError;

/// Distribution bases the engine knows how to build.
pub const KNOWN_BASES: &[&str] = &["arch", "debian", "fedora", "alpine"];

/// CPU architectures the engine knows how to target.
pub const KNOWN_ARCHITECTURES: &[&str] = &["x86_64", "aarch64"];

fn package_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9@._+-]*$").expect("valid package name pattern")
    })
}

/// Declarative description of the system to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BuildSpec {
    /// Distribution base, e.g. "arch".
    pub base: String,
    /// Kernel package, e.g. "linux-zen".
    pub kernel: String,
    /// Init system, e.g. "systemd".
    pub init: String,
    /// Target architecture, e.g. "x86_64".
    pub architecture: String,
    /// Optional display stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayConfig>,
    /// Package selection by category.
    #[serde(default)]
    pub packages: PackageSet,
    /// Requested security hardening features, free-form labels.
    #[serde(default)]
    pub security_features: Vec<String>,
    /// Optional system defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<SystemDefaults>,
}

/// Display stack selection (compositor, bar, launcher, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DisplayConfig {
    /// Display server, e.g. "wayland".
    pub server: String,
    /// Compositor, e.g. "sway".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compositor: Option<String>,
    /// Status bar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar: Option<String>,
    /// Application launcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher: Option<String>,
    /// Terminal emulator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    /// Notification daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<String>,
    /// Lock screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockscreen: Option<String>,
}

/// Packages to install, grouped by category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PackageSet {
    /// System packages.
    #[serde(default)]
    pub system: Vec<String>,
    /// Development tooling.
    #[serde(default)]
    pub dev: Vec<String>,
    /// Security tooling.
    #[serde(default)]
    pub security: Vec<String>,
    /// Utilities.
    #[serde(default)]
    pub utils: Vec<String>,
    /// Media packages.
    #[serde(default)]
    pub media: Vec<String>,
    /// Browsers.
    #[serde(default)]
    pub browsers: Vec<String>,
}

impl PackageSet {
    /// Iterates over every package name in the set.
    pub fn iter_all(&self) -> impl Iterator<Item = &str> {
        self.system
            .iter()
            .chain(&self.dev)
            .chain(&self.security)
            .chain(&self.utils)
            .chain(&self.media)
            .chain(&self.browsers)
            .map(String::as_str)
    }

    /// Total number of packages requested.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter_all().count()
    }

    /// Returns true if no packages were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter_all().next().is_none()
    }
}

/// Tunable system defaults baked into the produced image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SystemDefaults {
    /// vm.swappiness value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swappiness: Option<u8>,
    /// Enable periodic TRIM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<bool>,
    /// Extra kernel command-line parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_params: Option<String>,
    /// Enable DNS over HTTPS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_over_https: Option<bool>,
    /// Enable MAC address randomization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_randomization: Option<bool>,
}

impl BuildSpec {
    /// Parses and validates a spec from raw JSON.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidSpec`] when the JSON does not
    /// match the schema or fails semantic validation.
    pub fn from_json(raw: &Value) -> Result<Self, OrchestratorError> {
        let spec: Self = serde_json::from_value(raw.clone())
            .map_err(|e| OrchestratorError::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validates enumerated fields and package name syntax.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidSpec`] naming the offending field.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if !KNOWN_BASES.contains(&self.base.as_str()) {
            return Err(OrchestratorError::InvalidSpec(format!(
                "unknown base '{}'; expected one of {KNOWN_BASES:?}",
                self.base
            )));
        }
        if !KNOWN_ARCHITECTURES.contains(&self.architecture.as_str()) {
            return Err(OrchestratorError::InvalidSpec(format!(
                "unknown architecture '{}'; expected one of {KNOWN_ARCHITECTURES:?}",
                self.architecture
            )));
        }
        if self.kernel.trim().is_empty() {
            return Err(OrchestratorError::InvalidSpec(
                "kernel must not be empty".to_string(),
            ));
        }
        if self.init.trim().is_empty() {
            return Err(OrchestratorError::InvalidSpec(
                "init must not be empty".to_string(),
            ));
        }

        let re = package_name_regex();
        for pkg in self.packages.iter_all() {
            if !re.is_match(pkg) {
                return Err(OrchestratorError::InvalidSpec(format!(
                    "invalid package name '{pkg}'"
                )));
            }
        }

        Ok(())
    }

    /// Canonical SHA-256 hash of the spec, hex-encoded.
    ///
    /// Serialization goes through a sorted-key JSON form so the hash is
    /// stable under field reordering in the submitted document.
    #[must_use]
    pub fn canonical_hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        let canonical = canonicalize(&value);
        let json = serde_json::to_string(&canonical).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Rebuilds a JSON value with all object keys sorted.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
