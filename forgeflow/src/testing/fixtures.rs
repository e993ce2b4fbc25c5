//! Spec fixtures for tests.

use crate::spec::{BuildSpec, PackageSet};

/// A minimal valid build spec.
#[must_use]
pub fn minimal_spec() -> BuildSpec {
    BuildSpec {
        base: "arch".to_string(),
        kernel: "linux-zen".to_string(),
        init: "systemd".to_string(),
        architecture: "x86_64".to_string(),
        display: None,
        packages: PackageSet {
            system: vec!["btop".to_string()],
            dev: vec!["git".to_string()],
            ..PackageSet::default()
        },
        security_features: Vec::new(),
        defaults: None,
    }
}

/// The minimal spec as the raw JSON payload a client would submit.
#[must_use]
pub fn minimal_spec_json() -> serde_json::Value {
    serde_json::to_value(minimal_spec()).unwrap_or_default()
}

/// A minimal spec with a different kernel, producing a distinct
/// canonical hash.
#[must_use]
pub fn spec_with_kernel(kernel: &str) -> BuildSpec {
    BuildSpec {
        kernel: kernel.to_string(),
        ..minimal_spec()
    }
}
