//! Environment-driven webhook configuration
//!
//! All lookups go through [`EnvSource`] so the bootstrap can be driven by the
//! process environment in production and by a plain map in tests.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::constants::{
    CONTROLLER_SELECTOR_KEY, CONTROLLER_SELECTOR_VALUE, DEFAULT_CERT_DIR, DEFAULT_NAMESPACE,
    DEFAULT_WEBHOOK_PORT, NAMESPACE_ENV_KEY, RUN_ON_BOSH_ENV_KEY, WEBHOOK_CERT_DIR_ENV_KEY,
    WEBHOOK_PORT_ENV_KEY, WEBHOOK_SERVICE_NAME,
};
use crate::error::{Error, Result};

/// Source of environment variables
pub trait EnvSource {
    /// Value of `key`, or `None` when unset
    fn var(&self, key: &str) -> Option<String>;

    fn is_set(&self, key: &str) -> bool {
        self.var(key).is_some()
    }
}

/// The real process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        // A set but non-UTF-8 value still counts as set.
        std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Describes the Kubernetes Service fronting the webhook server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceBinding {
    pub namespace: String,
    pub name: String,
    /// Selectors for the pod that runs this webhook server
    pub selectors: BTreeMap<String, String>,
}

/// Build the Service binding unless the operator runs outside the cluster
pub fn service_binding(env: &impl EnvSource) -> Option<ServiceBinding> {
    if env.is_set(RUN_ON_BOSH_ENV_KEY) {
        return None;
    }

    let namespace = env
        .var(NAMESPACE_ENV_KEY)
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    Some(ServiceBinding {
        namespace,
        name: WEBHOOK_SERVICE_NAME.to_string(),
        selectors: BTreeMap::from([(
            CONTROLLER_SELECTOR_KEY.to_string(),
            CONTROLLER_SELECTOR_VALUE.to_string(),
        )]),
    })
}

/// Listen port from `WEBHOOK_PORT`, or the default
pub fn webhook_port(env: &impl EnvSource) -> Result<u16> {
    match env.var(WEBHOOK_PORT_ENV_KEY) {
        None => Ok(DEFAULT_WEBHOOK_PORT),
        Some(value) => value
            .parse::<u16>()
            .map_err(|source| Error::InvalidPort { value, source }),
    }
}

/// Certificate directory from `WEBHOOK_CERT_DIR`, or `/tmp/cert`.
///
/// A set but empty value is rejected rather than resolving to the working
/// directory.
pub fn cert_dir(env: &impl EnvSource) -> Result<PathBuf> {
    match env.var(WEBHOOK_CERT_DIR_ENV_KEY) {
        None => Ok(PathBuf::from(DEFAULT_CERT_DIR)),
        Some(value) if value.trim().is_empty() => Err(Error::ConfigError(format!(
            "{WEBHOOK_CERT_DIR_ENV_KEY} is set but empty"
        ))),
        Some(value) => Ok(PathBuf::from(value)),
    }
}
