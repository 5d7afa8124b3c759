//! Declarative controller-registration and retry-configuration surfaces.
//!
//! These structs are part of the public API but this crate ships no
//! file/environment loader for them — embedding the loading of either
//! remains the concrete operator binary's concern, matching the separation
//! between `svc::cfg` (loading) and the reconciler types that merely consume
//! a `Configuration` once built.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::GenericRetry;

/// Either a single watched namespace, or every namespace in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceFilter {
    All,
    Named(String),
}

impl Default for NamespaceFilter {
    fn default() -> Self {
        Self::All
    }
}

/// A controller's declarative registration:
/// `{crdName, customResourceClass, generationAware, finalizer}` shape. The
/// `customResourceClass` field from the source surface is represented by the
/// Rust type parameter a controller is registered against rather than by a
/// runtime value, so it is not carried here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerRegistration {
    pub crd_name: String,
    pub generation_aware: bool,
    pub finalizer: Option<String>,
    pub namespace_filter: NamespaceFilter,
}

impl Default for ControllerRegistration {
    fn default() -> Self {
        Self {
            crd_name: String::new(),
            generation_aware: true,
            finalizer: None,
            namespace_filter: NamespaceFilter::All,
        }
    }
}

impl ControllerRegistration {
    pub fn new(crd_name: impl Into<String>) -> Self {
        Self {
            crd_name: crd_name.into(),
            ..Self::default()
        }
    }

    /// The finalizer name this registration resolves to: the declared
    /// override, or `"<crdName>/finalizer"` by default.
    pub fn resolved_finalizer(&self) -> String {
        self.finalizer
            .clone()
            .unwrap_or_else(|| format!("{}/finalizer", self.crd_name))
    }
}

/// The retry configuration surface; any subset may be
/// overridden, with defaults chosen to bound retries to a few minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,
    pub interval_multiplier: f64,
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = GenericRetry::default();
        Self {
            initial_interval: defaults.initial_interval,
            interval_multiplier: defaults.interval_multiplier,
            max_interval: defaults.max_interval,
            max_attempts: defaults.max_attempts,
            max_elapsed_time: defaults.max_elapsed_time,
        }
    }
}

impl From<RetryConfig> for GenericRetry {
    fn from(config: RetryConfig) -> Self {
        GenericRetry {
            initial_interval: config.initial_interval,
            interval_multiplier: config.interval_multiplier,
            max_interval: config.max_interval,
            max_attempts: config.max_attempts,
            max_elapsed_time: config.max_elapsed_time,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
