//! Engine configuration.
//!
//! Configuration can be built in code or read from YAML:
//!
//! ```yaml
//! port_name: SimulationPort
//! rate: 10.0
//! policy:
//!   kind: delimiter
//!   byte: 10
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::policy::BufferPolicy;

/// Default name of the simulated port.
pub const DEFAULT_PORT_NAME: &str = "SimulationPort";

/// Producer interval used when the rate is not positive.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest producer interval; also the producer's polling granularity.
pub const MIN_TICK: Duration = Duration::from_millis(10);

/// Maps an event rate (Hz) to the producer interval.
///
/// Non-positive (or NaN) rates map to [`DEFAULT_INTERVAL`]. Otherwise the
/// interval is `1000 / rate` milliseconds, truncated, and never shorter
/// than [`MIN_TICK`].
pub fn interval_for_rate(rate: f32) -> Duration {
    if rate.is_nan() || rate <= 0.0 {
        return DEFAULT_INTERVAL;
    }
    // Float to int casts saturate, so an infinite rate lands on 0.
    let millis = (1000.0 / rate) as u64;
    Duration::from_millis(millis).max(MIN_TICK)
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name of the simulated port, used in logs.
    #[serde(default = "default_port_name")]
    pub port_name: String,

    /// Producer firings per second.
    #[serde(default = "default_rate")]
    pub rate: f32,

    /// Initial buffering policy.
    #[serde(default)]
    pub policy: BufferPolicy,
}

fn default_port_name() -> String {
    DEFAULT_PORT_NAME.to_string()
}

fn default_rate() -> f32 {
    1.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port_name: default_port_name(),
            rate: default_rate(),
            policy: BufferPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a config with the given rate and default everything else.
    pub fn with_rate(rate: f32) -> Self {
        Self {
            rate,
            ..Self::default()
        }
    }

    /// Sets the initial buffering policy.
    pub fn policy(mut self, policy: BufferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the port name.
    pub fn port_name(mut self, name: impl Into<String>) -> Self {
        self.port_name = name.into();
        self
    }

    /// Returns the producer interval derived from the rate.
    pub fn interval(&self) -> Duration {
        interval_for_rate(self.rate)
    }

    /// Parses a YAML document.
    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Loads a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }
}
