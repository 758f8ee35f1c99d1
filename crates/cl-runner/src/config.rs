//! Runner configuration.
//!
//! Defaults suit a single in-order queue on the first device of the first
//! platform. [`RunnerConfig::from_env`] overlays the `CL_RUNNER_*`
//! environment variables on top of the defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OpenClError, Result};

/// Enables `CL_QUEUE_PROFILING_ENABLE` on the command queue (`1` / `true`).
pub const ENV_PROFILING: &str = "CL_RUNNER_PROFILING";
/// Compiler options prefixed to every `compile_kernels` call.
pub const ENV_BUILD_OPTIONS: &str = "CL_RUNNER_BUILD_OPTIONS";
/// Device selection as `<platform>:<device>`.
pub const ENV_DEVICE: &str = "CL_RUNNER_DEVICE";
/// Upper bound in bytes on host copies held for non-blocking writes.
pub const ENV_MAX_STAGED_BYTES: &str = "CL_RUNNER_MAX_STAGED_BYTES";

/// Default for [`RunnerConfig::max_staged_bytes`] (64 MiB).
pub const DEFAULT_MAX_STAGED_BYTES: usize = 64 << 20;

/// Position of a device in a [`Catalog`](crate::catalog::Catalog).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelector {
    pub platform_index: usize,
    pub device_index: usize,
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform_index, self.device_index)
    }
}

impl FromStr for DeviceSelector {
    type Err = OpenClError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            OpenClError::InvalidArgument(format!(
                "device selector '{s}' must look like <platform>:<device>"
            ))
        };
        let (platform, device) = s.trim().split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            platform_index: platform.trim().parse().map_err(|_| invalid())?,
            device_index: device.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Configuration for [`Runner`](crate::Runner) construction and compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Create the queue with profiling enabled. Execution stays in-order.
    pub profiling: bool,
    /// Options prepended to the per-call compiler options.
    pub build_options: Option<String>,
    /// Device used by [`Runner::from_catalog`](crate::Runner::from_catalog).
    pub device: DeviceSelector,
    /// Staged bytes a non-blocking write may add before the queue is
    /// drained. A single larger write is still staged on its own.
    pub max_staged_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            profiling: false,
            build_options: None,
            device: DeviceSelector::default(),
            max_staged_bytes: DEFAULT_MAX_STAGED_BYTES,
        }
    }
}

impl RunnerConfig {
    /// Defaults overlaid with `CL_RUNNER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `CL_RUNNER_*` environment variables onto this configuration.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_PROFILING) {
            self.profiling = parse_flag(ENV_PROFILING, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_BUILD_OPTIONS) {
            let value = value.trim();
            self.build_options = (!value.is_empty()).then(|| value.to_owned());
        }
        if let Ok(value) = std::env::var(ENV_DEVICE) {
            self.device = value.parse()?;
        }
        if let Ok(value) = std::env::var(ENV_MAX_STAGED_BYTES) {
            self.max_staged_bytes = value.trim().parse().map_err(|_| {
                OpenClError::InvalidArgument(format!(
                    "{ENV_MAX_STAGED_BYTES}={value} is not a byte count"
                ))
            })?;
        }
        Ok(())
    }

    /// Combine the configured prefix with per-call options.
    pub fn compiler_options(&self, options: &str) -> String {
        let options = options.trim();
        match self.build_options.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() && !options.is_empty() => {
                format!("{prefix} {options}")
            }
            Some(prefix) if !prefix.is_empty() => prefix.to_owned(),
            _ => options.to_owned(),
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(OpenClError::InvalidArgument(format!("{name}={other} is not a boolean"))),
    }
}
