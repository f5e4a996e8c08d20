//! Configuration loading.
//!
//! Settings come from an optional TOML file overlaid with `OCLINK_`-prefixed
//! environment variables, using the `config` crate.
//!
//! ```ignore
//! use oclink_core::config::OclinkConfig;
//!
//! let config = OclinkConfig::load("oclink.toml")?;
//! let loader = KernelSourceLoader::from_config(&config);
//! ```

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OclinkConfig {
    /// Directory holding kernel sources.
    #[serde(default = "default_kernel_root")]
    pub kernel_root: PathBuf,

    /// Fallback include directory, relative to `kernel_root`.
    #[serde(default = "default_include_dir")]
    pub include_dir: PathBuf,

    /// Kernel source file extension.
    #[serde(default = "default_kernel_extension")]
    pub kernel_extension: String,

    /// Whether new variables use blocking transfers.
    #[serde(default = "default_true")]
    pub blocking_transfers: bool,

    /// Whether dispatch groups hold device-memory locks while running.
    #[serde(default)]
    pub block_variables: bool,

    /// Whether argument uploads wait for the queue to drain.
    #[serde(default = "default_true")]
    pub sync_upload: bool,

    /// Maximum nesting of `#include` directives.
    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,

    /// Index of the device to use.
    #[serde(default)]
    pub device_index: usize,

    /// Backend to use (auto, cpu, opencl).
    #[serde(default = "default_backend")]
    pub backend: String,
}

fn default_kernel_root() -> PathBuf {
    PathBuf::from("opencl")
}

fn default_include_dir() -> PathBuf {
    PathBuf::from("include")
}

fn default_kernel_extension() -> String {
    "cl".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_include_depth() -> usize {
    32
}

fn default_backend() -> String {
    "auto".to_string()
}

impl Default for OclinkConfig {
    fn default() -> Self {
        Self {
            kernel_root: default_kernel_root(),
            include_dir: default_include_dir(),
            kernel_extension: default_kernel_extension(),
            blocking_transfers: true,
            block_variables: false,
            sync_upload: true,
            max_include_depth: default_max_include_depth(),
            device_index: 0,
            backend: default_backend(),
        }
    }
}

impl OclinkConfig {
    /// Load from a TOML file, overlaid with environment variables.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("OCLINK"))
            .build()?
            .try_deserialize()
    }

    /// Load from an optional file, falling back to defaults and the environment.
    pub fn load_optional<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::from_env(),
        }
    }

    /// Load from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("OCLINK"))
            .build()?
            .try_deserialize()
    }

    /// Parse a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Check the values for consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_include_depth == 0 {
            return Err("max_include_depth must be greater than 0".to_string());
        }
        if self.kernel_extension.is_empty() {
            return Err("kernel_extension must not be empty".to_string());
        }
        let valid_backends = ["auto", "cpu", "opencl"];
        if !valid_backends.contains(&self.backend.as_str()) {
            return Err(format!(
                "Invalid backend '{}'. Valid options: {:?}",
                self.backend, valid_backends
            ));
        }
        Ok(())
    }
}
