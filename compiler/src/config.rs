//! Inliner configuration
//!
//! One immutable `InliningConfig` is built per compiler instance and passed by
//! reference to every stage. It can be loaded from the `[inlining]` table of a
//! TOML document; missing keys take their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Compilation pipeline the inliner runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerMode {
    #[default]
    Jit,
    Aot,
}

/// Target features recognized-method templates depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub can_unbox_doubles: bool,
    pub can_unbox_simd128: bool,
    pub can_inline_recognized: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_unbox_doubles: true,
            can_unbox_simd128: true,
            can_inline_recognized: true,
        }
    }
}

/// Numeric knobs of the admission heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InliningConfig {
    pub enabled: bool,
    pub mode: CompilerMode,
    pub capabilities: Capabilities,

    /// Callee instruction count accepted without further conditions
    pub size_threshold: u32,
    /// Callee call-site count accepted without further conditions
    pub callee_call_sites_threshold: u32,
    pub getter_setter_size_threshold: u32,
    pub operator_size_threshold: u32,
    /// Deepest inlining level (call sites of depth `depth_threshold + 1`
    /// are the last ones considered)
    pub depth_threshold: u32,
    pub recursion_depth_threshold: u32,
    /// Caller growth ceiling, in inlined instructions
    pub caller_size_threshold: u32,
    /// Sites below this percentage of the hottest site are too cold
    pub hotness_percent: u32,
    pub max_call_sites_per_depth: usize,
    pub max_polymorphic_checks: usize,
    /// Deoptimization count at which a callee is never inlined again
    pub deopt_threshold: u32,
    pub constant_arguments_count: u32,
    pub constant_arguments_min_size_threshold: u32,
    pub constant_arguments_max_size_threshold: u32,
    /// Cold sites are still inlined when the callee is a leaf this small
    pub small_leaf_size_threshold: u32,
}

impl Default for InliningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: CompilerMode::Jit,
            capabilities: Capabilities::default(),
            size_threshold: 25,
            callee_call_sites_threshold: 1,
            getter_setter_size_threshold: 10,
            operator_size_threshold: 10,
            depth_threshold: 6,
            recursion_depth_threshold: 1,
            caller_size_threshold: 50_000,
            hotness_percent: 10,
            max_call_sites_per_depth: 500,
            max_polymorphic_checks: 4,
            deopt_threshold: 12,
            constant_arguments_count: 1,
            constant_arguments_min_size_threshold: 60,
            constant_arguments_max_size_threshold: 200,
            small_leaf_size_threshold: 50,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {knob}: {reason}")]
    Invalid { knob: &'static str, reason: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    inlining: InliningConfig,
}

impl InliningConfig {
    /// AOT configuration with default thresholds
    pub fn aot() -> Self {
        Self {
            mode: CompilerMode::Aot,
            ..Self::default()
        }
    }

    /// Parse the `[inlining]` table of a TOML document and validate it
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument = toml::from_str(input)?;
        document.inlining.validate()?;
        Ok(document.inlining)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let document = ConfigDocument {
            inlining: self.clone(),
        };
        Ok(toml::to_string_pretty(&document)?)
    }

    /// Reject knob combinations the heuristics cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hotness_percent > 100 {
            return Err(ConfigError::Invalid {
                knob: "hotness_percent",
                reason: format!("{} exceeds 100", self.hotness_percent),
            });
        }
        if self.max_call_sites_per_depth == 0 {
            return Err(ConfigError::Invalid {
                knob: "max_call_sites_per_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.constant_arguments_min_size_threshold > self.constant_arguments_max_size_threshold {
            return Err(ConfigError::Invalid {
                knob: "constant_arguments_min_size_threshold",
                reason: format!(
                    "{} exceeds the max threshold {}",
                    self.constant_arguments_min_size_threshold,
                    self.constant_arguments_max_size_threshold
                ),
            });
        }
        if self.size_threshold > self.constant_arguments_max_size_threshold {
            return Err(ConfigError::Invalid {
                knob: "size_threshold",
                reason: format!(
                    "{} exceeds constant_arguments_max_size_threshold",
                    self.size_threshold
                ),
            });
        }
        if self.recursion_depth_threshold > self.depth_threshold {
            return Err(ConfigError::Invalid {
                knob: "recursion_depth_threshold",
                reason: "cannot exceed depth_threshold".to_string(),
            });
        }
        Ok(())
    }
}
