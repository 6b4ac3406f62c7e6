#![allow(clippy::doc_markdown)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::extensions::ConflictPolicy;

/// Top-level host configuration for the plugin runtime.
///
/// Loaded from `plugin_node.toml` in the project root or a user-specified
/// path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runtime profile: strict, balanced, or legacy-risky.
    pub profile: Profile,

    /// Host version advertised to bundles for `min_host_version` gating.
    pub host_version: String,

    /// Directories scanned for bundle artifacts.
    pub bundle_search_paths: Vec<PathBuf>,

    /// Base directory under which each bundle gets a sandboxed data dir.
    pub base_data_directory: PathBuf,

    /// Path to the revocation list JSON file.
    pub revocation_list_path: PathBuf,

    /// Signature/publisher trust policy.
    pub trust: TrustConfig,

    /// Extension Registry conflict resolution policy.
    pub conflict_policy: ConflictPolicy,

    /// Ad hoc host flags, including `plugin.hotreload`.
    pub host_flags: std::collections::HashMap<String, String>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_profile(Profile::Balanced)
    }
}

impl Config {
    /// Create a configuration for a specific profile with appropriate
    /// defaults.
    #[must_use]
    pub fn for_profile(profile: Profile) -> Self {
        let shared = Self {
            profile,
            host_version: "1.0.0".to_string(),
            bundle_search_paths: vec![PathBuf::from("bundles")],
            base_data_directory: PathBuf::from("data/bundles"),
            revocation_list_path: PathBuf::from("revocations.json"),
            trust: TrustConfig::default(),
            conflict_policy: ConflictPolicy::default(),
            host_flags: std::collections::HashMap::new(),
            observability: ObservabilityConfig {
                namespace: "plugin_runtime".to_string(),
                emit_structured_events: true,
            },
        };

        match profile {
            Profile::Strict => Self {
                trust: TrustConfig {
                    require_signature: true,
                    trust_only: true,
                    trusted_publishers: Vec::new(),
                },
                ..shared
            },
            Profile::Balanced => Self {
                trust: TrustConfig {
                    require_signature: true,
                    trust_only: false,
                    trusted_publishers: Vec::new(),
                },
                ..shared
            },
            Profile::LegacyRisky => Self {
                trust: TrustConfig::default(),
                observability: ObservabilityConfig {
                    namespace: shared.observability.namespace.clone(),
                    emit_structured_events: false,
                },
                ..shared
            },
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.into(), e))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(path.into(), e))
    }

    /// Discover and load configuration from well-known locations.
    ///
    /// Search order:
    /// 1. Explicit path (if provided)
    /// 2. `./plugin_node.toml` (project root)
    /// 3. `~/.config/plugin-node/config.toml` (user)
    ///
    /// Returns the default balanced profile if no config file is found.
    pub fn discover(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let mut candidates: Vec<PathBuf> = vec![PathBuf::from("plugin_node.toml")];
        if let Some(config_path) = xdg_config_dir().map(|d| d.join("config.toml")) {
            candidates.push(config_path);
        }

        for candidate in &candidates {
            if candidate.exists() {
                return Self::load(candidate);
            }
        }

        Ok(Self::default())
    }

    /// Serialize this configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    #[must_use]
    pub fn hotreload_enabled(&self) -> bool {
        self.host_flags.get("plugin.hotreload").map(String::as_str) == Some("true")
    }

    pub fn trust_policy(&self) -> crate::signature::TrustPolicy {
        crate::signature::TrustPolicy {
            require_signature: self.trust.require_signature,
            trust_only: self.trust.trust_only,
            trusted_publishers: self.trust.trusted_publishers.clone(),
        }
    }
}

fn xdg_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| {
                let mut p = PathBuf::from(home);
                p.push(".config");
                p
            })
        })
        .map(|d| d.join("plugin-node"))
}

// -- Profile --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    Strict,
    Balanced,
    LegacyRisky,
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Balanced => write!(f, "balanced"),
            Self::LegacyRisky => write!(f, "legacy-risky"),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "balanced" => Ok(Self::Balanced),
            "legacy-risky" => Ok(Self::LegacyRisky),
            _ => Err(ConfigError::InvalidProfile(s.to_string())),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::Balanced
    }
}

// -- Trust --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    pub require_signature: bool,
    pub trust_only: bool,
    pub trusted_publishers: Vec<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            require_signature: false,
            trust_only: false,
            trusted_publishers: Vec::new(),
        }
    }
}

// -- Observability --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Stable metrics/tracing namespace for automation.
    pub namespace: String,
    /// Emit structured audit events for lifecycle transitions.
    pub emit_structured_events: bool,
}

// -- Errors --

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(toml::ser::Error),

    #[error("invalid profile: {0} (expected: strict, balanced, legacy-risky)")]
    InvalidProfile(String),
}

impl ConfigError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReadFailed(..) => "PLUGIN_CONFIG_READ_FAILED",
            Self::ParseFailed(..) => "PLUGIN_CONFIG_PARSE_FAILED",
            Self::SerializeFailed(_) => "PLUGIN_CONFIG_SERIALIZE_FAILED",
            Self::InvalidProfile(_) => "PLUGIN_CONFIG_INVALID_PROFILE",
        }
    }
}
