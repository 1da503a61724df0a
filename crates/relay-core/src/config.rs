use crate::error::Result;
use crate::name::Name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Permissions that satisfy `require_auth(actor)`.
    #[serde(default = "default_satisfying_permissions")]
    pub satisfying_permissions: Vec<Name>,
}

fn default_satisfying_permissions() -> Vec<Name> {
    vec![Name::literal("owner"), Name::literal("active")]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            satisfying_permissions: default_satisfying_permissions(),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Permission attached to a root action submitted without authorization,
    /// and assumed for `actor` strings without an `@permission` suffix.
    #[serde(default = "default_permission")]
    pub default_permission: Name,
    /// Log each work item's console output at info level as it completes.
    #[serde(default)]
    pub echo_console: bool,
}

fn default_permission() -> Name {
    Name::literal("active")
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_permission: default_permission(),
            echo_console: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ChainConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Initial value of the chain clock.
    #[serde(default)]
    pub genesis_time: DateTime<Utc>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            genesis_time: DateTime::<Utc>::default(),
            auth: AuthConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ChainConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("unknown config version {}", self.version),
            });
        }

        if self.auth.satisfying_permissions.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "auth.satisfying_permissions is empty: require_auth can never succeed"
                    .to_string(),
            });
        } else if !self
            .auth
            .satisfying_permissions
            .contains(&self.dispatch.default_permission)
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "default permission '{}' does not satisfy require_auth",
                    self.dispatch.default_permission
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
