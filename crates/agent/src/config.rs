//! TOML-backed configuration surface: the knobs a deployment sets once
//! per agent template — iteration/concurrency bounds, permission policy,
//! retry policy, event buffer size, idle eviction, model selection, and the
//! on-disk store root. No process-wide mutable state is required beyond
//! what [`crate::pool::AgentPool`] and this config hold.

use crate::dispatcher::{PermissionMode, ToolPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_ITERATIONS: usize = 50;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_IDLE_TTL_SECS: u64 = 300;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;
pub const DEFAULT_RETRY_CAP_MS: u64 = 8000;

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
fn default_idle_ttl_secs() -> u64 {
    DEFAULT_IDLE_TTL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
}

fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}
fn default_retry_cap_ms() -> u64 {
    DEFAULT_RETRY_CAP_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_ms: DEFAULT_RETRY_BASE_MS,
            cap_ms: DEFAULT_RETRY_CAP_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPermissionConfig {
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub deny_tools: Vec<String>,
    #[serde(default)]
    pub require_approval_tools: Vec<String>,
    #[serde(default)]
    pub mode: PermissionMode,
}

impl ToolPermissionConfig {
    pub fn to_tool_policy(&self, concurrency: usize) -> ToolPolicy {
        ToolPolicy {
            allow_tools: self.allow_tools.clone(),
            deny_tools: self.deny_tools.clone(),
            require_approval_tools: self.require_approval_tools.clone(),
            mode: self.mode,
            concurrency,
        }
    }
}

/// One agent template's full configuration, as loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    #[serde(default)]
    pub permissions: ToolPermissionConfig,
    #[serde(default)]
    pub retry: RetryConfig,

    /// Root directory under which `<store_root>/<agentId>/...` is laid out.
    pub store_root: PathBuf,
}

impl AgentConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file at {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file at {}", path.display()))
    }

    pub fn default_store_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("atrium")
            .join("agents")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let toml_text = r#"
            model = "test-model"
            store_root = "/tmp/atrium"
        "#;
        let config: AgentConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.retry.max_attempts, DEFAULT_RETRY_MAX_ATTEMPTS);
        assert_eq!(config.permissions.mode, PermissionMode::Auto);
    }

    #[test]
    fn explicit_permission_mode_overrides_default() {
        let toml_text = r#"
            model = "test-model"
            store_root = "/tmp/atrium"

            [permissions]
            mode = "readonly"
            deny_tools = ["fs_rm"]
        "#;
        let config: AgentConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.permissions.mode, PermissionMode::Readonly);
        assert_eq!(config.permissions.deny_tools, vec!["fs_rm".to_string()]);
    }
}
