use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Process-wide engine configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Token-bucket rates per operation class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_read_tps")]
    pub read_tokens_per_second: f64,
    #[serde(default = "default_write_tps")]
    pub write_tokens_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_tokens_per_second: default_read_tps(),
            write_tokens_per_second: default_write_tps(),
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    /// Global cap on concurrently outstanding Gmail calls
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Items per batch chunk; Gmail's hard limit is 1000, keep conservative
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            batch_size: default_batch_size(),
            default_timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Location of the persisted rule document
    #[serde(default = "default_rules_path")]
    pub path: PathBuf,
    /// Optional cap on messages scanned per apply_rules invocation
    #[serde(default)]
    pub default_scan_limit: Option<usize>,
    /// Window applied when neither all_mail nor explicit bounds are given
    #[serde(default = "default_date_window_days")]
    pub default_date_window_days: u32,
    #[serde(default = "default_apply_rules_timeout_ms")]
    pub apply_rules_timeout_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
            default_scan_limit: None,
            default_date_window_days: default_date_window_days(),
            apply_rules_timeout_ms: default_apply_rules_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_hours")]
    pub ttl_hours: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_session_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools with phase <= current_phase are exposed to clients
    #[serde(default = "default_current_phase")]
    pub current_phase: u8,
    /// Per-call deadline for ordinary tools
    #[serde(default = "default_tool_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_require_confirmation")]
    pub require_confirmation_for_destructive: bool,
    /// Performance targets per phase; informational, exceedances are logged
    #[serde(default)]
    pub phase_targets: Vec<PhaseTarget>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            current_phase: default_current_phase(),
            default_timeout_ms: default_tool_timeout_ms(),
            require_confirmation_for_destructive: default_require_confirmation(),
            phase_targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTarget {
    pub phase: u8,
    pub max_response_ms: u64,
    pub max_error_rate: f64,
}

fn default_read_tps() -> f64 {
    10.0
}

fn default_write_tps() -> f64 {
    5.0
}

fn default_burst() -> f64 {
    20.0
}

fn default_max_in_flight() -> usize {
    16
}

fn default_batch_size() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("rules.json")
}

fn default_date_window_days() -> u32 {
    30
}

fn default_apply_rules_timeout_ms() -> u64 {
    600_000
}

fn default_session_ttl_hours() -> u64 {
    24
}

fn default_current_phase() -> u8 {
    3
}

fn default_tool_timeout_ms() -> u64 {
    120_000
}

fn default_require_confirmation() -> bool {
    true
}

impl EngineConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config file: {e}")))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {e}")))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.read_tokens_per_second <= 0.0
            || self.rate_limit.write_tokens_per_second <= 0.0
        {
            return Err(EngineError::Config(
                "rate_limit token rates must be positive".to_string(),
            ));
        }
        if self.rate_limit.burst < 1.0 {
            return Err(EngineError::Config(
                "rate_limit.burst must be at least 1".to_string(),
            ));
        }
        if self.gmail.max_in_flight == 0 {
            return Err(EngineError::Config(
                "gmail.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.gmail.batch_size == 0 || self.gmail.batch_size > 1000 {
            return Err(EngineError::Config(
                "gmail.batch_size must be in 1..=1000".to_string(),
            ));
        }
        if self.tools.current_phase == 0 {
            return Err(EngineError::Config(
                "tools.current_phase must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
