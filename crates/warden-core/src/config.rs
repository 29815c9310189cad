//! GroupWarden configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub welcome: WelcomeConfig,
    #[serde(default)]
    pub inactivity: InactivityConfig,
    #[serde(default)]
    pub groups: GroupDefaultsConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
}

impl WardenConfig {
    /// Load config from the default path (~/.groupwarden/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WardenError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| WardenError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| WardenError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the GroupWarden home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".groupwarden")
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (env-style keys).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("EVOLUTION_API_URL") {
            self.evolution.base_url = url;
        }
        if let Some(instance) = lookup("EVOLUTION_INSTANCE") {
            self.evolution.instance = instance;
        }
        if let Some(key) = lookup("AUTHENTICATION_API_KEY") {
            self.evolution.api_key = key;
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        // Real-world offsets span UTC-12:00 to UTC+14:00.
        if !(-12 * 60..=14 * 60).contains(&self.scheduler.utc_offset_minutes) {
            return Err(WardenError::Config(format!(
                "scheduler.utc_offset_minutes out of range: {}",
                self.scheduler.utc_offset_minutes
            )));
        }
        if self.scheduler.tick_secs == 0 {
            return Err(WardenError::Config("scheduler.tick_secs must be > 0".into()));
        }
        if self.scheduler.group_lane_concurrency == 0 {
            return Err(WardenError::Config(
                "scheduler.group_lane_concurrency must be > 0".into(),
            ));
        }
        if self.welcome.max_batch == 0 {
            return Err(WardenError::Config("welcome.max_batch must be > 0".into()));
        }
        if self.inactivity.warn_batch_size == 0 {
            return Err(WardenError::Config(
                "inactivity.warn_batch_size must be > 0".into(),
            ));
        }
        if self.messaging.min_delay_secs > self.messaging.max_delay_secs {
            return Err(WardenError::Config(
                "messaging.min_delay_secs must be <= messaging.max_delay_secs".into(),
            ));
        }
        Ok(())
    }
}

fn bool_true() -> bool { true }

/// Evolution API (WhatsApp gateway) connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(default = "default_evolution_url")]
    pub base_url: String,
    #[serde(default = "default_evolution_instance")]
    pub instance: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_evolution_url() -> String { "http://localhost:8081".into() }
fn default_evolution_instance() -> String { "groupwarden".into() }
fn default_request_timeout() -> u64 { 30 }

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            base_url: default_evolution_url(),
            instance: default_evolution_instance(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// SQLite database locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_jobs_db_path")]
    pub jobs_path: String,
}

fn default_db_path() -> String { "~/.groupwarden/groups.db".into() }
fn default_jobs_db_path() -> String { "~/.groupwarden/scheduler.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            jobs_path: default_jobs_db_path(),
        }
    }
}

/// Recurring scheduler and dispatch worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the worker checks for due jobs.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Fixed offset group times are expressed in (e.g. -180 for UTC-03:00).
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_sync_cron")]
    pub sync_cron: String,
    #[serde(default = "default_group_lane_concurrency")]
    pub group_lane_concurrency: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_tick_secs() -> u64 { 15 }
fn default_sync_cron() -> String { "0 */6 * * *".into() }
fn default_group_lane_concurrency() -> usize { 4 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            utc_offset_minutes: 0,
            sync_cron: default_sync_cron(),
            group_lane_concurrency: default_group_lane_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

/// Job-level retry for transient handler failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Welcome message batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_quiet_period_ms() -> u64 { 5_000 }
fn default_max_batch() -> usize { 10 }

impl Default for WelcomeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quiet_period_ms: default_quiet_period_ms(),
            max_batch: default_max_batch(),
        }
    }
}

/// Inactivity sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InactivityConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_inactivity_cron")]
    pub cron: String,
    #[serde(default = "default_warn_batch_size")]
    pub warn_batch_size: usize,
}

fn default_inactivity_cron() -> String { "0 12 * * *".into() }
fn default_warn_batch_size() -> usize { 10 }

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_inactivity_cron(),
            warn_batch_size: default_warn_batch_size(),
        }
    }
}

/// Settings applied to groups discovered by sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefaultsConfig {
    #[serde(default = "default_open_time")]
    pub default_open_time: Option<String>,
    #[serde(default = "default_close_time")]
    pub default_close_time: Option<String>,
}

fn default_open_time() -> Option<String> { Some("09:00".into()) }
fn default_close_time() -> Option<String> { Some("17:00".into()) }

impl Default for GroupDefaultsConfig {
    fn default() -> Self {
        Self {
            default_open_time: default_open_time(),
            default_close_time: default_close_time(),
        }
    }
}

/// Outbound message shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Prefix a random greeting and append a random emoji.
    #[serde(default = "bool_true")]
    pub randomize: bool,
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

fn default_min_delay() -> u64 { 1 }
fn default_max_delay() -> u64 { 3 }

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            randomize: true,
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}
