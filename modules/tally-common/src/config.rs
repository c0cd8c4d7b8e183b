use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::scoring::ScoringRules;

/// Secrets and environment-specific values. Everything else lives in the
/// TOML [`FileConfig`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bearer_token: String,
    pub api_base_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            bearer_token: std::env::var("X_BEARER_TOKEN")
                .context("X_BEARER_TOKEN environment variable is required")?,
            api_base_url: std::env::var("X_API_BASE_URL").ok(),
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  X_BEARER_TOKEN: {}", preview(&self.bearer_token));
        tracing::info!(
            "  X_API_BASE_URL: {}",
            self.api_base_url.as_deref().unwrap_or("<default>")
        );
    }
}

/// First few characters of a secret, safe to log.
fn preview(val: &str) -> String {
    let head: String = val.chars().take(5).collect();
    format!("{}...({} chars)", head, val.chars().count())
}

/// TOML-backed configuration loaded from disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub target: TargetConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub scoring: ScoringRules,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// The account whose engagement is being tallied.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub user_id: String,
    pub handle: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Every other path is resolved relative to this directory.
    pub data_dir: PathBuf,
    pub dataset: PathBuf,
    pub cutoffs: PathBuf,
    pub memo: PathBuf,
    /// JSON document of the latest run's regex rejects. Per-filter CSVs are
    /// written next to it.
    pub discarded: PathBuf,
    pub discarded_mentions: PathBuf,
    pub backups: PathBuf,
    pub reports: PathBuf,
}

impl PathsConfig {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn dataset(&self) -> PathBuf {
        self.resolve(&self.dataset)
    }

    pub fn cutoffs(&self) -> PathBuf {
        self.resolve(&self.cutoffs)
    }

    pub fn memo(&self) -> PathBuf {
        self.resolve(&self.memo)
    }

    pub fn discarded(&self) -> PathBuf {
        self.resolve(&self.discarded)
    }

    pub fn discarded_mentions(&self) -> PathBuf {
        self.resolve(&self.discarded_mentions)
    }

    pub fn backups(&self) -> PathBuf {
        self.resolve(&self.backups)
    }

    pub fn reports(&self) -> PathBuf {
        self.resolve(&self.reports)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// How long to wait after a rate-limit response before retrying.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Retries allowed per request after a rate limit.
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

fn default_cooldown_secs() -> u64 {
    900
}

fn default_rate_limit_retries() -> u32 {
    1
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

impl FetchConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Set algebra used to decide which mentions in a reply are its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionDiff {
    /// `self △ parent`
    #[default]
    SymmetricDifference,
    /// `self \ parent`
    Subtraction,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub mention_diff: MentionDiff,
}

/// One named pattern of the regex filter chain.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub flags: Vec<RegexFlag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexFlag {
    Ignorecase,
    Dotall,
    Multiline,
    Verbose,
    Unicode,
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
