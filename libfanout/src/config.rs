//! Configuration management for Fanout

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduling: SchedulingConfig,
    pub rate_limits: RateLimitConfig,
    pub media: MediaConfig,
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/fanout/fanout.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// How often the daemon sweeps for due posts
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// How often the daemon runs an inbound sync
    #[serde(with = "duration_str")]
    pub sync_interval: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_str")]
    pub retry_base_delay: Duration,
    #[serde(with = "duration_str")]
    pub job_timeout: Duration,
    #[serde(with = "duration_str")]
    pub platform_timeout: Duration,
    pub max_concurrent_posts: usize,
    /// Posts left in `publishing` longer than this are marked failed
    #[serde(with = "duration_str")]
    pub stale_after: Duration,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            sync_interval: Duration::from_secs(15 * 60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            job_timeout: Duration::from_secs(120),
            platform_timeout: Duration::from_secs(30),
            max_concurrent_posts: 4,
            stale_after: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
    /// Longest single wait for a window to roll before giving up
    #[serde(with = "duration_str")]
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 30,
            per_hour: 300,
            max_wait: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory that backs `public_base_url`; files under it are read from disk
    pub local_root: Option<String>,
    pub public_base_url: Option<String>,
    #[serde(with = "duration_str")]
    pub download_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            local_root: None,
            public_base_url: None,
            download_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub facebook: FacebookConfig,
    pub instagram: InstagramConfig,
    pub linkedin: LinkedInConfig,
    pub twitter: TwitterConfig,
    pub tiktok: TikTokConfig,
}

pub const GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacebookConfig {
    pub api_base: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            api_base: GRAPH_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstagramConfig {
    pub api_base: String,
    /// Delay between container status checks for videos
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            api_base: GRAPH_API_BASE.to_string(),
            poll_interval: Duration::from_secs(5),
            max_polls: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedInConfig {
    pub api_base: String,
}

impl Default for LinkedInConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.linkedin.com/v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    /// Root of both the v2 and v1.1 endpoints
    pub api_base: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.twitter.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TikTokConfig {
    pub api_base: String,
    pub privacy_level: String,
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            api_base: "https://open.tiktokapis.com/v2".to_string(),
            privacy_level: "SELF_ONLY".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults; `FANOUT_DB_PATH` overrides the
    /// database path either way.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        if let Ok(db_path) = std::env::var("FANOUT_DB_PATH") {
            config.database.path = db_path;
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.scheduling.max_concurrent_posts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.max_concurrent_posts".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.rate_limits.per_minute == 0 || self.rate_limits.per_hour == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limits".to_string(),
                reason: "limits must be at least 1".to_string(),
            }
            .into());
        }
        if self.media.public_base_url.is_some() != self.media.local_root.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "media".to_string(),
                reason: "local_root and public_base_url must be set together".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Database path with `~` and environment variables expanded
    pub fn db_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.database.path).map_err(|e| {
            ConfigError::InvalidValue {
                field: "database.path".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FANOUT_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("fanout").join("config.toml"))
}

/// Durations written as humantime strings ("30s", "2m", "1h 30m")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
