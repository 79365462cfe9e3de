//! Application configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub worker: WorkerConfig,
    pub ai: AiConfig,
    pub platform: PlatformConfig,
    pub kv: KvConfig,
    pub sql: SqlConfig,
    pub session: SessionConfig,
    /// Optional translation endpoint. When unset, non-English descriptions
    /// pass through unchanged.
    pub translate_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between starting worker instance `i` and `i + 1`.
    pub startup_delay: Duration,
    pub batch_sizes: BatchSizes,
    pub thresholds: ThresholdLimits,
}

#[derive(Debug, Clone)]
pub struct BatchSizes {
    pub friend_users: usize,
    pub queue_items: usize,
    /// Concurrent outfit AI requests (semaphore permits).
    pub outfit_analysis: usize,
    /// Outfits per multimodal request.
    pub outfit_analysis_batch: usize,
    /// Maximum outfits considered per subject.
    pub outfit_analysis_cap: usize,
    pub purge_users: usize,
    pub purge_groups: usize,
    pub track_groups: usize,
    pub thumbnail_users: usize,
    pub thumbnail_groups: usize,
}

#[derive(Debug, Clone)]
pub struct ThresholdLimits {
    /// Pause traversal workers while the flagged bucket holds at least this
    /// many users.
    pub flagged_users: u64,
    pub max_group_members_track: u64,
    pub min_flagged_override: usize,
    pub min_flagged_percentage: f64,
    pub min_group_flagged_users: usize,
    /// Confidence at which the group analyzer flags a user.
    pub group_flag_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub model: String,
    pub api_key: String,
    pub endpoint: String,
    /// Output-token ceiling for interactive chat turns.
    pub max_chat_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KvConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SqlConfig {
    pub dsn: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub processed_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables. Returns an error for
    /// missing required variables or unparseable values; the caller exits
    /// non-zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            worker: WorkerConfig {
                startup_delay: Duration::from_millis(parsed(
                    "WORKER_STARTUP_DELAY_MS",
                    2000u64,
                )?),
                batch_sizes: BatchSizes {
                    friend_users: parsed("BATCH_FRIEND_USERS", 100usize)?,
                    queue_items: parsed("BATCH_QUEUE_ITEMS", 50usize)?,
                    outfit_analysis: parsed("BATCH_OUTFIT_ANALYSIS", 5usize)?,
                    outfit_analysis_batch: parsed("BATCH_OUTFIT_ANALYSIS_BATCH", 10usize)?,
                    outfit_analysis_cap: parsed("BATCH_OUTFIT_ANALYSIS_CAP", 100usize)?,
                    purge_users: parsed("BATCH_PURGE_USERS", 200usize)?,
                    purge_groups: parsed("BATCH_PURGE_GROUPS", 100usize)?,
                    track_groups: parsed("BATCH_TRACK_GROUPS", 50usize)?,
                    thumbnail_users: parsed("BATCH_THUMBNAIL_USERS", 100usize)?,
                    thumbnail_groups: parsed("BATCH_THUMBNAIL_GROUPS", 100usize)?,
                },
                thresholds: ThresholdLimits {
                    flagged_users: parsed("THRESHOLD_FLAGGED_USERS", 10_000u64)?,
                    max_group_members_track: parsed(
                        "THRESHOLD_MAX_GROUP_MEMBERS_TRACK",
                        500_000u64,
                    )?,
                    min_flagged_override: parsed("THRESHOLD_MIN_FLAGGED_OVERRIDE", 10usize)?,
                    min_flagged_percentage: parsed("THRESHOLD_MIN_FLAGGED_PERCENTAGE", 5.0f64)?,
                    min_group_flagged_users: parsed("THRESHOLD_MIN_GROUP_FLAGGED_USERS", 5usize)?,
                    group_flag_confidence: parsed("THRESHOLD_GROUP_FLAG_CONFIDENCE", 0.40f64)?,
                },
            },
            ai: AiConfig {
                model: parsed("AI_MODEL", "gpt-4o-mini".to_string())?,
                api_key: required("AI_API_KEY")?,
                endpoint: parsed("AI_ENDPOINT", "https://api.openai.com/v1".to_string())?,
                max_chat_tokens: parsed("AI_MAX_CHAT_TOKENS", 200u32)?,
            },
            platform: PlatformConfig {
                base_url: required("PLATFORM_API_URL")?,
                api_key: env::var("PLATFORM_API_KEY").ok(),
            },
            kv: KvConfig {
                url: parsed("REDIS_URL", "redis://127.0.0.1:6379".to_string())?,
            },
            sql: SqlConfig {
                dsn: required("DATABASE_URL")?,
            },
            session: SessionConfig {
                ttl: Duration::from_secs(parsed("SESSION_TTL_SECS", 1800u64)?),
                processed_ttl: Duration::from_secs(parsed(
                    "PROCESSED_TTL_SECS",
                    6 * 60 * 60u64,
                )?),
            },
            translate_endpoint: env::var("TRANSLATE_ENDPOINT").ok(),
        })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn parsed<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidVar { var, value }),
        Err(_) => Ok(default),
    }
}
