//! Configuration and paths

use crate::error::{Error, Result};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// All configurable paths and constants
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub schedule_file: PathBuf,
    pub cursor_file: PathBuf,
    pub version_file: PathBuf,
    pub announced_version_file: PathBuf,
    pub api_base: String,
    pub token: Option<String>,
    pub bot_name: String,
    pub timezone: Tz,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub request_timeout: Duration,
    pub max_runtime: Option<Duration>,
    pub liveness_bind: String,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reminder-bot");
        Self::with_state_dir(&state_dir)
    }
}

impl Config {
    /// Config rooted at `state_dir`, everything else default
    pub fn with_state_dir(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            schedule_file: state_dir.join("schedule.json"),
            cursor_file: state_dir.join("last_update_id.txt"),
            version_file: state_dir.join("version.txt"),
            announced_version_file: state_dir.join("announced_version.txt"),
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            bot_name: DEFAULT_BOT_NAME.to_string(),
            timezone: DEFAULT_TIMEZONE,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_runtime: Some(Duration::from_secs(DEFAULT_MAX_RUNTIME_MINS * 60)),
            liveness_bind: "0.0.0.0:8080".to_string(),
        }
    }

    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &Path) -> Self {
        Self {
            api_base: "http://127.0.0.1:9".to_string(),
            token: Some("test-token".to_string()),
            poll_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
            request_timeout: Duration::from_secs(2),
            max_runtime: None,
            liveness_bind: "127.0.0.1:0".to_string(),
            ..Self::with_state_dir(temp_dir)
        }
    }

    /// Parse an IANA zone name such as `Asia/Bangkok`
    pub fn parse_timezone(name: &str) -> Result<Tz> {
        name.parse::<Tz>()
            .map_err(|e| Error::Config(format!("unknown time zone '{}': {}", name, e)))
    }

    /// Token required for talking to the bot API
    pub fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Config("bot token not set (use --token or TOKEN)".to_string()))
    }

    /// The matcher compares at minute resolution, so ticks must stay under a minute apart.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.min(MAX_POLL_INTERVAL)
    }
}

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

pub const DEFAULT_BOT_NAME: &str = "ReminderBot";

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Bangkok;

/// 490 hours
pub const DEFAULT_MAX_RUNTIME_MINS: u64 = 29_400;

pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);
