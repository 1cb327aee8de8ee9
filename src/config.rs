//! Configuration management

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::ExecutorConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::watcher::WatcherConfig;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Response generator base URL
    pub api_url: String,

    /// Bearer token for the generator (optional)
    pub api_key: Option<String>,

    /// Platform label sent with suggestion requests
    pub platform: String,

    /// SQLite database path for the session store
    pub db_path: PathBuf,

    pub debounce: Duration,
    pub poll_interval: Duration,

    /// Zero disables the preview countdown
    pub preview_delay: Duration,

    pub generator_timeout: Duration,
    pub thinking_min: Duration,
    pub thinking_max: Duration,

    /// Emit JSON logs to stderr
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("AUTOPILOT_API_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());

        let api_key = std::env::var("AUTOPILOT_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let platform =
            std::env::var("AUTOPILOT_PLATFORM").unwrap_or_else(|_| "generic".to_string());

        let db_path = std::env::var("AUTOPILOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("chat-autopilot")
                    .join("session.db")
            });

        let thinking_min = millis("AUTOPILOT_THINKING_MIN_MS", 2000);
        let thinking_max = millis("AUTOPILOT_THINKING_MAX_MS", 3000);
        if thinking_max < thinking_min {
            bail!(
                "AUTOPILOT_THINKING_MAX_MS ({:?}) is below AUTOPILOT_THINKING_MIN_MS ({:?})",
                thinking_max,
                thinking_min
            );
        }

        let generator_timeout = millis("AUTOPILOT_GENERATOR_TIMEOUT_MS", 10_000);
        if generator_timeout.is_zero() {
            bail!("AUTOPILOT_GENERATOR_TIMEOUT_MS must be positive");
        }

        let log_json = std::env::var("AUTOPILOT_LOG_JSON")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            api_url,
            api_key,
            platform,
            db_path,
            debounce: millis("AUTOPILOT_DEBOUNCE_MS", 500),
            poll_interval: millis("AUTOPILOT_POLL_MS", 100),
            preview_delay: millis("AUTOPILOT_PREVIEW_DELAY_MS", 3000),
            generator_timeout,
            thinking_min,
            thinking_max,
            log_json,
        })
    }

    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig {
            debounce: self.debounce,
            poll_interval: self.poll_interval,
            ..WatcherConfig::default()
        }
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            preview_delay: self.preview_delay,
            ..ExecutorConfig::default()
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            platform: self.platform.clone(),
            generator_timeout: self.generator_timeout,
            thinking_min: self.thinking_min,
            thinking_max: self.thinking_max,
            watcher: self.watcher(),
            executor: self.executor(),
            ..OrchestratorConfig::default()
        }
    }
}

fn millis(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}
