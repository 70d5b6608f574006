use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::common::error::PbsError;
use crate::server::preempt::order::{PreemptOrdering, parse_preempt_order};

pub const DEFAULT_PREEMPT_ORDER: &str = "SCR";

/// How long a single preemption method may stay unanswered before it is treated as failed.
pub fn default_preempt_timeout() -> Duration {
    get_duration_from_env("PBSD_PREEMPT_TIMEOUT_MS").unwrap_or_else(|| Duration::from_secs(5 * 60))
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn deserialize_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    value
        .map(|v| humantime::parse_duration(&v).map_err(serde::de::Error::custom))
        .transpose()
}

fn default_order() -> String {
    DEFAULT_PREEMPT_ORDER.to_string()
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    pub name: String,
    /// Connection handle the scheduler sends its requests through.
    pub connection: u32,
    #[serde(default = "default_order")]
    pub preempt_order: String,
}

impl SchedulerConfig {
    pub fn orderings(&self) -> crate::Result<Vec<PreemptOrdering>> {
        parse_preempt_order(&self.preempt_order).map_err(|error| {
            PbsError::ConfigError(format!(
                "invalid preempt_order of scheduler {}: {error}",
                self.name
            ))
        })
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    journal: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    preempt_timeout: Option<Duration>,
    #[serde(default, rename = "scheduler")]
    schedulers: Vec<SchedulerConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub journal: Option<PathBuf>,
    pub preempt_timeout: Duration,
    pub schedulers: Vec<SchedulerConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            journal: None,
            preempt_timeout: default_preempt_timeout(),
            schedulers: vec![SchedulerConfig {
                name: "default".to_string(),
                connection: 0,
                preempt_order: default_order(),
            }],
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| {
            PbsError::ConfigError(format!("cannot read {}: {error}", path.display()))
        })?;
        let mut config = Self::parse(&content)?;
        // Relative journal paths are resolved against the config directory
        if let (Some(journal), Some(parent)) = (&config.journal, path.parent()) {
            if journal.is_relative() {
                config.journal = Some(parent.join(journal));
            }
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let defaults = ServerConfig::default();
        let config = Self {
            journal: file.journal,
            preempt_timeout: file.preempt_timeout.unwrap_or(defaults.preempt_timeout),
            schedulers: if file.schedulers.is_empty() {
                defaults.schedulers
            } else {
                file.schedulers
            },
        };
        for scheduler in &config.schedulers {
            scheduler.orderings()?;
        }
        Ok(config)
    }
}
