use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::ErrorClassifier;
use crate::wire::{Dialect, EvalMode, DEFAULT_MAX_FRAME_BYTES};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("retry delay schedule must not be empty")]
    EmptySchedule,
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { field });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub dialect: Dialect,
    pub sync_timeout_ms: u64,
    pub async_timeout_ms: u64,
    pub max_frame_bytes: usize,
    pub outbound_capacity: usize,
    pub event_capacity: usize,
    pub classifier: ErrorClassifier,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            sync_timeout_ms: 15_000,
            async_timeout_ms: 90_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_capacity: 256,
            event_capacity: 256,
            classifier: ErrorClassifier::default(),
        }
    }
}

impl DriverConfig {
    pub fn timeout_for(&self, mode: EvalMode) -> Duration {
        match mode {
            EvalMode::Sync => Duration::from_millis(self.sync_timeout_ms),
            EvalMode::AwaitAsync => Duration::from_millis(self.async_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("sync_timeout_ms", self.sync_timeout_ms)?;
        non_zero("async_timeout_ms", self.async_timeout_ms)?;
        non_zero("max_frame_bytes", self.max_frame_bytes as u64)?;
        non_zero("outbound_capacity", self.outbound_capacity as u64)?;
        non_zero("event_capacity", self.event_capacity as u64)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub cap: usize,
    pub prefix_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::with_cap(2_000)
    }
}

impl DedupConfig {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap,
            prefix_chars: 50,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("dedup.cap", self.cap as u64)?;
        non_zero("dedup.prefix_chars", self.prefix_chars as u64)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub buffer_cap: usize,
    pub target_object: String,
    pub callbacks: Vec<String>,
    pub dedup: DedupConfig,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
            buffer_cap: 100,
            target_object: "window.nim && window.nim.options".to_string(),
            callbacks: vec!["onmsg".to_string(), "onmsgs".to_string()],
            dedup: DedupConfig::with_cap(2_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub database_prefix: String,
    pub store: String,
    pub index: String,
    pub page_limit: usize,
    pub dedup: DedupConfig,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1_000,
            database_prefix: "nim-".to_string(),
            store: "msg1".to_string(),
            index: "time".to_string(),
            page_limit: 200,
            dedup: DedupConfig::with_cap(5_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub selector: String,
    pub limit: usize,
    pub dedup: DedupConfig,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 2_000,
            selector: "[class*=\"message-item\"], [class*=\"msg-item\"]".to_string(),
            limit: 50,
            dedup: DedupConfig::with_cap(1_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub hook: HookConfig,
    pub cursor: CursorConfig,
    pub snapshot: SnapshotConfig,
    pub target: Option<String>,
    pub sink_capacity: usize,
    pub shared_dedup: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            hook: HookConfig::default(),
            cursor: CursorConfig::default(),
            snapshot: SnapshotConfig::default(),
            target: None,
            sink_capacity: 1_024,
            shared_dedup: true,
        }
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("hook.interval_ms", self.hook.interval_ms)?;
        non_zero("hook.buffer_cap", self.hook.buffer_cap as u64)?;
        if self.hook.enabled && self.hook.callbacks.is_empty() {
            return Err(ConfigError::Invalid {
                field: "hook.callbacks",
                reason: "no callback to wrap".to_string(),
            });
        }
        self.hook.dedup.validate()?;
        non_zero("cursor.interval_ms", self.cursor.interval_ms)?;
        non_zero("cursor.page_limit", self.cursor.page_limit as u64)?;
        self.cursor.dedup.validate()?;
        if self.cursor.enabled && self.cursor.store.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cursor.store",
                reason: "store name is empty".to_string(),
            });
        }
        non_zero("snapshot.interval_ms", self.snapshot.interval_ms)?;
        non_zero("snapshot.limit", self.snapshot.limit as u64)?;
        self.snapshot.dedup.validate()?;
        non_zero("sink_capacity", self.sink_capacity as u64)?;
        if !(self.hook.enabled || self.cursor.enabled || self.snapshot.enabled) {
            return Err(ConfigError::Invalid {
                field: "harvest",
                reason: "no harvester enabled".to_string(),
            });
        }
        Ok(())
    }

    pub fn shared_dedup_config(&self) -> DedupConfig {
        let caps = [
            (self.hook.enabled, &self.hook.dedup),
            (self.cursor.enabled, &self.cursor.dedup),
            (self.snapshot.enabled, &self.snapshot.dedup),
        ];
        caps.iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, dedup)| (*dedup).clone())
            .max_by_key(|dedup| dedup.cap)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_schedule_ms: Vec<u64>,
    pub confirm_poll_interval_ms: u64,
    pub confirm_max_polls: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_schedule_ms: vec![0, 1_000, 3_000, 6_000, 10_000],
            confirm_poll_interval_ms: 300,
            confirm_max_polls: 6,
        }
    }
}

impl RetryConfig {
    pub fn delay_schedule(&self) -> Vec<Duration> {
        self.delay_schedule_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delay_schedule_ms.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        non_zero("confirm_max_polls", u64::from(self.confirm_max_polls))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        DriverConfig::default().validate().expect("driver");
        HarvestConfig::default().validate().expect("harvest");
        RetryConfig::default().validate().expect("retry");
        assert_eq!(
            DriverConfig::default().timeout_for(EvalMode::AwaitAsync),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn zero_dedup_cap_is_rejected() {
        let mut config = HarvestConfig::default();
        config.hook.dedup.cap = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "dedup.cap"
            })
        );
    }

    #[test]
    fn zero_cursor_page_limit_is_rejected() {
        let mut config = HarvestConfig::default();
        config.cursor.page_limit = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "cursor.page_limit"
            })
        );
    }

    #[test]
    fn empty_schedule_is_rejected() {
        let config = RetryConfig {
            delay_schedule_ms: Vec::new(),
            ..RetryConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptySchedule));
    }

    #[test]
    fn all_harvesters_disabled_is_rejected() {
        let mut config = HarvestConfig::default();
        config.hook.enabled = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "harvest", .. })
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: HarvestConfig =
            serde_json::from_str(r#"{"cursor":{"enabled":true},"target":"team-1"}"#)
                .expect("parse");
        assert!(config.cursor.enabled);
        assert_eq!(config.cursor.dedup.cap, 5_000);
        assert_eq!(config.target.as_deref(), Some("team-1"));
        assert_eq!(config.shared_dedup_config().cap, 5_000);
    }
}
