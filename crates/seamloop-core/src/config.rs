//! Player configuration.
//!
//! Every field has a default, so `{}` is a valid config. Loading from a
//! JSON value never fails: invalid input falls back to defaults with a
//! warning. Loading from a file reports I/O and parse errors.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Queue depth for completion events when nothing else is configured.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Initial volume, 0.0 silent to 1.0 full.
    pub volume: f32,
    /// Initial playback speed multiplier.
    pub speed: f32,
    /// Added to the speed at every loop boundary. 0 disables.
    pub speed_increment: f32,
    pub muted: bool,
    /// Capacity of the bounded completion-event queue.
    pub event_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            speed: 1.0,
            speed_increment: 0.0,
            muted: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl PlayerConfig {
    /// Build from a JSON value, falling back to defaults on bad input.
    pub fn from_value(v: &Value) -> Self {
        match serde_json::from_value::<PlayerConfig>(v.clone()) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                log::warn!("seamloop: invalid player config ({}), using defaults", e);
                Self::default()
            }
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(s)?;
        Ok(config.sanitized())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    // A zero-capacity sync_channel is a rendezvous channel; the backend would
    // drop every completion it cannot hand over instantly.
    fn sanitized(mut self) -> Self {
        if self.event_capacity == 0 {
            log::warn!("seamloop: event_capacity 0 is not usable, using {}", DEFAULT_EVENT_CAPACITY);
            self.event_capacity = DEFAULT_EVENT_CAPACITY;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_is_default() {
        let config = PlayerConfig::from_value(&serde_json::json!({}));
        assert_eq!(config, PlayerConfig::default());
    }

    #[test]
    fn partial_object_keeps_other_defaults() {
        let config = PlayerConfig::from_value(&serde_json::json!({
            "speed": 1.5,
            "speed_increment": 0.25
        }));
        assert_eq!(config.speed, 1.5);
        assert_eq!(config.speed_increment, 0.25);
        assert_eq!(config.volume, 1.0);
        assert!(!config.muted);
    }

    #[test]
    fn invalid_value_falls_back() {
        let config = PlayerConfig::from_value(&serde_json::json!({"volume": "loud"}));
        assert_eq!(config, PlayerConfig::default());
    }

    #[test]
    fn zero_capacity_is_replaced() {
        let config = PlayerConfig::from_value(&serde_json::json!({"event_capacity": 0}));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{"volume": 0.25, "muted": true}}"#).unwrap();

        let config = PlayerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.volume, 0.25);
        assert!(config.muted);
    }

    #[test]
    fn from_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "not json").unwrap();

        let err = PlayerConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, crate::LoopError::Config(_)));
    }

    #[test]
    fn from_missing_file_reports_io_error() {
        let err = PlayerConfig::from_json_file("/nonexistent/seamloop.json").unwrap_err();
        assert!(matches!(err, crate::LoopError::Io(_)));
    }
}
