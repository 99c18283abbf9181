//! Loop player commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single operation on a loop player, as JSON `{"action": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LoopCommand {
    Start,
    Pause,
    SetVolume { volume: f32 },
    SetSpeed { speed: f32 },
    SetSpeedIncrement { increment: f32 },
    SetMuted { muted: bool },
    IncrementSpeed,
    Close,
}

impl LoopCommand {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        serde_json::from_value(v.clone()).ok()
    }
}
