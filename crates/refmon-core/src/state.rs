use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode of the reference monitor.
///
/// The discriminants are the values accepted on the management surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    On = 0,
    Off = 1,
    RecOn = 2,
    RecOff = 3,
}

impl MonitorState {
    pub const ALL: [MonitorState; 4] = [
        MonitorState::On,
        MonitorState::Off,
        MonitorState::RecOn,
        MonitorState::RecOff,
    ];

    /// Path interception is active.
    pub fn is_enforcing(self) -> bool {
        matches!(self, MonitorState::On | MonitorState::RecOn)
    }

    /// The blacklist may be mutated.
    pub fn is_reconfigurable(self) -> bool {
        matches!(self, MonitorState::RecOn | MonitorState::RecOff)
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            MonitorState::On => "ON",
            MonitorState::Off => "OFF",
            MonitorState::RecOn => "REC_ON",
            MonitorState::RecOff => "REC_OFF",
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        MonitorState::On
    }
}

impl TryFrom<i32> for MonitorState {
    type Error = MonitorError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(MonitorState::On),
            1 => Ok(MonitorState::Off),
            2 => Ok(MonitorState::RecOn),
            3 => Ok(MonitorState::RecOff),
            other => Err(MonitorError::InvalidState(other)),
        }
    }
}

impl std::str::FromStr for MonitorState {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ON" => Ok(MonitorState::On),
            "OFF" => Ok(MonitorState::Off),
            "REC_ON" => Ok(MonitorState::RecOn),
            "REC_OFF" => Ok(MonitorState::RecOff),
            other => other
                .parse::<i32>()
                .map_err(|_| MonitorError::InvalidState(-1))
                .and_then(MonitorState::try_from),
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
