//! Source and playback state.

use crate::error::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw state reported by a device source.
///
/// Mirrors the states of typical buffer-queue APIs. `Unknown` carries the
/// backend's raw code for anything the backend could not classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceState {
    /// Source created but never played.
    Initial,
    Playing,
    Paused,
    /// Stopped by command, or ran out of queued buffers.
    Stopped,
    Unknown(i32),
}

impl SourceState {
    /// True when the device is not consuming buffers and a `play` would be
    /// needed to resume. Paused is excluded: pausing is never an underrun.
    pub fn is_halted(self) -> bool {
        matches!(self, Self::Initial | Self::Stopped)
    }
}

/// Playback state as exposed to engine callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl TryFrom<SourceState> for PlaybackState {
    type Error = CadenceError;

    fn try_from(state: SourceState) -> Result<Self> {
        match state {
            SourceState::Initial | SourceState::Stopped => Ok(Self::Stopped),
            SourceState::Playing => Ok(Self::Playing),
            SourceState::Paused => Ok(Self::Paused),
            SourceState::Unknown(code) => Err(CadenceError::DeviceState(format!(
                "unrecognized source state 0x{code:04x}"
            ))),
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}
