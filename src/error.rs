// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;

/// What kind of index an [`EngineError::OutOfRange`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    VoiceSlot,
    EffectPosition,
    EffectDescription,
    Parameter,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::VoiceSlot => "voice slot",
            IndexKind::EffectPosition => "effect position",
            IndexKind::EffectDescription => "effect description",
            IndexKind::Parameter => "parameter index",
        })
    }
}

/// Errors surfaced by the engine to its callers. Nothing here is ever raised
/// on the render thread.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The engine was used before `create` or after `destroy`.
    #[error("engine has not been created")]
    EngineNotReady,

    #[error("{kind} {index} is out of range (length {len})")]
    OutOfRange {
        kind: IndexKind,
        index: usize,
        len: usize,
    },

    /// A stream could not be opened or reconfigured, or recovery gave up.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream disconnected")]
    StreamDisconnected,

    #[error("unable to decode sample asset: {0}")]
    AssetDecode(String),

    /// The engine configuration cannot be used.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub(crate) fn out_of_range(kind: IndexKind, index: usize, len: usize) -> EngineError {
        EngineError::OutOfRange { kind, index, len }
    }
}

impl From<crate::config::ConfigError> for EngineError {
    fn from(err: crate::config::ConfigError) -> Self {
        EngineError::InvalidConfig(err.to_string())
    }
}

impl From<hound::Error> for EngineError {
    fn from(err: hound::Error) -> Self {
        EngineError::AssetDecode(err.to_string())
    }
}

/// Checks that `index` addresses one of `len` items.
pub(crate) fn check_index(kind: IndexKind, index: usize, len: usize) -> Result<(), EngineError> {
    if index < len {
        Ok(())
    } else {
        Err(EngineError::out_of_range(kind, index, len))
    }
}
