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
//! YAML configuration for the engine and for sample kits.

mod engine;
mod error;
mod kit;

pub use self::engine::{
    EngineConfig, RecoverySettings, StreamSettings, VoiceSettings, DEFAULT_MAX_RECOVERY_ATTEMPTS,
    DEFAULT_RECONNECT_TIMEOUT,
};
pub use self::error::ConfigError;
pub use self::kit::{Kit, KitEffect, Pad, RetriggerBehavior};
