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
use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use super::kit::RetriggerBehavior;
use crate::audio::{PerformanceMode, StreamConfig};

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_CHANNEL_COUNT: u16 = 2;
pub const DEFAULT_FRAMES_PER_BURST: u32 = 192;
/// Buffer size in bursts when MMap is not in use.
pub const DEFAULT_BUFFER_SIZE_IN_BURSTS: u32 = 2;
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_SLOTS: usize = 8;
pub const DEFAULT_MAX_VOICES: usize = 32;
pub const DEFAULT_FADE_MS: f32 = 3.0;
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Prefix for environment overrides, e.g. `LOWLAT_STREAM__SAMPLE_RATE=44100`.
const ENV_PREFIX: &str = "LOWLAT";

/// Output stream settings.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct StreamSettings {
    /// Requested sample rate in Hz (default: 48000).
    sample_rate: Option<u32>,

    /// Output channel count, 1 or 2 (default: 2).
    channel_count: Option<u16>,

    /// Frames per callback burst (default: 192).
    frames_per_burst: Option<u32>,

    /// Buffer size expressed in bursts (default: 2).
    buffer_size_in_bursts: Option<u32>,

    /// Latency/power hint (default: low_latency).
    performance_mode: Option<PerformanceMode>,

    /// Whether to request the MMap path when the backend has one (default: true).
    mmap_enabled: Option<bool>,

    /// The output device name. Uses the default device when unset.
    device: Option<String>,

    /// The host audio API. Uses the platform default when unset.
    audio_api: Option<String>,
}

impl StreamSettings {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count.unwrap_or(DEFAULT_CHANNEL_COUNT)
    }

    pub fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst.unwrap_or(DEFAULT_FRAMES_PER_BURST).max(1)
    }

    pub fn buffer_size_in_bursts(&self) -> u32 {
        self.buffer_size_in_bursts
            .unwrap_or(DEFAULT_BUFFER_SIZE_IN_BURSTS)
            .max(1)
    }

    pub fn performance_mode(&self) -> PerformanceMode {
        self.performance_mode.unwrap_or_default()
    }

    pub fn mmap_enabled(&self) -> bool {
        self.mmap_enabled.unwrap_or(true)
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn audio_api(&self) -> Option<&str> {
        self.audio_api.as_deref()
    }

    /// The stream configuration to request from a backend.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate(),
            frames_per_burst: self.frames_per_burst(),
            performance_mode: self.performance_mode(),
            buffer_size_in_frames: self.frames_per_burst() * self.buffer_size_in_bursts(),
            channel_count: self.channel_count(),
            device_id: self.device.clone(),
            audio_api: self.audio_api.clone(),
            mmap_enabled: self.mmap_enabled(),
        }
    }
}

/// Disconnect recovery settings.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct RecoverySettings {
    /// How long to wait for the platform to recover a stream on its own after a
    /// device change before forcing a restart (default: 500ms).
    reconnect_timeout: Option<String>,

    /// Consecutive failed reopen attempts before the engine gives up (default: 3).
    max_recovery_attempts: Option<u32>,
}

impl RecoverySettings {
    pub fn reconnect_timeout(&self) -> Result<Duration, ConfigError> {
        match &self.reconnect_timeout {
            Some(timeout) => Ok(DurationString::from_string(timeout.clone())
                .map_err(|e| ConfigError::invalid("recovery.reconnect_timeout", e.to_string()))?
                .into()),
            None => Ok(DEFAULT_RECONNECT_TIMEOUT),
        }
    }

    pub fn max_recovery_attempts(&self) -> u32 {
        self.max_recovery_attempts
            .unwrap_or(DEFAULT_MAX_RECOVERY_ATTEMPTS)
            .max(1)
    }
}

/// Voice and sample slot settings.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct VoiceSettings {
    /// Number of sample slots in the bank (default: 8).
    slots: Option<usize>,

    /// Global polyphony limit. The oldest voice is stolen past it (default: 32).
    max_voices: Option<usize>,

    /// Gain ramp applied at voice start and stop, in milliseconds (default: 3).
    fade_ms: Option<f32>,

    /// Default behavior when a playing slot is triggered again (default: cut).
    retrigger: Option<RetriggerBehavior>,
}

impl VoiceSettings {
    pub fn slots(&self) -> usize {
        self.slots.unwrap_or(DEFAULT_SLOTS)
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices.unwrap_or(DEFAULT_MAX_VOICES).max(1)
    }

    pub fn fade_ms(&self) -> f32 {
        self.fade_ms.unwrap_or(DEFAULT_FADE_MS).max(0.0)
    }

    pub fn retrigger(&self) -> RetriggerBehavior {
        self.retrigger.unwrap_or_default()
    }
}

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    #[serde(default)]
    stream: StreamSettings,

    #[serde(default)]
    recovery: RecoverySettings,

    #[serde(default)]
    voices: VoiceSettings,

    /// Capacity of the control to render command queue (default: 1024).
    command_queue_capacity: Option<usize>,
}

impl EngineConfig {
    /// Parse an engine configuration from a YAML file, with `LOWLAT_*`
    /// environment variables layered on top.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        Self::load(path, None)
    }

    fn load(
        path: &Path,
        env: Option<config::Map<String, String>>,
    ) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize cleanly but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.sample_rate() == 0 {
            return Err(ConfigError::invalid("stream.sample_rate", "must be non-zero"));
        }
        if !(1..=2).contains(&self.stream.channel_count()) {
            return Err(ConfigError::invalid(
                "stream.channel_count",
                format!("{} is not 1 or 2", self.stream.channel_count()),
            ));
        }
        if self.voices.slots() == 0 {
            return Err(ConfigError::invalid("voices.slots", "must be non-zero"));
        }
        self.recovery.reconnect_timeout()?;
        Ok(())
    }

    pub fn stream(&self) -> &StreamSettings {
        &self.stream
    }

    pub fn recovery(&self) -> &RecoverySettings {
        &self.recovery
    }

    pub fn voices(&self) -> &VoiceSettings {
        &self.voices
    }

    pub fn command_queue_capacity(&self) -> usize {
        self.command_queue_capacity
            .unwrap_or(DEFAULT_COMMAND_QUEUE_CAPACITY)
            .max(16)
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.stream.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_channel_count(mut self, channel_count: u16) -> Self {
        self.stream.channel_count = Some(channel_count);
        self
    }

    pub fn with_frames_per_burst(mut self, frames_per_burst: u32) -> Self {
        self.stream.frames_per_burst = Some(frames_per_burst);
        self
    }

    pub fn with_device(mut self, device: &str) -> Self {
        self.stream.device = Some(device.to_string());
        self
    }

    pub fn with_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.recovery.reconnect_timeout = Some(format!("{}ms", timeout.as_millis()));
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.recovery.max_recovery_attempts = Some(attempts);
        self
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.voices.slots = Some(slots);
        self
    }

    pub fn with_max_voices(mut self, max_voices: usize) -> Self {
        self.voices.max_voices = Some(max_voices);
        self
    }

    pub fn with_fade_ms(mut self, fade_ms: f32) -> Self {
        self.voices.fade_ms = Some(fade_ms);
        self
    }

    pub fn with_retrigger(mut self, retrigger: RetriggerBehavior) -> Self {
        self.voices.retrigger = Some(retrigger);
        self
    }

    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = Some(capacity);
        self
    }
}
