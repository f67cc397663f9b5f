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

//! Output stream lifecycle.
//!
//! ```text
//! Closed -> Opening -> Open <-> Running -> Stopping -> Open -> Closed
//!                               Running -> Disconnected -> (restart) -> Running
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, EventSender, OutputStream};
use super::render::RenderHandle;
use crate::error::EngineError;

/// A stream-level hint trading latency for power.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    None,
    #[default]
    LowLatency,
    PowerSaving,
    PowerSavingOffloaded,
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PerformanceMode::None => "none",
            PerformanceMode::LowLatency => "low_latency",
            PerformanceMode::PowerSaving => "power_saving",
            PerformanceMode::PowerSavingOffloaded => "power_saving_offloaded",
        })
    }
}

/// Requested or negotiated stream parameters. A backend may not honor every
/// request, so always re-read the config the stream reports.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub frames_per_burst: u32,
    pub performance_mode: PerformanceMode,
    pub buffer_size_in_frames: u32,
    pub channel_count: u16,
    /// None selects the default output device.
    pub device_id: Option<String>,
    pub audio_api: Option<String>,
    pub mmap_enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            sample_rate: 48000,
            frames_per_burst: 192,
            performance_mode: PerformanceMode::LowLatency,
            buffer_size_in_frames: 384,
            channel_count: 2,
            device_id: None,
            audio_api: None,
            mmap_enabled: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Open,
    Running,
    Stopping,
    /// The device went away under a running stream.
    Disconnected,
}

/// Owns the single output stream and drives it through its states.
pub struct StreamController {
    backend: Box<dyn AudioBackend>,
    requested: StreamConfig,
    stream: Option<Box<dyn OutputStream>>,
    state: StreamState,
    renderer: RenderHandle,
    events: EventSender,
    negotiated_rate: Arc<AtomicU32>,
}

impl StreamController {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        requested: StreamConfig,
        renderer: RenderHandle,
        events: EventSender,
    ) -> StreamController {
        StreamController {
            backend,
            negotiated_rate: Arc::new(AtomicU32::new(requested.sample_rate)),
            requested,
            stream: None,
            state: StreamState::Closed,
            renderer,
            events,
        }
    }

    /// Opens a stream for `config`, closing any current one first. Returns
    /// the negotiated config.
    pub fn open(&mut self, config: StreamConfig) -> Result<StreamConfig, EngineError> {
        if self.stream.is_some() {
            self.close();
        }
        self.requested = config;
        self.state = StreamState::Opening;
        debug!(
            backend = self.backend.name(),
            sample_rate = self.requested.sample_rate,
            frames_per_burst = self.requested.frames_per_burst,
            "Opening output stream"
        );

        match self
            .backend
            .open(&self.requested, self.renderer.clone(), self.events.clone())
        {
            Ok(stream) => {
                let actual = stream.config().clone();
                if actual.sample_rate != self.requested.sample_rate {
                    info!(
                        requested = self.requested.sample_rate,
                        actual = actual.sample_rate,
                        "Device negotiated a different sample rate"
                    );
                }
                info!(
                    sample_rate = actual.sample_rate,
                    channels = actual.channel_count,
                    buffer_size = actual.buffer_size_in_frames,
                    performance_mode = %actual.performance_mode,
                    mmap = actual.mmap_enabled,
                    "Output stream open"
                );
                self.negotiated_rate
                    .store(actual.sample_rate, Ordering::Release);
                self.stream = Some(stream);
                self.state = StreamState::Open;
                Ok(actual)
            }
            Err(e) => {
                warn!(error = %e, "Unable to open output stream");
                self.state = StreamState::Closed;
                Err(e)
            }
        }
    }

    /// Opens again with the last requested config.
    pub fn reopen(&mut self) -> Result<StreamConfig, EngineError> {
        self.open(self.requested.clone())
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            StreamState::Running => Ok(()),
            StreamState::Open => {
                if let Some(stream) = self.stream.as_mut() {
                    stream.start()?;
                }
                self.state = StreamState::Running;
                info!("Output stream started");
                Ok(())
            }
            StreamState::Disconnected => Err(EngineError::StreamDisconnected),
            StreamState::Closed | StreamState::Opening | StreamState::Stopping => Err(
                EngineError::DeviceUnavailable("output stream is not open".to_string()),
            ),
        }
    }

    /// Stops a running stream. Anything else is left alone.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if self.state != StreamState::Running {
            return Ok(());
        }
        self.state = StreamState::Stopping;
        let result = match self.stream.as_mut() {
            Some(stream) => stream.stop(),
            None => Ok(()),
        };
        self.state = StreamState::Open;
        info!("Output stream stopped");
        result
    }

    /// Releases the stream. Safe in any state.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if self.state == StreamState::Running {
                if let Err(e) = stream.stop() {
                    debug!(error = %e, "Error stopping stream during close");
                }
            }
            info!("Output stream closed");
        }
        self.state = StreamState::Closed;
    }

    /// The device backing the stream went away. The stream handle is dropped
    /// and nothing renders until [`StreamController::restart`].
    pub fn on_disconnect(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.stream = None;
        self.state = StreamState::Disconnected;
        warn!("Output stream disconnected");
    }

    /// Close, reopen with the requested config and start.
    pub fn restart(&mut self) -> Result<StreamConfig, EngineError> {
        self.close();
        let actual = self.open(self.requested.clone())?;
        self.start()?;
        Ok(actual)
    }

    pub fn set_performance_mode(&mut self, mode: PerformanceMode) -> Result<(), EngineError> {
        if self.requested.performance_mode == mode {
            return Ok(());
        }
        info!(mode = %mode, "Changing performance mode");
        self.requested.performance_mode = mode;
        self.reconfigure()
    }

    /// Requests a new buffer size and returns the size actually in effect.
    /// Streams that can resize in place do so without stopping.
    pub fn set_buffer_size_in_frames(&mut self, frames: u32) -> Result<u32, EngineError> {
        self.requested.buffer_size_in_frames = frames;
        if let Some(stream) = self.stream.as_mut() {
            if let Some(actual) = stream.set_buffer_size_in_frames(frames) {
                debug!(requested = frames, actual, "Buffer resized in place");
                return Ok(actual);
            }
        }
        self.reconfigure()?;
        Ok(self
            .actual_config()
            .map(|config| config.buffer_size_in_frames)
            .unwrap_or(frames))
    }

    /// Requests the MMap path and returns whether it is now in use.
    pub fn set_mmap_enabled(&mut self, enabled: bool) -> Result<bool, EngineError> {
        if self.requested.mmap_enabled != enabled {
            self.requested.mmap_enabled = enabled;
            self.reconfigure()?;
        }
        Ok(match self.actual_config() {
            Some(config) => config.mmap_enabled,
            None => enabled && self.backend.is_mmap_supported(),
        })
    }

    /// Applies the requested config to an open stream: stop, close, reopen and
    /// start again if it was running. A closed stream picks the change up on
    /// its next open.
    fn reconfigure(&mut self) -> Result<(), EngineError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let was_running = self.state == StreamState::Running;
        self.stop()?;
        self.close();
        self.open(self.requested.clone())?;
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn requested_config(&self) -> &StreamConfig {
        &self.requested
    }

    /// The negotiated config of the open stream.
    pub fn actual_config(&self) -> Option<&StreamConfig> {
        self.stream.as_ref().map(|stream| stream.config())
    }

    pub fn buffer_capacity_in_frames(&self) -> Option<u32> {
        self.stream
            .as_ref()
            .map(|stream| stream.buffer_capacity_in_frames())
    }

    pub fn is_mmap_supported(&self) -> bool {
        self.backend.is_mmap_supported()
    }

    /// Sample rate of the most recently opened stream, readable without the
    /// controller lock.
    pub fn negotiated_rate(&self) -> Arc<AtomicU32> {
        self.negotiated_rate.clone()
    }

    pub fn renderer(&self) -> &RenderHandle {
        &self.renderer
    }

    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    /// Closes the stream and gives the backend back.
    pub fn into_backend(mut self) -> Box<dyn AudioBackend> {
        self.close();
        self.backend
    }
}

impl fmt::Debug for StreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamController")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("requested", &self.requested)
            .finish()
    }
}
