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
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::backend::{AudioBackend, EventSender, OutputStream, StreamEvent};
use super::render::RenderHandle;
use super::stream::StreamConfig;
use crate::error::EngineError;

/// Default buffer capacity of a mock device, in frames.
const DEFAULT_CAPACITY: u32 = 4096;

struct ActiveStream {
    id: u64,
    channels: usize,
    renderer: RenderHandle,
    events: EventSender,
    running: bool,
}

struct DeviceState {
    name: String,
    native_sample_rate: Option<u32>,
    capacity: u32,
    mmap_supported: bool,
    failing_opens: u32,
    opens: u32,
    next_stream_id: u64,
    active: Option<ActiveStream>,
}

/// A mock device. Doesn't play anything; audio is pulled out of it with
/// [`MockDevice::pump`], so rendering is entirely deterministic. Clones share
/// the same device, which lets tests keep a handle after giving one to the
/// engine.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new(name: &str) -> MockDevice {
        MockDevice {
            state: Arc::new(Mutex::new(DeviceState {
                name: name.to_string(),
                native_sample_rate: None,
                capacity: DEFAULT_CAPACITY,
                mmap_supported: true,
                failing_opens: 0,
                opens: 0,
                next_stream_id: 0,
                active: None,
            })),
        }
    }

    /// The device only runs at `sample_rate`, whatever is requested.
    pub fn with_native_sample_rate(self, sample_rate: u32) -> MockDevice {
        self.state.lock().native_sample_rate = Some(sample_rate);
        self
    }

    /// Changes the native rate for later opens, as when the platform routes
    /// output to different hardware.
    pub fn set_native_sample_rate(&self, sample_rate: Option<u32>) {
        self.state.lock().native_sample_rate = sample_rate;
    }

    pub fn with_capacity(self, frames: u32) -> MockDevice {
        self.state.lock().capacity = frames;
        self
    }

    pub fn without_mmap(self) -> MockDevice {
        self.state.lock().mmap_supported = false;
        self
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// The next `count` opens fail with `DeviceUnavailable`.
    pub fn fail_next_opens(&self, count: u32) {
        self.state.lock().failing_opens = count;
    }

    /// Opens attempted so far, failed ones included.
    pub fn open_count(&self) -> u32 {
        self.state.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .is_some_and(|stream| stream.running)
    }

    /// Runs the render callback for `frames` frames, as the device would.
    /// Returns nothing if no stream is running.
    pub fn pump(&self, frames: usize) -> Vec<f32> {
        let (renderer, channels) = {
            let state = self.state.lock();
            match state.active.as_ref() {
                Some(stream) if stream.running => (stream.renderer.clone(), stream.channels),
                _ => return Vec::new(),
            }
        };
        let mut output = vec![0.0; frames * channels];
        renderer.render(&mut output, channels);
        output
    }

    /// Removes the device from under its stream and reports it the way a
    /// backend error callback would.
    pub fn disconnect(&self) {
        let stream = self.state.lock().active.take();
        if let Some(stream) = stream {
            info!(stream = stream.id, "Mock device disconnected");
            let _ = stream.events.send(StreamEvent::Disconnected);
        }
    }

    /// Removes the device without any stream event, as when only the
    /// platform's device list notices.
    pub fn disconnect_silently(&self) {
        if let Some(stream) = self.state.lock().active.take() {
            info!(stream = stream.id, "Mock device disconnected silently");
        }
    }
}

impl fmt::Display for MockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.state.lock().name)
    }
}

/// Backend over a [`MockDevice`].
pub struct MockBackend {
    device: MockDevice,
}

impl MockBackend {
    pub fn new(device: MockDevice) -> MockBackend {
        MockBackend { device }
    }

    pub fn device(&self) -> &MockDevice {
        &self.device
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> String {
        self.device.to_string()
    }

    fn open(
        &mut self,
        config: &StreamConfig,
        renderer: RenderHandle,
        events: EventSender,
    ) -> Result<Box<dyn OutputStream>, EngineError> {
        let mut state = self.device.state.lock();
        state.opens += 1;
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(EngineError::DeviceUnavailable(format!(
                "{} refused to open",
                state.name
            )));
        }

        let mut negotiated = config.clone();
        if let Some(rate) = state.native_sample_rate {
            negotiated.sample_rate = rate;
        }
        negotiated.buffer_size_in_frames =
            clamp_buffer(config.buffer_size_in_frames, config.frames_per_burst, state.capacity);
        negotiated.mmap_enabled = config.mmap_enabled && state.mmap_supported;

        let id = state.next_stream_id;
        state.next_stream_id += 1;
        state.active = Some(ActiveStream {
            id,
            channels: negotiated.channel_count as usize,
            renderer,
            events,
            running: false,
        });
        debug!(stream = id, device = state.name, "Mock stream opened");

        Ok(Box::new(MockOutputStream {
            device: self.device.clone(),
            id,
            capacity: state.capacity,
            config: negotiated,
        }))
    }

    fn is_mmap_supported(&self) -> bool {
        self.device.state.lock().mmap_supported
    }
}

fn clamp_buffer(requested: u32, burst: u32, capacity: u32) -> u32 {
    requested.max(burst).min(capacity)
}

struct MockOutputStream {
    device: MockDevice,
    id: u64,
    capacity: u32,
    config: StreamConfig,
}

impl MockOutputStream {
    fn set_running(&self, running: bool) -> Result<(), EngineError> {
        let mut state = self.device.state.lock();
        match state.active.as_mut() {
            Some(stream) if stream.id == self.id => {
                stream.running = running;
                Ok(())
            }
            _ if !running => Ok(()),
            _ => Err(EngineError::StreamDisconnected),
        }
    }
}

impl OutputStream for MockOutputStream {
    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.set_running(true)
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.set_running(false)
    }

    fn set_buffer_size_in_frames(&mut self, frames: u32) -> Option<u32> {
        let actual = clamp_buffer(frames, self.config.frames_per_burst, self.capacity);
        self.config.buffer_size_in_frames = actual;
        Some(actual)
    }

    fn buffer_capacity_in_frames(&self) -> u32 {
        self.capacity
    }
}

impl Drop for MockOutputStream {
    fn drop(&mut self) {
        let mut state = self.device.state.lock();
        if state.active.as_ref().is_some_and(|stream| stream.id == self.id) {
            state.active = None;
        }
    }
}
