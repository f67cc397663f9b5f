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

//! Real-time rendering and output stream management.
//!
//! Control-side calls reach the render thread only through the command queue
//! in [`command`]. The render callback drains it at the start of every period,
//! mixes the active voices and runs the effect rack.

pub mod backend;
pub mod command;
#[cfg(feature = "cpal")]
pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod recovery;
pub mod render;
pub mod stream;
#[cfg(feature = "cpal")]
mod thread_priority;

pub use backend::{AudioBackend, EventSender, OutputStream, StreamEvent};
pub use command::{command_queue, CommandReceiver, CommandSender, EngineCommand, Garbage};
pub use recovery::{
    EngineNotification, RecoveryPolicy, RecoveryStatus, RecoverySupervisor, RestartHook,
};
pub use render::{RenderHandle, RenderStats, Renderer};
pub use stream::{PerformanceMode, StreamConfig, StreamController, StreamState};

use crate::config::StreamSettings;
use crate::error::EngineError;

/// Picks a backend for the configured device. Device names starting with
/// "mock" get a [`mock::MockBackend`].
pub fn backend_for(settings: &StreamSettings) -> Result<Box<dyn AudioBackend>, EngineError> {
    match settings.device() {
        Some(device) if device.starts_with("mock") => {
            Ok(Box::new(mock::MockBackend::new(mock::MockDevice::new(device))))
        }
        #[cfg(feature = "cpal")]
        _ => Ok(Box::new(cpal::CpalBackend::new(
            settings.device(),
            settings.audio_api(),
        )?)),
        #[cfg(not(feature = "cpal"))]
        device => Err(EngineError::DeviceUnavailable(format!(
            "{} requires the cpal feature",
            device.unwrap_or("the default device")
        ))),
    }
}
