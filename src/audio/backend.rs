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

//! The seam between the engine and a platform audio API.

use super::render::RenderHandle;
use super::stream::StreamConfig;
use crate::error::EngineError;

/// Events a stream raises from its platform callbacks.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The device route disappeared mid-stream.
    Disconnected,
    /// A non-fatal stream error, e.g. an underrun.
    Error(String),
}

pub type EventSender = crossbeam_channel::Sender<StreamEvent>;

/// An open output stream. Dropping it closes the stream and releases the device.
pub trait OutputStream: Send {
    /// The configuration the platform actually granted.
    fn config(&self) -> &StreamConfig;

    fn start(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    /// Resizes the buffer in place if the platform supports it, returning the
    /// granted size. `None` means the stream has to be reopened instead.
    fn set_buffer_size_in_frames(&mut self, _frames: u32) -> Option<u32> {
        None
    }

    /// The largest buffer size the stream can be given.
    fn buffer_capacity_in_frames(&self) -> u32;
}

/// Opens output streams on some audio API.
pub trait AudioBackend: Send {
    fn name(&self) -> String;

    /// Opens a stream as close to `requested` as the platform allows. The
    /// stream renders by calling `renderer` from its callback and reports
    /// disconnects on `events`.
    fn open(
        &mut self,
        requested: &StreamConfig,
        renderer: RenderHandle,
        events: EventSender,
    ) -> Result<Box<dyn OutputStream>, EngineError>;

    fn is_mmap_supported(&self) -> bool {
        false
    }
}
