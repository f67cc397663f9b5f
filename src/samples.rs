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

//! Sample storage and playback voices.
//!
//! This module provides:
//! - WAV decoding and load-time conversion to the stream's sample rate
//! - The sample bank, whose entries are immutable once loaded
//! - Voices, the per-trigger playback state read by the mixer

mod bank;
mod loader;
mod voice;

pub use bank::{SampleBank, SampleEntry};
pub use loader::{decode_wav, transcode_samples, DecodedSample};
pub use voice::{clamp_gain, clamp_pan, SlotParams, Voice, VoicePool, MAX_GAIN};
