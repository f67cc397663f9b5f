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

//! A low-latency sample playback and effects engine.
//!
//! Samples are decoded into a [`samples::SampleBank`] and triggered into
//! voices that a render callback mixes, runs through an ordered effect chain,
//! and hands to an output stream. The stream is supervised so that a lost
//! device is reopened without the caller doing anything.

pub mod audio;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod samples;
#[cfg(test)]
mod testutil;

pub use engine::Engine;
pub use error::EngineError;
