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

//! The sample bank.
//!
//! Each slot keeps the decoded source at its native rate plus an immutable,
//! shared entry conformed to the current stream rate. Voices hold the entry
//! by reference count so they never outlive the data they read.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::loader::{decode_wav, DecodedSample};
use crate::error::{check_index, EngineError, IndexKind};

/// A sample ready for playback at the stream's sample rate.
#[derive(Debug, PartialEq)]
pub struct SampleEntry {
    id: usize,
    /// Interleaved sample data.
    data: Vec<f32>,
    channel_count: u16,
    sample_rate: u32,
}

impl SampleEntry {
    pub(crate) fn new(id: usize, data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        SampleEntry {
            id,
            data,
            channel_count,
            sample_rate,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the (left, right) pair for a frame. Mono samples feed both sides.
    #[inline]
    pub fn frame(&self, index: usize) -> (f32, f32) {
        if self.channel_count == 1 {
            let sample = self.data[index];
            (sample, sample)
        } else {
            let offset = index * 2;
            (self.data[offset], self.data[offset + 1])
        }
    }
}

struct BankSlot {
    source: DecodedSample,
    entry: Arc<SampleEntry>,
}

/// Owns decoded PCM for every loadable slot.
pub struct SampleBank {
    slots: Vec<Option<BankSlot>>,
    stream_rate: u32,
}

impl SampleBank {
    pub fn new(slot_count: usize, stream_rate: u32) -> SampleBank {
        SampleBank {
            slots: (0..slot_count).map(|_| None).collect(),
            stream_rate,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn stream_rate(&self) -> u32 {
        self.stream_rate
    }

    /// Decodes WAV bytes into a slot, replacing anything already there.
    pub fn load_wav(&mut self, id: usize, bytes: &[u8]) -> Result<Arc<SampleEntry>, EngineError> {
        check_index(IndexKind::VoiceSlot, id, self.slots.len())?;
        let decoded = decode_wav(bytes)?;
        Ok(self.insert(id, decoded))
    }

    /// Reads and decodes a WAV file into a slot.
    pub fn load_file(&mut self, id: usize, path: &Path) -> Result<Arc<SampleEntry>, EngineError> {
        check_index(IndexKind::VoiceSlot, id, self.slots.len())?;
        let bytes = fs::read(path)
            .map_err(|e| EngineError::AssetDecode(format!("{}: {}", path.display(), e)))?;
        self.load_wav(id, &bytes)
    }

    fn insert(&mut self, id: usize, source: DecodedSample) -> Arc<SampleEntry> {
        let entry = Arc::new(Self::conform(id, &source, self.stream_rate));
        info!(
            slot = id,
            channels = source.channel_count(),
            source_rate = source.sample_rate(),
            stream_rate = self.stream_rate,
            frames = entry.frame_count(),
            "Loaded sample"
        );
        self.slots[id] = Some(BankSlot {
            source,
            entry: entry.clone(),
        });
        entry
    }

    fn conform(id: usize, source: &DecodedSample, stream_rate: u32) -> SampleEntry {
        SampleEntry::new(
            id,
            source.conformed_to(stream_rate),
            source.channel_count(),
            stream_rate,
        )
    }

    pub fn get(&self, id: usize) -> Option<Arc<SampleEntry>> {
        self.slots
            .get(id)
            .and_then(|slot| slot.as_ref().map(|slot| slot.entry.clone()))
    }

    pub fn is_loaded(&self, id: usize) -> bool {
        matches!(self.slots.get(id), Some(Some(_)))
    }

    /// Empties a slot. Returns whether anything was loaded there.
    pub fn unload(&mut self, id: usize) -> Result<bool, EngineError> {
        check_index(IndexKind::VoiceSlot, id, self.slots.len())?;
        Ok(self.slots[id].take().is_some())
    }

    pub fn unload_all(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Re-derives every entry for a new stream rate and returns the new
    /// entries so they can be published to the render thread.
    pub fn set_stream_rate(&mut self, stream_rate: u32) -> Vec<Arc<SampleEntry>> {
        if stream_rate == self.stream_rate {
            return Vec::new();
        }
        debug!(from = self.stream_rate, to = stream_rate, "Conforming sample bank");
        self.stream_rate = stream_rate;
        let mut updated = Vec::new();
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                slot.entry = Arc::new(Self::conform(id, &slot.source, stream_rate));
                updated.push(slot.entry.clone());
            }
        }
        updated
    }

    /// Total memory held by the bank, in bytes. Counts each slot's decoded
    /// source as well as its conformed entry.
    pub fn memory_usage(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|slot| (slot.entry.data.len() + slot.source.data().len()) * std::mem::size_of::<f32>())
            .sum()
    }
}

impl std::fmt::Debug for SampleBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBank")
            .field("slots", &self.slots.len())
            .field(
                "loaded",
                &self.slots.iter().filter(|slot| slot.is_some()).count(),
            )
            .field("stream_rate", &self.stream_rate)
            .field("total_memory_kb", &(self.memory_usage() / 1024))
            .finish()
    }
}
