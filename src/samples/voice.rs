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

//! Voices: one playback instance of a sample each.
//!
//! Voices live on the render thread. The pool has a fixed capacity so
//! triggering never allocates; past the limit the oldest voice is stolen.

use std::sync::Arc;

use super::bank::SampleEntry;
use crate::config::RetriggerBehavior;

/// Upper bound for slot gain.
pub const MAX_GAIN: f32 = 2.0;

/// Clamps a gain to [0, MAX_GAIN]. NaN maps to silence.
pub fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, MAX_GAIN)
    }
}

/// Clamps a pan to [-1, 1]. NaN maps to center.
pub fn clamp_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        0.0
    } else {
        pan.clamp(-1.0, 1.0)
    }
}

/// Per-slot playback parameters applied to every voice of the slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlotParams {
    pub gain: f32,
    pub pan: f32,
    pub looping: bool,
    pub retrigger: RetriggerBehavior,
}

impl SlotParams {
    pub fn new(retrigger: RetriggerBehavior) -> SlotParams {
        SlotParams {
            gain: 1.0,
            pan: 0.0,
            looping: false,
            retrigger,
        }
    }
}

impl Default for SlotParams {
    fn default() -> Self {
        SlotParams::new(RetriggerBehavior::default())
    }
}

/// Represents an active voice playing a sample.
pub struct Voice {
    /// Trigger order, used for stealing.
    id: u64,
    slot: usize,
    sample: Arc<SampleEntry>,
    playhead: usize,
    gain: f32,
    pan: f32,
    looping: bool,
    active: bool,
    envelope: f32,
    /// Per-frame envelope increment. Negative while releasing.
    ramp_step: f32,
    releasing: bool,
}

impl Voice {
    pub fn new(
        id: u64,
        slot: usize,
        sample: Arc<SampleEntry>,
        params: &SlotParams,
        fade_frames: usize,
    ) -> Voice {
        let (envelope, ramp_step) = if fade_frames == 0 {
            (1.0, 0.0)
        } else {
            (0.0, 1.0 / fade_frames as f32)
        };
        Voice {
            id,
            slot,
            sample,
            playhead: 0,
            gain: params.gain,
            pan: params.pan,
            looping: params.looping,
            active: true,
            envelope,
            ramp_step,
            releasing: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Swaps in the same sound rendered at another rate, keeping the playhead
    /// at the same point in time. Returns the entry it held.
    pub fn rebase(&mut self, sample: Arc<SampleEntry>) -> Arc<SampleEntry> {
        let old_frames = self.sample.frame_count();
        self.playhead = if old_frames == 0 {
            0
        } else {
            (self.playhead as u64 * sample.frame_count() as u64 / old_frames as u64) as usize
        };
        std::mem::replace(&mut self.sample, sample)
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn sample_id(&self) -> usize {
        self.sample.id()
    }

    pub fn playhead(&self) -> usize {
        self.playhead
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_releasing(&self) -> bool {
        self.releasing
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Starts fading the voice out. Without a fade it stops at once.
    pub fn release(&mut self, fade_frames: usize) {
        if !self.active || self.releasing {
            return;
        }
        if fade_frames == 0 {
            self.active = false;
        } else {
            self.releasing = true;
            self.ramp_step = -1.0 / fade_frames as f32;
        }
    }

    #[inline]
    fn next_envelope(&mut self) -> f32 {
        let envelope = self.envelope;
        if self.ramp_step != 0.0 {
            self.envelope += self.ramp_step;
            if self.envelope >= 1.0 {
                self.envelope = 1.0;
                self.ramp_step = 0.0;
            } else if self.envelope <= 0.0 {
                self.envelope = 0.0;
                self.ramp_step = 0.0;
                if self.releasing {
                    self.active = false;
                }
            }
        }
        envelope
    }

    /// Returns the next (left, right) frame with the envelope applied and
    /// advances the playhead. Returns None once the voice is inactive.
    #[inline]
    pub fn next_frame(&mut self) -> Option<(f32, f32)> {
        if !self.active {
            return None;
        }
        let total = self.sample.frame_count();
        if self.playhead >= total {
            if self.looping && total > 0 {
                self.playhead %= total;
            } else {
                self.active = false;
                return None;
            }
        }

        let (left, right) = self.sample.frame(self.playhead);
        let envelope = self.next_envelope();
        self.playhead += 1;
        if self.playhead >= total {
            if self.looping {
                self.playhead = 0;
            } else {
                self.active = false;
            }
        }
        Some((left * envelope, right * envelope))
    }

    /// Gives up the sample reference so it can be dropped off the render thread.
    pub fn into_sample(self) -> Arc<SampleEntry> {
        self.sample
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("playhead", &self.playhead)
            .field("active", &self.active)
            .field("releasing", &self.releasing)
            .finish()
    }
}

/// Fixed-capacity set of voices owned by the render thread.
pub struct VoicePool {
    voices: Vec<Voice>,
    max_voices: usize,
    next_id: u64,
}

impl VoicePool {
    pub fn new(max_voices: usize) -> VoicePool {
        let max_voices = max_voices.max(1);
        VoicePool {
            voices: Vec::with_capacity(max_voices),
            max_voices,
            next_id: 0,
        }
    }

    /// Starts a voice for `slot`. With `Cut`, the slot's sounding voices are
    /// released first. Returns a voice stolen to stay under the limit.
    pub fn trigger(
        &mut self,
        slot: usize,
        sample: Arc<SampleEntry>,
        params: &SlotParams,
        fade_frames: usize,
    ) -> Option<Voice> {
        if params.retrigger == RetriggerBehavior::Cut {
            self.release_slot(slot, fade_frames);
        }

        let stolen = if self.voices.len() >= self.max_voices {
            // Prefer voices that are already finished or fading out.
            self.voices
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| (v.active && !v.releasing, v.id))
                .map(|(index, _)| index)
                .map(|index| self.voices.swap_remove(index))
        } else {
            None
        };

        let id = self.next_id;
        self.next_id += 1;
        self.voices
            .push(Voice::new(id, slot, sample, params, fade_frames));
        stolen
    }

    pub fn release_slot(&mut self, slot: usize, fade_frames: usize) {
        self.voices
            .iter_mut()
            .filter(|v| v.slot == slot)
            .for_each(|v| v.release(fade_frames));
    }

    pub fn release_all(&mut self, fade_frames: usize) {
        self.voices.iter_mut().for_each(|v| v.release(fade_frames));
    }

    /// Applies `f` to every voice of `slot`.
    pub fn for_slot(&mut self, slot: usize, f: impl Fn(&mut Voice)) {
        self.voices.iter_mut().filter(|v| v.slot == slot).for_each(f);
    }

    /// Moves the voices of `slot` that play `current` onto `sample`. Voices
    /// still fading out an older sound keep it.
    pub fn rebase_slot(
        &mut self,
        slot: usize,
        current: &Arc<SampleEntry>,
        sample: &Arc<SampleEntry>,
        mut dispose: impl FnMut(Arc<SampleEntry>),
    ) {
        self.voices
            .iter_mut()
            .filter(|v| v.slot == slot && Arc::ptr_eq(&v.sample, current))
            .for_each(|v| dispose(v.rebase(sample.clone())));
    }

    /// Removes voices that finished during a previous pass.
    pub fn retire_inactive(&mut self, mut dispose: impl FnMut(Voice)) {
        let mut index = 0;
        while index < self.voices.len() {
            if self.voices[index].active {
                index += 1;
            } else {
                dispose(self.voices.swap_remove(index));
            }
        }
    }

    /// Removes every voice regardless of state.
    pub fn clear(&mut self, mut dispose: impl FnMut(Voice)) {
        while let Some(voice) = self.voices.pop() {
            dispose(voice);
        }
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    pub fn active_for_slot(&self, slot: usize) -> usize {
        self.voices
            .iter()
            .filter(|v| v.active && v.slot == slot)
            .count()
    }
}

impl std::fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePool")
            .field("voices", &self.voices.len())
            .field("max_voices", &self.max_voices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: usize, frames: usize) -> Arc<SampleEntry> {
        Arc::new(SampleEntry::new(id, vec![1.0; frames], 1, 48000))
    }

    fn params(looping: bool, retrigger: RetriggerBehavior) -> SlotParams {
        SlotParams {
            looping,
            ..SlotParams::new(retrigger)
        }
    }

    fn drain(voice: &mut Voice, frames: usize) -> usize {
        (0..frames).filter_map(|_| voice.next_frame()).count()
    }

    #[test]
    fn test_clamping() {
        assert_eq!(clamp_gain(5.0), 2.0);
        assert_eq!(clamp_gain(-1.0), 0.0);
        assert_eq!(clamp_gain(0.7), 0.7);
        assert_eq!(clamp_gain(f32::NAN), 0.0);
        assert_eq!(clamp_pan(3.0), 1.0);
        assert_eq!(clamp_pan(-3.0), -1.0);
        assert_eq!(clamp_pan(f32::NAN), 0.0);
    }

    #[test]
    fn test_rebase_keeps_position_in_time() {
        let mut voice = Voice::new(0, 0, sample(0, 100), &params(true, RetriggerBehavior::Cut), 0);
        assert_eq!(drain(&mut voice, 40), 40);
        let old = voice.rebase(sample(0, 50));
        assert_eq!(old.frame_count(), 100);
        assert_eq!(voice.playhead(), 20);
        assert!(voice.is_active());
        assert_eq!(drain(&mut voice, 30), 30);
        assert_eq!(voice.playhead(), 50);
    }

    #[test]
    fn test_rebase_slot_skips_older_sounds() {
        let mut pool = VoicePool::new(4);
        let old = sample(0, 100);
        let current = sample(0, 100);
        let polyphonic = params(false, RetriggerBehavior::Polyphonic);
        pool.trigger(0, old.clone(), &polyphonic, 0);
        pool.trigger(0, current.clone(), &polyphonic, 0);
        pool.trigger(1, current.clone(), &polyphonic, 0);

        let conformed = sample(0, 50);
        let mut disposed = 0;
        pool.rebase_slot(0, &current, &conformed, |_| disposed += 1);
        assert_eq!(disposed, 1);
        let rebased: Vec<_> = pool
            .voices()
            .iter()
            .map(|v| Arc::ptr_eq(&v.sample, &conformed))
            .collect();
        assert_eq!(rebased, vec![false, true, false]);
    }

    #[test]
    fn test_empty_looping_sample_is_silent() {
        let mut voice = Voice::new(0, 0, sample(0, 0), &params(true, RetriggerBehavior::Cut), 0);
        assert_eq!(voice.next_frame(), None);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_voice_runs_to_completion() {
        let mut voice = Voice::new(0, 0, sample(0, 100), &SlotParams::default(), 0);
        assert_eq!(drain(&mut voice, 99), 99);
        assert!(voice.is_active());
        assert_eq!(drain(&mut voice, 1), 1);
        assert!(!voice.is_active());
        assert_eq!(voice.next_frame(), None);
    }

    #[test]
    fn test_looping_voice_never_deactivates() {
        let mut voice = Voice::new(
            0,
            0,
            sample(0, 100),
            &params(true, RetriggerBehavior::Cut),
            0,
        );
        assert_eq!(drain(&mut voice, 1050), 1050);
        assert!(voice.is_active());
        assert_eq!(voice.playhead(), 50);

        // Turning looping off lets it finish at the end of the current pass.
        voice.set_looping(false);
        assert_eq!(drain(&mut voice, 100), 50);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_fade_in_and_release() {
        let mut voice = Voice::new(0, 0, sample(0, 1000), &SlotParams::default(), 4);
        let ramp: Vec<f32> = (0..5).map(|_| voice.next_frame().unwrap().0).collect();
        assert_eq!(ramp, vec![0.0, 0.25, 0.5, 0.75, 1.0]);

        voice.release(4);
        assert!(voice.is_releasing());
        let tail: Vec<f32> = (0..4).map(|_| voice.next_frame().unwrap().0).collect();
        assert_eq!(tail, vec![1.0, 0.75, 0.5, 0.25]);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_release_without_fade_stops_immediately() {
        let mut voice = Voice::new(0, 0, sample(0, 1000), &SlotParams::default(), 0);
        voice.release(0);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_retrigger_cut_releases_previous() {
        let mut pool = VoicePool::new(8);
        let cut = params(false, RetriggerBehavior::Cut);
        assert!(pool.trigger(0, sample(0, 100), &cut, 0).is_none());
        assert!(pool.trigger(0, sample(0, 100), &cut, 0).is_none());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.active_for_slot(0), 1);

        let mut retired = Vec::new();
        pool.retire_inactive(|v| retired.push(v.id()));
        assert_eq!(retired, vec![0]);
        assert_eq!(pool.voices()[0].id(), 1);
        assert_eq!(pool.voices()[0].playhead(), 0);
    }

    #[test]
    fn test_retrigger_polyphonic_overlaps() {
        let mut pool = VoicePool::new(8);
        let poly = params(false, RetriggerBehavior::Polyphonic);
        pool.trigger(0, sample(0, 100), &poly, 0);
        pool.trigger(0, sample(0, 100), &poly, 0);
        pool.trigger(1, sample(1, 100), &poly, 0);
        assert_eq!(pool.active_for_slot(0), 2);
        assert_eq!(pool.active_for_slot(1), 1);
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn test_voice_stealing_takes_oldest() {
        let mut pool = VoicePool::new(2);
        let poly = params(false, RetriggerBehavior::Polyphonic);
        assert!(pool.trigger(0, sample(0, 100), &poly, 0).is_none());
        assert!(pool.trigger(1, sample(1, 100), &poly, 0).is_none());
        let stolen = pool.trigger(2, sample(2, 100), &poly, 0).unwrap();
        assert_eq!(stolen.id(), 0);
        assert_eq!(stolen.into_sample().id(), 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_stealing_prefers_releasing_voices() {
        let mut pool = VoicePool::new(2);
        let poly = params(false, RetriggerBehavior::Polyphonic);
        pool.trigger(0, sample(0, 100), &poly, 0);
        pool.trigger(1, sample(1, 100), &poly, 0);
        pool.release_slot(1, 16);
        let stolen = pool.trigger(2, sample(2, 100), &poly, 0).unwrap();
        assert_eq!(stolen.slot(), 1);
    }

    #[test]
    fn test_for_slot_updates_parameters() {
        let mut pool = VoicePool::new(4);
        let poly = params(false, RetriggerBehavior::Polyphonic);
        pool.trigger(0, sample(0, 100), &poly, 0);
        pool.trigger(1, sample(1, 100), &poly, 0);
        pool.for_slot(1, |v| v.set_gain(0.5));
        assert_eq!(pool.voices()[0].gain(), 1.0);
        assert_eq!(pool.voices()[1].gain(), 0.5);

        let mut disposed = 0;
        pool.clear(|_| disposed += 1);
        assert_eq!(disposed, 2);
        assert!(pool.is_empty());
    }
}
