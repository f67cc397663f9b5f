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

//! The render side of the engine. A [`Renderer`] owns every piece of state the
//! audio callback touches and only ever hears about changes through the
//! command queue.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::command::{CommandReceiver, EngineCommand};
use super::mixer::{clip, mix_voices};
use crate::config::RetriggerBehavior;
use crate::effects::{EffectId, EffectRack};
use crate::samples::{SampleEntry, SlotParams, VoicePool};

/// Counters published by the render thread.
#[derive(Debug)]
pub struct RenderStats {
    callbacks: AtomicU64,
    frames: AtomicU64,
    contended: AtomicU64,
    garbage_overflows: AtomicU64,
    active_voices: AtomicUsize,
    slot_voices: Box<[AtomicUsize]>,
}

impl RenderStats {
    pub fn new(slot_count: usize) -> RenderStats {
        RenderStats {
            callbacks: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            garbage_overflows: AtomicU64::new(0),
            active_voices: AtomicUsize::new(0),
            slot_voices: (0..slot_count).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Number of render periods completed, including silent ones.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Periods that were filled with silence because the control side held
    /// the renderer.
    pub fn contended(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    /// Retired values the render thread had to free itself because the
    /// control side was not collecting garbage.
    pub fn garbage_overflows(&self) -> u64 {
        self.garbage_overflows.load(Ordering::Relaxed)
    }

    /// Voices still sounding at the end of the last period.
    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }

    pub fn slot_active_voices(&self, slot: usize) -> usize {
        self.slot_voices
            .get(slot)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn publish(&self, frames: usize, voices: &VoicePool, garbage_overflows: u64) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        self.garbage_overflows
            .store(garbage_overflows, Ordering::Relaxed);
        self.active_voices
            .store(voices.active_count(), Ordering::Relaxed);
        for (slot, count) in self.slot_voices.iter().enumerate() {
            count.store(voices.active_for_slot(slot), Ordering::Relaxed);
        }
    }
}

struct RenderSlot {
    sample: Option<Arc<SampleEntry>>,
    params: SlotParams,
}

/// Render-thread state: loaded samples per slot, the voice pool and the
/// effect rack.
pub struct Renderer {
    commands: CommandReceiver,
    slots: Vec<RenderSlot>,
    voices: VoicePool,
    rack: EffectRack,
    fade_frames: usize,
    muted: bool,
    stats: Arc<RenderStats>,
}

impl Renderer {
    pub fn new(
        commands: CommandReceiver,
        slot_count: usize,
        max_voices: usize,
        fade_frames: usize,
        retrigger: RetriggerBehavior,
        stats: Arc<RenderStats>,
    ) -> Renderer {
        Renderer {
            commands,
            slots: (0..slot_count)
                .map(|_| RenderSlot {
                    sample: None,
                    params: SlotParams::new(retrigger),
                })
                .collect(),
            voices: VoicePool::new(max_voices),
            rack: EffectRack::new(),
            fade_frames,
            muted: false,
            stats,
        }
    }

    /// Renders one period of interleaved audio into `output`. Never allocates
    /// and never blocks.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        let commands = &mut self.commands;
        self.voices.retire_inactive(|voice| commands.retire(voice));

        while let Some(command) = self.commands.pop() {
            self.apply(command);
        }
        self.rack.apply_staged();

        output.fill(0.0);
        mix_voices(self.voices.voices_mut(), output, channels);
        self.rack.process(output, channels);
        if self.muted {
            output.fill(0.0);
        }
        clip(output);

        self.stats.publish(
            output.len() / channels.max(1),
            &self.voices,
            self.commands.garbage_overflows(),
        );
    }

    fn apply(&mut self, command: EngineCommand) {
        let fade = self.fade_frames;
        match command {
            EngineCommand::LoadSample { slot, sample } => {
                let Some(render_slot) = self.slots.get_mut(slot) else {
                    self.commands.retire(sample);
                    return;
                };
                self.voices.release_slot(slot, fade);
                if let Some(old) = render_slot.sample.replace(sample) {
                    self.commands.retire(old);
                }
            }
            EngineCommand::ConformSample { slot, sample } => {
                let Some(render_slot) = self.slots.get_mut(slot) else {
                    self.commands.retire(sample);
                    return;
                };
                let commands = &mut self.commands;
                if let Some(current) = render_slot.sample.as_ref() {
                    self.voices
                        .rebase_slot(slot, current, &sample, |old| commands.retire(old));
                }
                if let Some(old) = render_slot.sample.replace(sample) {
                    commands.retire(old);
                }
            }
            EngineCommand::UnloadSample { slot } => {
                self.voices.release_slot(slot, 0);
                if let Some(old) = self.slots.get_mut(slot).and_then(|s| s.sample.take()) {
                    self.commands.retire(old);
                }
            }
            EngineCommand::Trigger { slot } => {
                let Some(render_slot) = self.slots.get(slot) else {
                    return;
                };
                let Some(sample) = render_slot.sample.clone() else {
                    return;
                };
                let params = render_slot.params;
                if let Some(stolen) = self.voices.trigger(slot, sample, &params, fade) {
                    self.commands.retire(stolen);
                }
            }
            EngineCommand::Stop { slot } => self.voices.release_slot(slot, fade),
            EngineCommand::StopAll => self.voices.release_all(fade),
            EngineCommand::SetGain { slot, gain } => {
                if let Some(render_slot) = self.slots.get_mut(slot) {
                    render_slot.params.gain = gain;
                    self.voices.for_slot(slot, |voice| voice.set_gain(gain));
                }
            }
            EngineCommand::SetPan { slot, pan } => {
                if let Some(render_slot) = self.slots.get_mut(slot) {
                    render_slot.params.pan = pan;
                    self.voices.for_slot(slot, |voice| voice.set_pan(pan));
                }
            }
            EngineCommand::SetLooping { slot, looping } => {
                if let Some(render_slot) = self.slots.get_mut(slot) {
                    render_slot.params.looping = looping;
                    self.voices.for_slot(slot, |voice| voice.set_looping(looping));
                }
            }
            EngineCommand::SetRetrigger { slot, retrigger } => {
                if let Some(render_slot) = self.slots.get_mut(slot) {
                    render_slot.params.retrigger = retrigger;
                }
            }
            EngineCommand::AddEffect(entry) => {
                if let Err(entry) = self.rack.push(entry) {
                    self.commands.retire(entry);
                }
            }
            EngineCommand::RemoveEffect { position } => {
                if let Some(entry) = self.rack.remove(position) {
                    self.commands.retire(entry);
                }
            }
            EngineCommand::RotateEffect { from, to } => self.rack.rotate(from, to),
            EngineCommand::EnableEffect { position, enabled } => {
                self.rack.set_enabled(position, enabled)
            }
            EngineCommand::SetEffectParams { position, values } => {
                self.rack.stage(position, values)
            }
            EngineCommand::ClearEffects => {
                let commands = &mut self.commands;
                self.rack.drain(|entry| commands.retire(entry));
            }
            EngineCommand::SetMuted(muted) => self.muted = muted,
            EngineCommand::SetFadeFrames(frames) => self.fade_frames = frames,
        }
    }

    pub fn voices(&self) -> &VoicePool {
        &self.voices
    }

    pub fn slot_params(&self, slot: usize) -> Option<SlotParams> {
        self.slots.get(slot).map(|s| s.params)
    }

    pub fn slot_sample(&self, slot: usize) -> Option<&Arc<SampleEntry>> {
        self.slots.get(slot).and_then(|s| s.sample.as_ref())
    }

    /// Effect order as the rack sees it.
    pub fn effect_ids(&self) -> Vec<EffectId> {
        self.rack.ids().collect()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

/// The shareable handle backends render through.
#[derive(Clone)]
pub struct RenderHandle {
    renderer: Arc<Mutex<Renderer>>,
    stats: Arc<RenderStats>,
}

impl RenderHandle {
    pub fn new(renderer: Renderer) -> RenderHandle {
        let stats = renderer.stats.clone();
        RenderHandle {
            renderer: Arc::new(Mutex::new(renderer)),
            stats,
        }
    }

    /// Called from the audio callback. If the control side is holding the
    /// renderer the period is silent rather than late.
    #[inline]
    pub fn render(&self, output: &mut [f32], channels: usize) {
        match self.renderer.try_lock() {
            Some(mut renderer) => renderer.render(output, channels),
            None => {
                output.fill(0.0);
                self.stats.contended.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Locks the renderer for inspection from the control side. Callbacks
    /// arriving meanwhile render silence.
    pub fn lock(&self) -> MutexGuard<'_, Renderer> {
        self.renderer.lock()
    }

    pub fn stats(&self) -> &Arc<RenderStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::command::{command_queue, CommandSender};
    use crate::effects::{description, EffectChain, RackEntry, MAX_EFFECTS};

    fn setup(slots: usize, max_voices: usize) -> (CommandSender, RenderHandle) {
        let (tx, rx) = command_queue(64, max_voices);
        let stats = Arc::new(RenderStats::new(slots));
        let renderer = Renderer::new(rx, slots, max_voices, 0, RetriggerBehavior::Cut, stats);
        (tx, RenderHandle::new(renderer))
    }

    fn sample(id: usize, data: Vec<f32>) -> Arc<SampleEntry> {
        Arc::new(SampleEntry::new(id, data, 1, 48000))
    }

    fn render(handle: &RenderHandle, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * 2];
        handle.render(&mut output, 2);
        output
    }

    #[test]
    fn test_trigger_plays_and_retires() {
        let (mut tx, handle) = setup(2, 4);
        tx.send(EngineCommand::LoadSample {
            slot: 0,
            sample: sample(0, vec![0.5, 0.5, 0.5]),
        });
        tx.send(EngineCommand::Trigger { slot: 0 });

        let output = render(&handle, 2);
        assert_eq!(output, vec![0.25, 0.25, 0.25, 0.25]);
        assert_eq!(handle.stats().slot_active_voices(0), 1);

        let output = render(&handle, 2);
        assert_eq!(output, vec![0.25, 0.25, 0.0, 0.0]);
        assert_eq!(handle.stats().active_voices(), 0);
        // Finished voices leave the pool on the following pass.
        assert_eq!(handle.lock().voices().len(), 1);
        render(&handle, 2);
        assert_eq!(handle.lock().voices().len(), 0);
        assert_eq!(handle.stats().callbacks(), 3);
        assert_eq!(handle.stats().frames_rendered(), 6);
    }

    #[test]
    fn test_trigger_without_sample_is_ignored() {
        let (mut tx, handle) = setup(2, 4);
        tx.send(EngineCommand::Trigger { slot: 1 });
        tx.send(EngineCommand::Trigger { slot: 7 });
        assert_eq!(render(&handle, 4), vec![0.0; 8]);
        assert!(handle.lock().voices().is_empty());
    }

    #[test]
    fn test_slot_params_apply_to_new_and_sounding_voices() {
        let (mut tx, handle) = setup(1, 4);
        tx.send(EngineCommand::LoadSample {
            slot: 0,
            sample: sample(0, vec![1.0; 8]),
        });
        tx.send(EngineCommand::SetPan { slot: 0, pan: -1.0 });
        tx.send(EngineCommand::Trigger { slot: 0 });
        assert_eq!(render(&handle, 1), vec![1.0, 0.0]);

        tx.send(EngineCommand::SetGain { slot: 0, gain: 0.5 });
        tx.send(EngineCommand::SetPan { slot: 0, pan: 1.0 });
        assert_eq!(render(&handle, 1), vec![0.0, 0.5]);
        assert_eq!(handle.lock().slot_params(0).map(|p| p.gain), Some(0.5));
    }

    #[test]
    fn test_stop_and_stop_all() {
        let (mut tx, handle) = setup(2, 4);
        for slot in 0..2 {
            tx.send(EngineCommand::LoadSample {
                slot,
                sample: sample(slot, vec![0.1; 64]),
            });
            tx.send(EngineCommand::Trigger { slot });
        }
        render(&handle, 4);
        assert_eq!(handle.stats().active_voices(), 2);

        tx.send(EngineCommand::Stop { slot: 0 });
        render(&handle, 4);
        assert_eq!(handle.stats().slot_active_voices(0), 0);
        assert_eq!(handle.stats().slot_active_voices(1), 1);

        tx.send(EngineCommand::StopAll);
        assert_eq!(render(&handle, 4), vec![0.0; 8]);
        assert_eq!(handle.stats().active_voices(), 0);
    }

    #[test]
    fn test_unload_silences_and_returns_sample() {
        let (mut tx, handle) = setup(1, 4);
        let entry = sample(0, vec![0.5; 64]);
        tx.send(EngineCommand::LoadSample {
            slot: 0,
            sample: entry.clone(),
        });
        tx.send(EngineCommand::Trigger { slot: 0 });
        render(&handle, 4);

        tx.send(EngineCommand::UnloadSample { slot: 0 });
        assert_eq!(render(&handle, 4), vec![0.0; 8]);
        render(&handle, 4);
        assert!(handle.lock().slot_sample(0).is_none());

        tx.collect_garbage();
        assert_eq!(Arc::strong_count(&entry), 1);
    }

    #[test]
    fn test_voice_stealing_hands_back_stolen_voice() {
        let (mut tx, handle) = setup(3, 2);
        for slot in 0..3 {
            tx.send(EngineCommand::LoadSample {
                slot,
                sample: sample(slot, vec![0.1; 64]),
            });
        }
        for slot in 0..3 {
            tx.send(EngineCommand::Trigger { slot });
        }
        render(&handle, 1);
        assert_eq!(handle.stats().active_voices(), 2);
        assert_eq!(handle.stats().slot_active_voices(0), 0);
        assert!(tx.collect_garbage() >= 1);
    }

    #[test]
    fn test_conform_sample_keeps_voices_sounding() {
        let (mut tx, handle) = setup(1, 4);
        tx.send(EngineCommand::LoadSample {
            slot: 0,
            sample: sample(0, vec![0.5; 64]),
        });
        tx.send(EngineCommand::Trigger { slot: 0 });
        render(&handle, 16);

        let conformed = Arc::new(SampleEntry::new(0, vec![0.5; 32], 1, 24000));
        tx.send(EngineCommand::ConformSample {
            slot: 0,
            sample: conformed.clone(),
        });
        assert_eq!(render(&handle, 1), vec![0.25, 0.25]);
        {
            let renderer = handle.lock();
            assert!(Arc::ptr_eq(renderer.slot_sample(0).unwrap(), &conformed));
            let voice = &renderer.voices().voices()[0];
            assert!(voice.is_active());
            assert_eq!(voice.playhead(), 9);
        }
        // The slot's old entry and the voice's clone of it.
        assert_eq!(tx.collect_garbage(), 2);
    }

    #[test]
    fn test_uncollected_garbage_is_counted() {
        let (_tx, rx) = command_queue(1, 0);
        let stats = Arc::new(RenderStats::new(1));
        let handle = RenderHandle::new(Renderer::new(
            rx,
            1,
            1,
            0,
            RetriggerBehavior::Cut,
            stats,
        ));
        render(&handle, 1);
        assert_eq!(handle.stats().garbage_overflows(), 0);

        // Nothing collects on the control side meanwhile.
        let ring = 2 + MAX_EFFECTS;
        {
            let mut renderer = handle.lock();
            for _ in 0..ring + 1 {
                renderer.commands.retire(sample(0, vec![0.5; 4]));
            }
        }
        render(&handle, 1);
        assert_eq!(handle.stats().garbage_overflows(), 1);
    }

    #[test]
    fn test_effect_commands_mirror_chain() {
        let (mut tx, handle) = setup(1, 4);
        let mut chain = EffectChain::new();
        for id in [0, 3, 1] {
            let instance = chain.add(id).unwrap();
            let desc = description(id).unwrap();
            let unit = desc.build(&instance.param_values(), 48000);
            tx.send(EngineCommand::AddEffect(RackEntry::new(
                instance.id(),
                true,
                unit,
            )));
        }
        chain.rotate(2, 0).unwrap();
        tx.send(EngineCommand::RotateEffect { from: 2, to: 0 });
        chain.remove(1).unwrap();
        tx.send(EngineCommand::RemoveEffect { position: 1 });
        render(&handle, 1);
        assert_eq!(handle.lock().effect_ids(), chain.order());

        tx.send(EngineCommand::ClearEffects);
        render(&handle, 1);
        assert!(handle.lock().effect_ids().is_empty());
        // The removed entry was already collected by the last send.
        assert_eq!(tx.collect_garbage(), 2);
    }

    #[test]
    fn test_effect_params_apply_at_period_start() {
        let (mut tx, handle) = setup(1, 4);
        let mut chain = EffectChain::new();
        let instance = chain.add(3).unwrap();
        let unit = description(3)
            .unwrap()
            .build(&instance.param_values(), 48000);
        tx.send(EngineCommand::AddEffect(RackEntry::new(
            instance.id(),
            true,
            unit,
        )));
        tx.send(EngineCommand::LoadSample {
            slot: 0,
            sample: sample(0, vec![0.5; 64]),
        });
        tx.send(EngineCommand::SetPan { slot: 0, pan: -1.0 });
        tx.send(EngineCommand::Trigger { slot: 0 });
        let values = chain.set_parameter(0, 0, -6.0206).unwrap();
        assert!((values - -6.0206).abs() < 1e-6);
        tx.send(EngineCommand::SetEffectParams {
            position: 0,
            values: chain.get(0).unwrap().param_values(),
        });
        let output = render(&handle, 2);
        assert!((output[0] - 0.25).abs() < 1e-4);
        assert!((output[2] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_muted_outputs_silence() {
        let (mut tx, handle) = setup(1, 4);
        tx.send(EngineCommand::LoadSample {
            slot: 0,
            sample: sample(0, vec![0.5; 64]),
        });
        tx.send(EngineCommand::Trigger { slot: 0 });
        tx.send(EngineCommand::SetMuted(true));
        assert_eq!(render(&handle, 4), vec![0.0; 8]);
        assert_eq!(handle.stats().active_voices(), 1);
        tx.send(EngineCommand::SetMuted(false));
        assert_ne!(render(&handle, 4), vec![0.0; 8]);
    }

    #[test]
    fn test_output_is_clipped() {
        let (mut tx, handle) = setup(2, 4);
        for slot in 0..2 {
            tx.send(EngineCommand::LoadSample {
                slot,
                sample: sample(slot, vec![0.9; 8]),
            });
            tx.send(EngineCommand::SetGain { slot, gain: 2.0 });
            tx.send(EngineCommand::Trigger { slot });
        }
        assert_eq!(render(&handle, 1), vec![1.0, 1.0]);
    }

    #[test]
    fn test_contended_period_is_silent() {
        let (mut tx, handle) = setup(1, 4);
        tx.send(EngineCommand::LoadSample {
            slot: 0,
            sample: sample(0, vec![0.5; 64]),
        });
        tx.send(EngineCommand::Trigger { slot: 0 });
        let guard = handle.lock();
        let mut output = vec![1.0; 8];
        handle.render(&mut output, 2);
        drop(guard);
        assert_eq!(output, vec![0.0; 8]);
        assert_eq!(handle.stats().contended(), 1);
        assert_eq!(handle.stats().callbacks(), 0);
    }
}
