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

//! The engine facade. Every call here runs on a control thread and reaches
//! the render thread only through the command queue, so callers never wait
//! on audio and audio never waits on callers.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, MutexGuard};
use tracing::{info, span, warn, Level, Span};

use crate::audio::{
    backend_for, command_queue, AudioBackend, CommandSender, EngineCommand, EngineNotification,
    PerformanceMode, RecoveryPolicy, RecoveryStatus, RecoverySupervisor, RenderHandle,
    RenderStats, Renderer, RestartHook, StreamConfig, StreamController, StreamState,
};
use crate::config::{EngineConfig, Kit, RetriggerBehavior};
use crate::effects::{
    effect_descriptions, find_description, EffectChain, EffectDescription, EffectId, EffectInstance,
    ParamValues, RackEntry,
};
use crate::error::{check_index, EngineError, IndexKind};
use crate::samples::{clamp_gain, clamp_pan, SampleBank, SlotParams};

/// Control-side state. Shared with the recovery supervisor, which conforms it
/// after restarting the stream itself. Never lock the stream controller while
/// holding this.
struct ControlState {
    bank: SampleBank,
    /// Control-side copy of what the renderer holds per slot.
    slots: Vec<SlotParams>,
    chain: EffectChain,
    commands: CommandSender,
    negotiated_rate: Arc<AtomicU32>,
    fade_ms: f32,
}

/// Everything that exists between `create` and `destroy`.
struct EngineContext {
    control: Arc<Mutex<ControlState>>,
    controller: Arc<Mutex<StreamController>>,
    supervisor: RecoverySupervisor,
    renderer: RenderHandle,
    notifications: Receiver<EngineNotification>,
}

impl ControlState {
    fn send(&mut self, command: EngineCommand) {
        self.sync_stream_rate();
        self.commands.send(command);
    }

    /// If the stream came back at a different rate (reconfiguration or
    /// recovery onto another device), re-derive samples and effect units
    /// for it before anything else is sent.
    fn sync_stream_rate(&mut self) {
        let rate = self.negotiated_rate.load(Ordering::Acquire);
        if rate == self.bank.stream_rate() {
            return;
        }
        info!(
            from = self.bank.stream_rate(),
            to = rate,
            "Stream rate changed, conforming samples and effects"
        );
        for sample in self.bank.set_stream_rate(rate) {
            self.commands.send(EngineCommand::ConformSample {
                slot: sample.id(),
                sample,
            });
        }
        self.commands
            .send(EngineCommand::SetFadeFrames(fade_frames(self.fade_ms, rate)));
        self.commands.send(EngineCommand::ClearEffects);
        for instance in self.chain.instances() {
            let unit = instance
                .description()
                .build(&instance.param_values(), rate);
            self.commands.send(EngineCommand::AddEffect(RackEntry::new(
                instance.id(),
                instance.enabled(),
                unit,
            )));
        }
    }

    fn slot(&self, slot: usize) -> Result<&SlotParams, EngineError> {
        check_index(IndexKind::VoiceSlot, slot, self.slots.len())?;
        Ok(&self.slots[slot])
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut SlotParams, EngineError> {
        check_index(IndexKind::VoiceSlot, slot, self.slots.len())?;
        Ok(&mut self.slots[slot])
    }

    fn push_effect(&mut self, instance: &EffectInstance) -> EffectId {
        let unit = instance
            .description()
            .build(&instance.param_values(), self.bank.stream_rate());
        self.commands.send(EngineCommand::AddEffect(RackEntry::new(
            instance.id(),
            instance.enabled(),
            unit,
        )));
        instance.id()
    }
}

fn fade_frames(fade_ms: f32, sample_rate: u32) -> usize {
    (fade_ms * sample_rate as f32 / 1000.0).round() as usize
}

/// A low-latency sample playback and effects engine.
pub struct Engine {
    config: EngineConfig,
    /// Held while the engine is not created.
    backend: Option<Box<dyn AudioBackend>>,
    context: Option<EngineContext>,
    span: Span,
}

impl Engine {
    /// Creates an engine that will open its stream on `backend`. Nothing is
    /// opened until [`Engine::create`].
    pub fn new(config: EngineConfig, backend: Box<dyn AudioBackend>) -> Engine {
        Engine {
            config,
            backend: Some(backend),
            context: None,
            span: span!(Level::INFO, "engine"),
        }
    }

    /// Creates an engine with the backend the configuration selects.
    pub fn from_config(config: EngineConfig) -> Result<Engine, EngineError> {
        let backend = backend_for(config.stream())?;
        Ok(Engine::new(config, backend))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens and starts the output stream. Does nothing if already created.
    pub fn create(&mut self) -> Result<(), EngineError> {
        let _enter = self.span.enter();
        if self.context.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let policy = RecoveryPolicy::from_settings(self.config.recovery())?;
        let backend = self.backend.take().ok_or_else(|| {
            EngineError::DeviceUnavailable("audio backend is no longer available".to_string())
        })?;

        let voices = self.config.voices();
        let slot_count = voices.slots();
        let requested = self.config.stream().stream_config();

        let (commands, receiver) =
            command_queue(self.config.command_queue_capacity(), voices.max_voices());
        let stats = Arc::new(RenderStats::new(slot_count));
        let renderer = RenderHandle::new(Renderer::new(
            receiver,
            slot_count,
            voices.max_voices(),
            fade_frames(voices.fade_ms(), requested.sample_rate),
            voices.retrigger(),
            stats,
        ));

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut controller =
            StreamController::new(backend, requested.clone(), renderer.clone(), events_tx);
        let opened = controller
            .open(requested)
            .and_then(|actual| controller.start().map(|_| actual));
        let actual = match opened {
            Ok(actual) => actual,
            Err(e) => {
                self.backend = Some(controller.into_backend());
                return Err(e);
            }
        };

        let mut control = ControlState {
            bank: SampleBank::new(slot_count, actual.sample_rate),
            slots: vec![SlotParams::new(voices.retrigger()); slot_count],
            chain: EffectChain::new(),
            commands,
            negotiated_rate: controller.negotiated_rate(),
            fade_ms: voices.fade_ms(),
        };
        control.send(EngineCommand::SetFadeFrames(fade_frames(
            control.fade_ms,
            actual.sample_rate,
        )));
        let control = Arc::new(Mutex::new(control));

        let controller = Arc::new(Mutex::new(controller));
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        let on_restart: RestartHook = {
            let control = control.clone();
            Box::new(move |_: &StreamConfig| control.lock().sync_stream_rate())
        };
        let supervisor = RecoverySupervisor::spawn(
            controller.clone(),
            events_rx,
            policy,
            notify_tx,
            Some(on_restart),
        );

        self.context = Some(EngineContext {
            control,
            controller,
            supervisor,
            renderer,
            notifications: notify_rx,
        });

        info!(
            sample_rate = actual.sample_rate,
            frames_per_burst = actual.frames_per_burst,
            slots = slot_count,
            "Engine created"
        );
        Ok(())
    }

    /// Stops everything and releases the stream. Safe to call at any time,
    /// including on an engine that was never created.
    pub fn destroy(&mut self) {
        let _enter = self.span.enter();
        let Some(context) = self.context.take() else {
            return;
        };
        let EngineContext {
            controller,
            mut supervisor,
            ..
        } = context;
        supervisor.shutdown();
        drop(supervisor);

        match Arc::try_unwrap(controller) {
            Ok(controller) => self.backend = Some(controller.into_inner().into_backend()),
            Err(controller) => {
                controller.lock().close();
                warn!("Stream controller still shared, backend not recovered");
            }
        }
        info!("Engine destroyed");
    }

    pub fn is_created(&self) -> bool {
        self.context.is_some()
    }

    fn context(&self) -> Result<&EngineContext, EngineError> {
        self.context.as_ref().ok_or(EngineError::EngineNotReady)
    }

    fn control(&self) -> Result<MutexGuard<'_, ControlState>, EngineError> {
        Ok(self.context()?.control.lock())
    }

    /// The static effect catalog, indexed by description id.
    pub fn effect_descriptions(&self) -> &'static [EffectDescription] {
        effect_descriptions()
    }

    /// Appends an effect with its default parameters.
    pub fn add_default_effect(&mut self, description_id: usize) -> Result<EffectId, EngineError> {
        let mut control = self.control()?;
        control.sync_stream_rate();
        let instance = control.chain.add(description_id)?.clone();
        let id = control.push_effect(&instance);
        info!(
            effect = instance.description().name,
            position = instance.position(),
            "Added effect"
        );
        Ok(id)
    }

    /// Appends an effect with explicit parameters, clamped to its ranges.
    pub fn add_effect(
        &mut self,
        description_id: usize,
        params: &[f32],
        enabled: bool,
    ) -> Result<EffectId, EngineError> {
        let mut control = self.control()?;
        control.sync_stream_rate();
        let instance = control
            .chain
            .add_with_params(description_id, params, enabled)?
            .clone();
        Ok(control.push_effect(&instance))
    }

    pub fn remove_effect(&mut self, position: usize) -> Result<(), EngineError> {
        let mut control = self.control()?;
        let removed = control.chain.remove(position)?;
        control.send(EngineCommand::RemoveEffect { position });
        info!(effect = removed.description().name, position, "Removed effect");
        Ok(())
    }

    /// Moves the effect at `from` to `to`, as a single splice.
    pub fn rotate_effect(&mut self, from: usize, to: usize) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.chain.rotate(from, to)?;
        if from != to {
            control.send(EngineCommand::RotateEffect { from, to });
        }
        Ok(())
    }

    pub fn enable_effect(&mut self, position: usize, enabled: bool) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.chain.set_enabled(position, enabled)?;
        control.send(EngineCommand::EnableEffect { position, enabled });
        Ok(())
    }

    /// Replaces an effect's parameters. Values are clamped; the stored values
    /// are returned.
    pub fn set_effect_params(
        &mut self,
        position: usize,
        values: &[f32],
    ) -> Result<ParamValues, EngineError> {
        let mut control = self.control()?;
        let values = control.chain.set_params(position, values)?;
        control.send(EngineCommand::SetEffectParams { position, values });
        Ok(values)
    }

    /// Sets one effect parameter and returns the clamped value.
    pub fn set_effect_parameter(
        &mut self,
        position: usize,
        param_index: usize,
        value: f32,
    ) -> Result<f32, EngineError> {
        let mut control = self.control()?;
        let value = control.chain.set_parameter(position, param_index, value)?;
        let values = control.chain.instances()[position].param_values();
        control.send(EngineCommand::SetEffectParams { position, values });
        Ok(value)
    }

    pub fn clear_effects(&mut self) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.chain.clear();
        control.send(EngineCommand::ClearEffects);
        Ok(())
    }

    /// The authoritative effect order, for callers that must re-read it after
    /// editing.
    pub fn effect_chain(&self) -> Result<Vec<EffectInstance>, EngineError> {
        Ok(self.control()?.chain.instances().to_vec())
    }

    /// With passthrough disabled the output is muted; voices keep playing.
    pub fn set_passthrough(&mut self, enabled: bool) -> Result<(), EngineError> {
        self.control()?.send(EngineCommand::SetMuted(!enabled));
        Ok(())
    }

    /// Loads every pad of a kit into the slot matching its index, then appends
    /// the kit's effects. Effects with unknown names are skipped.
    pub fn load_kit(&mut self, kit: &Kit) -> Result<(), EngineError> {
        for (slot, pad) in kit.pads().iter().enumerate() {
            self.load_sample_file(slot, pad.file())?;
            self.set_gain(slot, pad.gain())?;
            self.set_pan(slot, pad.pan())?;
            self.set_looping(slot, pad.looping())?;
            if let Some(retrigger) = pad.retrigger() {
                self.set_retrigger(slot, retrigger)?;
            }
        }
        for effect in kit.effects() {
            match find_description(effect.name()) {
                Some(description) => {
                    self.add_effect(description.id, effect.params(), effect.enabled())?;
                }
                None => warn!(effect = effect.name(), "Unknown effect in kit, skipping"),
            }
        }
        info!(
            pads = kit.pads().len(),
            effects = kit.effects().len(),
            "Loaded kit"
        );
        Ok(())
    }

    /// Decodes WAV bytes into `slot`, replacing what was there.
    pub fn load_sample_wav(&mut self, slot: usize, bytes: &[u8]) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.sync_stream_rate();
        let sample = control.bank.load_wav(slot, bytes)?;
        control.send(EngineCommand::LoadSample { slot, sample });
        Ok(())
    }

    pub fn load_sample_file(&mut self, slot: usize, path: &Path) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.sync_stream_rate();
        let sample = control.bank.load_file(slot, path)?;
        control.send(EngineCommand::LoadSample { slot, sample });
        Ok(())
    }

    pub fn unload_sample(&mut self, slot: usize) -> Result<(), EngineError> {
        let mut control = self.control()?;
        if control.bank.unload(slot)? {
            control.send(EngineCommand::UnloadSample { slot });
        }
        Ok(())
    }

    /// Empties every slot. Sounding voices stop at once.
    pub fn unload_samples(&mut self) -> Result<(), EngineError> {
        let mut control = self.control()?;
        for slot in 0..control.bank.slot_count() {
            if control.bank.is_loaded(slot) {
                control.send(EngineCommand::UnloadSample { slot });
            }
        }
        control.bank.unload_all();
        Ok(())
    }

    pub fn is_loaded(&self, slot: usize) -> Result<bool, EngineError> {
        let control = self.control()?;
        check_index(IndexKind::VoiceSlot, slot, control.slots.len())?;
        Ok(control.bank.is_loaded(slot))
    }

    /// Starts the sample in `slot`. Triggering an empty slot is silent.
    pub fn trigger(&mut self, slot: usize) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.slot(slot)?;
        control.send(EngineCommand::Trigger { slot });
        Ok(())
    }

    /// Fades out every voice of `slot`.
    pub fn stop_trigger(&mut self, slot: usize) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.slot(slot)?;
        control.send(EngineCommand::Stop { slot });
        Ok(())
    }

    pub fn stop_all(&mut self) -> Result<(), EngineError> {
        self.control()?.send(EngineCommand::StopAll);
        Ok(())
    }

    /// Whether `slot` had a sounding voice at the end of the last rendered
    /// period.
    pub fn is_playing(&self, slot: usize) -> Result<bool, EngineError> {
        self.control()?.slot(slot)?;
        Ok(self.context()?.renderer.stats().slot_active_voices(slot) > 0)
    }

    /// Sets the slot's pan, clamped to [-1, 1].
    pub fn set_pan(&mut self, slot: usize, pan: f32) -> Result<(), EngineError> {
        let mut control = self.control()?;
        let pan = clamp_pan(pan);
        control.slot_mut(slot)?.pan = pan;
        control.send(EngineCommand::SetPan { slot, pan });
        Ok(())
    }

    pub fn get_pan(&self, slot: usize) -> Result<f32, EngineError> {
        Ok(self.control()?.slot(slot)?.pan)
    }

    /// Sets the slot's gain, clamped to [0, 2].
    pub fn set_gain(&mut self, slot: usize, gain: f32) -> Result<(), EngineError> {
        let mut control = self.control()?;
        let gain = clamp_gain(gain);
        control.slot_mut(slot)?.gain = gain;
        control.send(EngineCommand::SetGain { slot, gain });
        Ok(())
    }

    pub fn get_gain(&self, slot: usize) -> Result<f32, EngineError> {
        Ok(self.control()?.slot(slot)?.gain)
    }

    pub fn set_looping(&mut self, slot: usize, looping: bool) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.slot_mut(slot)?.looping = looping;
        control.send(EngineCommand::SetLooping { slot, looping });
        Ok(())
    }

    pub fn is_looping(&self, slot: usize) -> Result<bool, EngineError> {
        Ok(self.control()?.slot(slot)?.looping)
    }

    pub fn set_retrigger(
        &mut self,
        slot: usize,
        retrigger: RetriggerBehavior,
    ) -> Result<(), EngineError> {
        let mut control = self.control()?;
        control.slot_mut(slot)?.retrigger = retrigger;
        control.send(EngineCommand::SetRetrigger { slot, retrigger });
        Ok(())
    }

    pub fn retrigger(&self, slot: usize) -> Result<RetriggerBehavior, EngineError> {
        Ok(self.control()?.slot(slot)?.retrigger)
    }

    /// Reconfigures the stream for `mode`. A running stream is stopped,
    /// reopened and started again.
    pub fn set_performance_mode(&mut self, mode: PerformanceMode) -> Result<(), EngineError> {
        let context = self.context()?;
        context.controller.lock().set_performance_mode(mode)?;
        context.control.lock().sync_stream_rate();
        Ok(())
    }

    /// Requests a buffer size and returns the size in effect.
    pub fn set_buffer_size_in_frames(&mut self, frames: u32) -> Result<u32, EngineError> {
        let context = self.context()?;
        let actual = context.controller.lock().set_buffer_size_in_frames(frames)?;
        context.control.lock().sync_stream_rate();
        Ok(actual)
    }

    pub fn buffer_capacity_in_frames(&self) -> Result<u32, EngineError> {
        self.context()?
            .controller
            .lock()
            .buffer_capacity_in_frames()
            .ok_or(EngineError::StreamDisconnected)
    }

    /// Requests the MMap path and returns whether it ended up in use.
    pub fn set_mmap_enabled(&mut self, enabled: bool) -> Result<bool, EngineError> {
        let context = self.context()?;
        let actual = context.controller.lock().set_mmap_enabled(enabled)?;
        context.control.lock().sync_stream_rate();
        Ok(actual)
    }

    pub fn is_mmap_supported(&self) -> Result<bool, EngineError> {
        Ok(self.context()?.controller.lock().is_mmap_supported())
    }

    pub fn is_mmap_enabled(&self) -> Result<bool, EngineError> {
        Ok(self
            .context()?
            .controller
            .lock()
            .actual_config()
            .is_some_and(|config| config.mmap_enabled))
    }

    /// The negotiated config of the open stream, or the requested one while
    /// no stream is open.
    pub fn stream_config(&self) -> Result<StreamConfig, EngineError> {
        let context = self.context()?;
        let controller = context.controller.lock();
        Ok(controller
            .actual_config()
            .unwrap_or_else(|| controller.requested_config())
            .clone())
    }

    pub fn stream_state(&self) -> Result<StreamState, EngineError> {
        Ok(self.context()?.controller.lock().state())
    }

    /// Whether the stream was reset after a disconnect since the flag was
    /// last cleared.
    pub fn get_output_reset(&self) -> Result<bool, EngineError> {
        Ok(self.context()?.supervisor.status().output_reset())
    }

    pub fn clear_output_reset(&self) -> Result<(), EngineError> {
        self.context()?.supervisor.status().clear_output_reset();
        Ok(())
    }

    /// Closes, reopens and starts the stream.
    pub fn restart_stream(&mut self) -> Result<StreamConfig, EngineError> {
        let context = self.context()?;
        let actual = context.controller.lock().restart()?;
        context.control.lock().sync_stream_rate();
        Ok(actual)
    }

    /// Called by the platform when an audio device is added or removed.
    pub fn on_audio_devices_changed(&self) -> Result<(), EngineError> {
        self.context()?.supervisor.on_device_change();
        Ok(())
    }

    /// Returns the next pending notification, if any.
    pub fn poll_notification(&self) -> Option<EngineNotification> {
        self.context
            .as_ref()
            .and_then(|context| context.notifications.try_recv().ok())
    }

    pub fn stats(&self) -> Result<Arc<RenderStats>, EngineError> {
        Ok(self.context()?.renderer.stats().clone())
    }

    pub fn recovery_status(&self) -> Result<Arc<RecoveryStatus>, EngineError> {
        Ok(self.context()?.supervisor.status().clone())
    }

    /// Bytes held by decoded samples.
    pub fn sample_memory_usage(&self) -> Result<usize, EngineError> {
        Ok(self.control()?.bank.memory_usage())
    }

    #[cfg(test)]
    pub(crate) fn renderer(&self) -> Result<RenderHandle, EngineError> {
        Ok(self.context()?.renderer.clone())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{MockBackend, MockDevice};
    use crate::testutil::{constant_wav, wav_bytes};

    fn engine(device: &MockDevice, config: EngineConfig) -> Engine {
        Engine::new(config, Box::new(MockBackend::new(device.clone())))
    }

    fn exact() -> EngineConfig {
        EngineConfig::default()
            .with_slots(2)
            .with_fade_ms(0.0)
    }

    #[test]
    fn test_calls_before_create_fail() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        assert_eq!(engine.trigger(0), Err(EngineError::EngineNotReady));
        assert_eq!(engine.add_default_effect(0), Err(EngineError::EngineNotReady));
        assert_eq!(engine.remove_effect(0), Err(EngineError::EngineNotReady));
        assert_eq!(engine.get_gain(0), Err(EngineError::EngineNotReady));
        assert_eq!(engine.set_pan(0, 0.5), Err(EngineError::EngineNotReady));
        assert_eq!(engine.get_output_reset(), Err(EngineError::EngineNotReady));
        assert_eq!(
            engine.set_buffer_size_in_frames(256),
            Err(EngineError::EngineNotReady)
        );
        assert!(engine.poll_notification().is_none());
        assert_eq!(engine.effect_descriptions().len(), 14);
        assert_eq!(device.open_count(), 0);
    }

    #[test]
    fn test_create_is_idempotent_and_destroy_is_safe() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.destroy();
        engine.create().unwrap();
        engine.create().unwrap();
        assert_eq!(device.open_count(), 1);
        assert!(device.is_running());
        assert_eq!(engine.stream_state(), Ok(StreamState::Running));

        engine.destroy();
        engine.destroy();
        assert!(!device.is_open());
        assert_eq!(engine.trigger(0), Err(EngineError::EngineNotReady));

        // The backend comes back on destroy so the engine can be recreated.
        engine.create().unwrap();
        assert!(device.is_running());
    }

    #[test]
    fn test_recreate_after_device_changes() {
        let device = MockDevice::new("mock");
        let config = exact().with_reconnect_timeout(std::time::Duration::from_secs(1));
        let mut engine = engine(&device, config);
        for _ in 0..5 {
            engine.create().unwrap();
            engine.on_audio_devices_changed().unwrap();
            engine.on_audio_devices_changed().unwrap();
            engine.destroy();
            assert!(!device.is_open());
        }
        engine.create().unwrap();
        assert!(device.is_running());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_opening() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact().with_sample_rate(0));
        assert!(matches!(
            engine.create(),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(!engine.is_created());
        assert_eq!(device.open_count(), 0);
    }

    #[test]
    fn test_from_config_selects_mock_device() {
        let mut engine = Engine::from_config(exact().with_device("mock-pads")).unwrap();
        engine.create().unwrap();
        assert_eq!(engine.stream_state(), Ok(StreamState::Running));
        assert_eq!(engine.config().voices().slots(), 2);
    }

    #[test]
    fn test_create_failure_keeps_backend() {
        let device = MockDevice::new("mock");
        device.fail_next_opens(1);
        let mut engine = engine(&device, exact());
        assert!(matches!(
            engine.create(),
            Err(EngineError::DeviceUnavailable(_))
        ));
        assert!(!engine.is_created());
        engine.create().unwrap();
        assert!(engine.is_created());
    }

    #[test]
    fn test_slot_indices_are_checked() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        let out_of_range = Err(EngineError::out_of_range(IndexKind::VoiceSlot, 2, 2));
        assert_eq!(engine.trigger(2), out_of_range);
        assert_eq!(engine.stop_trigger(2), out_of_range);
        assert_eq!(engine.set_gain(2, 1.0), out_of_range);
        assert_eq!(
            engine.load_sample_wav(2, &constant_wav(0.5, 48000)),
            out_of_range
        );
    }

    #[test]
    fn test_gain_and_pan_are_clamped() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        engine.set_gain(0, 5.0).unwrap();
        assert_eq!(engine.get_gain(0), Ok(2.0));
        engine.set_gain(0, -1.0).unwrap();
        assert_eq!(engine.get_gain(0), Ok(0.0));
        engine.set_pan(1, -3.0).unwrap();
        assert_eq!(engine.get_pan(1), Ok(-1.0));
        engine.set_pan(1, 0.25).unwrap();
        assert_eq!(engine.get_pan(1), Ok(0.25));

        device.pump(1);
        let renderer = engine.renderer().unwrap();
        let renderer = renderer.lock();
        assert_eq!(renderer.slot_params(0).map(|p| p.gain), Some(0.0));
        assert_eq!(renderer.slot_params(1).map(|p| p.pan), Some(0.25));
    }

    #[test]
    fn test_trigger_plays_loaded_sample() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        engine
            .load_sample_wav(0, &wav_bytes(&[0.5, 0.5, 0.5, 0.5], 1, 48000))
            .unwrap();
        engine.set_pan(0, -1.0).unwrap();
        engine.trigger(0).unwrap();

        assert_eq!(device.pump(2), vec![0.5, 0.0, 0.5, 0.0]);
        assert!(engine.is_playing(0).unwrap());
        assert_eq!(device.pump(4), vec![0.5, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(!engine.is_playing(0).unwrap());
    }

    #[test]
    fn test_unload_samples() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        engine.load_sample_wav(0, &constant_wav(0.5, 48000)).unwrap();
        engine.load_sample_wav(1, &constant_wav(0.5, 48000)).unwrap();
        assert!(engine.sample_memory_usage().unwrap() > 0);
        engine.trigger(0).unwrap();
        device.pump(8);

        engine.unload_samples().unwrap();
        assert_eq!(device.pump(4), vec![0.0; 8]);
        assert!(!engine.is_loaded(0).unwrap());
        assert_eq!(engine.sample_memory_usage(), Ok(0));
        engine.trigger(1).unwrap();
        assert_eq!(device.pump(4), vec![0.0; 8]);
    }

    #[test]
    fn test_effect_chain_edits() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        let tremolo = engine.add_default_effect(1).unwrap();
        let gain = engine.add_default_effect(3).unwrap();
        let echo = engine.add_default_effect(12).unwrap();

        engine.rotate_effect(2, 0).unwrap();
        let order: Vec<_> = engine.effect_chain().unwrap().iter().map(|e| e.id()).collect();
        assert_eq!(order, vec![echo, tremolo, gain]);

        engine.remove_effect(1).unwrap();
        let chain = engine.effect_chain().unwrap();
        assert_eq!(chain.iter().map(|e| e.id()).collect::<Vec<_>>(), vec![echo, gain]);
        assert_eq!(
            chain.iter().map(|e| e.position()).collect::<Vec<_>>(),
            vec![0, 1]
        );

        device.pump(1);
        assert_eq!(
            engine.renderer().unwrap().lock().effect_ids(),
            vec![echo, gain]
        );

        assert_eq!(
            engine.remove_effect(2),
            Err(EngineError::out_of_range(IndexKind::EffectPosition, 2, 2))
        );
        assert_eq!(
            engine.add_default_effect(14),
            Err(EngineError::out_of_range(IndexKind::EffectDescription, 14, 14))
        );
        assert!(engine.enable_effect(5, false).is_err());
        assert!(engine.rotate_effect(0, 2).is_err());
    }

    #[test]
    fn test_effect_params_are_clamped() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        engine.add_default_effect(3).unwrap();
        assert_eq!(engine.set_effect_parameter(0, 0, 100.0), Ok(20.0));
        let values = engine.set_effect_params(0, &[-100.0]).unwrap();
        assert_eq!(values.as_slice(), &[-30.0]);
        assert!(matches!(
            engine.set_effect_parameter(0, 1, 0.0),
            Err(EngineError::OutOfRange {
                kind: IndexKind::Parameter,
                ..
            })
        ));
    }

    #[test]
    fn test_gain_effect_and_passthrough() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        engine.load_sample_wav(0, &constant_wav(0.5, 48000)).unwrap();
        engine.set_pan(0, 1.0).unwrap();
        engine.add_effect(3, &[-6.0206], true).unwrap();
        engine.trigger(0).unwrap();
        let output = device.pump(2);
        assert!((output[1] - 0.25).abs() < 1e-4);

        engine.enable_effect(0, false).unwrap();
        assert_eq!(device.pump(1), vec![0.0, 0.5]);

        engine.set_passthrough(false).unwrap();
        assert_eq!(device.pump(1), vec![0.0, 0.0]);
        engine.set_passthrough(true).unwrap();
        assert_eq!(device.pump(1), vec![0.0, 0.5]);
    }

    #[test]
    fn test_negotiated_rate_conforms_samples() {
        let device = MockDevice::new("mock").with_native_sample_rate(24000);
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        assert_eq!(engine.stream_config().unwrap().sample_rate, 24000);

        // One second at 48k becomes one second at 24k.
        engine.load_sample_wav(0, &constant_wav(0.5, 48000)).unwrap();
        engine.trigger(0).unwrap();
        device.pump(24000);
        assert!(!engine.is_playing(0).unwrap());
        let renderer = engine.renderer().unwrap();
        let frames = renderer
            .lock()
            .slot_sample(0)
            .map(|sample| sample.frame_count());
        assert_eq!(frames, Some(24000));
    }

    #[test]
    fn test_rate_change_on_restart_rebuilds_samples_and_effects() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        engine.load_sample_wav(0, &constant_wav(0.5, 48000)).unwrap();
        let echo = engine.add_default_effect(12).unwrap();
        let gain = engine.add_default_effect(3).unwrap();
        engine.enable_effect(1, false).unwrap();

        device.set_native_sample_rate(Some(24000));
        let actual = engine.restart_stream().unwrap();
        assert_eq!(actual.sample_rate, 24000);
        device.pump(1);

        let renderer = engine.renderer().unwrap();
        let renderer = renderer.lock();
        let sample = renderer.slot_sample(0).unwrap();
        assert_eq!(sample.sample_rate(), 24000);
        assert_eq!(sample.frame_count(), 24000);
        assert_eq!(renderer.effect_ids(), vec![echo, gain]);
        drop(renderer);

        let chain = engine.effect_chain().unwrap();
        assert!(!chain[1].enabled());
        assert_eq!(engine.stream_state(), Ok(StreamState::Running));
    }

    #[test]
    fn test_stream_settings() {
        let device = MockDevice::new("mock").with_capacity(2048);
        let mut engine = engine(&device, exact());
        engine.create().unwrap();

        assert_eq!(engine.stream_config().unwrap().buffer_size_in_frames, 384);
        assert_eq!(engine.set_buffer_size_in_frames(1000), Ok(1000));
        assert_eq!(engine.set_buffer_size_in_frames(9999), Ok(2048));
        assert_eq!(engine.buffer_capacity_in_frames(), Ok(2048));

        assert_eq!(engine.is_mmap_supported(), Ok(true));
        assert_eq!(engine.is_mmap_enabled(), Ok(true));
        assert_eq!(engine.set_mmap_enabled(false), Ok(false));
        assert_eq!(engine.is_mmap_enabled(), Ok(false));

        engine
            .set_performance_mode(PerformanceMode::PowerSavingOffloaded)
            .unwrap();
        assert_eq!(
            engine.stream_config().unwrap().performance_mode,
            PerformanceMode::PowerSavingOffloaded
        );
        assert_eq!(engine.stream_state(), Ok(StreamState::Running));
    }

    #[test]
    fn test_load_kit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kick.wav"), wav_bytes(&[0.5; 8], 1, 48000)).unwrap();
        std::fs::write(dir.path().join("hat.wav"), wav_bytes(&[0.25; 8], 1, 48000)).unwrap();
        let kit_path = dir.path().join("kit.yaml");
        std::fs::write(
            &kit_path,
            r#"
pads:
  - file: kick.wav
    gain: 0.5
  - file: hat.wav
    pan: 1.0
    looping: true
    retrigger: polyphonic
effects:
  - name: gain
    params: [-6.0]
  - name: Wah
  - name: Echo
    enabled: false
"#,
        )
        .unwrap();
        let kit = Kit::deserialize(&kit_path).unwrap();

        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        engine.load_kit(&kit).unwrap();

        assert!(engine.is_loaded(0).unwrap());
        assert_eq!(engine.get_gain(0), Ok(0.5));
        assert_eq!(engine.get_pan(1), Ok(1.0));
        assert_eq!(engine.is_looping(1), Ok(true));
        assert_eq!(engine.retrigger(1), Ok(RetriggerBehavior::Polyphonic));

        let chain = engine.effect_chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].description().name, "Gain");
        assert_eq!(chain[0].values(), &[-6.0]);
        assert_eq!(chain[1].description().name, "Echo");
        assert!(!chain[1].enabled());
    }

    #[test]
    fn test_load_kit_with_too_many_pads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), wav_bytes(&[0.5; 8], 1, 48000)).unwrap();
        let kit_path = dir.path().join("kit.yaml");
        std::fs::write(
            &kit_path,
            "pads:\n  - file: a.wav\n  - file: a.wav\n  - file: a.wav\n",
        )
        .unwrap();
        let kit = Kit::deserialize(&kit_path).unwrap();

        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        assert_eq!(
            engine.load_kit(&kit),
            Err(EngineError::out_of_range(IndexKind::VoiceSlot, 2, 2))
        );
    }

    #[test]
    fn test_looping_and_retrigger_settings() {
        let device = MockDevice::new("mock");
        let mut engine = engine(&device, exact());
        engine.create().unwrap();
        assert_eq!(engine.is_looping(0), Ok(false));
        engine.set_looping(0, true).unwrap();
        assert_eq!(engine.is_looping(0), Ok(true));
        assert_eq!(engine.retrigger(1), Ok(RetriggerBehavior::Cut));
        engine
            .set_retrigger(1, RetriggerBehavior::Polyphonic)
            .unwrap();
        assert_eq!(engine.retrigger(1), Ok(RetriggerBehavior::Polyphonic));
    }
}
