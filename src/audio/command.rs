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

//! The control to render handoff.
//!
//! Commands travel over a lock-free single-producer single-consumer ring and
//! are drained at the start of each render period. Anything the render thread
//! stops using (sample references, effect units) travels back over a second
//! ring so it is freed on the control thread instead of in the callback.

use std::collections::VecDeque;
use std::sync::Arc;

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use tracing::{debug, warn};

use crate::config::RetriggerBehavior;
use crate::effects::{ParamValues, RackEntry, MAX_EFFECTS};
use crate::samples::{SampleEntry, Voice};

/// A state change for the render thread.
pub enum EngineCommand {
    LoadSample {
        slot: usize,
        sample: Arc<SampleEntry>,
    },
    /// Replaces the slot's sample with the same sound at a new stream rate.
    /// Unlike `LoadSample`, sounding voices carry on with it.
    ConformSample {
        slot: usize,
        sample: Arc<SampleEntry>,
    },
    UnloadSample {
        slot: usize,
    },
    Trigger {
        slot: usize,
    },
    Stop {
        slot: usize,
    },
    StopAll,
    SetGain {
        slot: usize,
        gain: f32,
    },
    SetPan {
        slot: usize,
        pan: f32,
    },
    SetLooping {
        slot: usize,
        looping: bool,
    },
    SetRetrigger {
        slot: usize,
        retrigger: RetriggerBehavior,
    },
    AddEffect(RackEntry),
    RemoveEffect {
        position: usize,
    },
    RotateEffect {
        from: usize,
        to: usize,
    },
    EnableEffect {
        position: usize,
        enabled: bool,
    },
    SetEffectParams {
        position: usize,
        values: ParamValues,
    },
    ClearEffects,
    SetMuted(bool),
    SetFadeFrames(usize),
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::LoadSample { slot, .. } => write!(f, "LoadSample({})", slot),
            EngineCommand::ConformSample { slot, .. } => write!(f, "ConformSample({})", slot),
            EngineCommand::UnloadSample { slot } => write!(f, "UnloadSample({})", slot),
            EngineCommand::Trigger { slot } => write!(f, "Trigger({})", slot),
            EngineCommand::Stop { slot } => write!(f, "Stop({})", slot),
            EngineCommand::StopAll => write!(f, "StopAll"),
            EngineCommand::SetGain { slot, gain } => write!(f, "SetGain({}, {})", slot, gain),
            EngineCommand::SetPan { slot, pan } => write!(f, "SetPan({}, {})", slot, pan),
            EngineCommand::SetLooping { slot, looping } => {
                write!(f, "SetLooping({}, {})", slot, looping)
            }
            EngineCommand::SetRetrigger { slot, retrigger } => {
                write!(f, "SetRetrigger({}, {:?})", slot, retrigger)
            }
            EngineCommand::AddEffect(entry) => write!(f, "AddEffect({})", entry.id()),
            EngineCommand::RemoveEffect { position } => write!(f, "RemoveEffect({})", position),
            EngineCommand::RotateEffect { from, to } => write!(f, "RotateEffect({}, {})", from, to),
            EngineCommand::EnableEffect { position, enabled } => {
                write!(f, "EnableEffect({}, {})", position, enabled)
            }
            EngineCommand::SetEffectParams { position, values } => {
                write!(f, "SetEffectParams({}, {:?})", position, values.as_slice())
            }
            EngineCommand::ClearEffects => write!(f, "ClearEffects"),
            EngineCommand::SetMuted(muted) => write!(f, "SetMuted({})", muted),
            EngineCommand::SetFadeFrames(frames) => write!(f, "SetFadeFrames({})", frames),
        }
    }
}

/// Something the render thread is done with.
pub enum Garbage {
    Sample(Arc<SampleEntry>),
    Effect(RackEntry),
}

impl From<Voice> for Garbage {
    fn from(voice: Voice) -> Self {
        Garbage::Sample(voice.into_sample())
    }
}

/// Creates the command queue. The garbage ring is sized so that draining a
/// full command ring can never overflow it.
pub fn command_queue(capacity: usize, max_voices: usize) -> (CommandSender, CommandReceiver) {
    let (commands_tx, commands_rx) = RingBuffer::new(capacity);
    let (garbage_tx, garbage_rx) = RingBuffer::new(2 * capacity + max_voices + MAX_EFFECTS);
    (
        CommandSender {
            commands: commands_tx,
            garbage: garbage_rx,
            backlog: VecDeque::new(),
        },
        CommandReceiver {
            commands: commands_rx,
            garbage: garbage_tx,
            overflowed: 0,
        },
    )
}

/// The control side of the queue.
pub struct CommandSender {
    commands: Producer<EngineCommand>,
    garbage: Consumer<Garbage>,
    /// Commands that did not fit in the ring, oldest first.
    backlog: VecDeque<EngineCommand>,
}

impl CommandSender {
    /// Queues a command. Never blocks: when the ring is full the command is
    /// kept locally and sent on a later call, merged with any parameter
    /// update for the same effect already waiting.
    pub fn send(&mut self, command: EngineCommand) {
        self.collect_garbage();
        self.flush();
        if self.backlog.is_empty() {
            match self.commands.push(command) {
                Ok(()) => return,
                Err(PushError::Full(command)) => {
                    debug!("Command queue full, backlogging");
                    self.backlog.push_back(command);
                    return;
                }
            }
        }
        self.backlog_push(command);
    }

    fn backlog_push(&mut self, command: EngineCommand) {
        if let EngineCommand::SetEffectParams { position, values } = &command {
            if let Some(EngineCommand::SetEffectParams {
                position: last_position,
                values: last_values,
            }) = self.backlog.back_mut()
            {
                if last_position == position {
                    *last_values = *values;
                    return;
                }
            }
        }
        self.backlog.push_back(command);
    }

    /// Moves as much of the backlog into the ring as fits.
    pub fn flush(&mut self) {
        while let Some(command) = self.backlog.pop_front() {
            if let Err(PushError::Full(command)) = self.commands.push(command) {
                self.backlog.push_front(command);
                break;
            }
        }
    }

    /// Frees whatever the render thread has handed back.
    pub fn collect_garbage(&mut self) -> usize {
        let mut collected = 0;
        while let Ok(garbage) = self.garbage.pop() {
            drop(garbage);
            collected += 1;
        }
        collected
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Commands sitting in the ring, not yet drained.
    pub fn pending(&self) -> usize {
        self.commands.buffer().capacity() - self.commands.slots()
    }
}

impl Drop for CommandSender {
    fn drop(&mut self) {
        if !self.backlog.is_empty() {
            warn!(commands = self.backlog.len(), "Dropping unsent engine commands");
        }
    }
}

/// The render side of the queue.
pub struct CommandReceiver {
    commands: Consumer<EngineCommand>,
    garbage: Producer<Garbage>,
    /// Values freed on the render thread because the garbage ring was full.
    overflowed: u64,
}

impl CommandReceiver {
    #[inline]
    pub fn pop(&mut self) -> Option<EngineCommand> {
        self.commands.pop().ok()
    }

    /// Hands something back to the control thread to be freed.
    #[inline]
    pub fn retire(&mut self, garbage: impl Into<Garbage>) {
        // On a full ring the value is dropped here, on the render thread.
        if self.garbage.push(garbage.into()).is_err() {
            self.overflowed += 1;
        }
    }

    pub fn garbage_overflows(&self) -> u64 {
        self.overflowed
    }
}

impl From<Arc<SampleEntry>> for Garbage {
    fn from(sample: Arc<SampleEntry>) -> Self {
        Garbage::Sample(sample)
    }
}

impl From<RackEntry> for Garbage {
    fn from(entry: RackEntry) -> Self {
        Garbage::Effect(entry)
    }
}
