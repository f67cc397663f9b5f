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

//! The render-side effect rack. It mirrors the control-side chain through
//! commands applied in order, so positions on both sides always agree.

use super::catalog::ParamValues;
use super::chain::{EffectId, MAX_EFFECTS};
use super::units::EffectUnit;

/// A DSP unit in the rack.
pub struct RackEntry {
    id: EffectId,
    enabled: bool,
    unit: Box<dyn EffectUnit>,
    /// Latest parameter values not yet handed to the unit.
    staged: Option<ParamValues>,
}

impl RackEntry {
    pub fn new(id: EffectId, enabled: bool, unit: Box<dyn EffectUnit>) -> RackEntry {
        RackEntry {
            id,
            enabled,
            unit,
            staged: None,
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn into_unit(self) -> Box<dyn EffectUnit> {
        self.unit
    }
}

/// Ordered DSP units. Storage for `MAX_EFFECTS` entries is reserved up front
/// so edits on the render thread never allocate.
pub struct EffectRack {
    entries: Vec<RackEntry>,
}

impl EffectRack {
    pub fn new() -> EffectRack {
        EffectRack {
            entries: Vec::with_capacity(MAX_EFFECTS),
        }
    }

    /// Appends an entry. Hands it back if the rack is full.
    pub fn push(&mut self, entry: RackEntry) -> Result<(), RackEntry> {
        if self.entries.len() >= MAX_EFFECTS {
            return Err(entry);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn remove(&mut self, position: usize) -> Option<RackEntry> {
        if position < self.entries.len() {
            Some(self.entries.remove(position))
        } else {
            None
        }
    }

    pub fn rotate(&mut self, from: usize, to: usize) {
        let len = self.entries.len();
        if from >= len || to >= len || from == to {
            return;
        }
        if from < to {
            self.entries[from..=to].rotate_left(1);
        } else {
            self.entries[to..=from].rotate_right(1);
        }
    }

    pub fn set_enabled(&mut self, position: usize, enabled: bool) {
        if let Some(entry) = self.entries.get_mut(position) {
            entry.enabled = enabled;
        }
    }

    /// Records new parameters for an entry. Only the last values staged
    /// before the next `apply_staged` reach the unit.
    pub fn stage(&mut self, position: usize, values: ParamValues) {
        if let Some(entry) = self.entries.get_mut(position) {
            entry.staged = Some(values);
        }
    }

    /// Hands staged parameters to their units. Called once per period, before
    /// any unit processes, so no unit sees a change mid-buffer.
    pub fn apply_staged(&mut self) -> usize {
        let mut applied = 0;
        for entry in self.entries.iter_mut() {
            if let Some(values) = entry.staged.take() {
                entry.unit.set_params(values.as_slice());
                applied += 1;
            }
        }
        applied
    }

    pub fn process(&mut self, buffer: &mut [f32], channels: usize) {
        for entry in self.entries.iter_mut().filter(|entry| entry.enabled) {
            entry.unit.process(buffer, channels);
        }
    }

    /// Removes every entry.
    pub fn drain(&mut self, mut dispose: impl FnMut(RackEntry)) {
        while let Some(entry) = self.entries.pop() {
            dispose(entry);
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = EffectId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EffectRack {
    fn default() -> Self {
        Self::new()
    }
}
