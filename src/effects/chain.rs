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

//! The control-side effect chain: the authoritative order and parameter state.

use std::fmt;

use serde::Serialize;

use super::catalog::{description, EffectDescription, ParamValues};
use crate::error::{check_index, EngineError, IndexKind};

/// The most effects a chain holds. The render-side rack reserves this many
/// slots up front.
pub const MAX_EFFECTS: usize = 32;

/// Stable identity of an effect instance, independent of its position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct EffectId(u64);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fx{}", self.0)
    }
}

/// One effect in the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectInstance {
    id: EffectId,
    description_id: usize,
    values: ParamValues,
    enabled: bool,
    position: usize,
}

impl EffectInstance {
    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn description_id(&self) -> usize {
        self.description_id
    }

    pub fn description(&self) -> &'static EffectDescription {
        // Instances are only created from valid catalog ids.
        &super::catalog::effect_descriptions()[self.description_id]
    }

    pub fn values(&self) -> &[f32] {
        self.values.as_slice()
    }

    pub fn param_values(&self) -> ParamValues {
        self.values
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// An ordered list of effects. Positions are always exactly `0..len`.
#[derive(Debug)]
pub struct EffectChain {
    instances: Vec<EffectInstance>,
    next_id: u64,
    capacity: usize,
}

impl EffectChain {
    pub fn new() -> EffectChain {
        Self::with_capacity(MAX_EFFECTS)
    }

    pub fn with_capacity(capacity: usize) -> EffectChain {
        EffectChain {
            instances: Vec::with_capacity(capacity),
            next_id: 0,
            capacity,
        }
    }

    /// Appends an effect with the catalog defaults.
    pub fn add(&mut self, description_id: usize) -> Result<&EffectInstance, EngineError> {
        let description = description(description_id)?;
        self.add_with(description_id, description.default_params(), true)
    }

    /// Appends an effect with explicit values, clamped to the catalog ranges.
    pub fn add_with_params(
        &mut self,
        description_id: usize,
        values: &[f32],
        enabled: bool,
    ) -> Result<&EffectInstance, EngineError> {
        let description = description(description_id)?;
        self.add_with(description_id, description.clamp_params(values), enabled)
    }

    fn add_with(
        &mut self,
        description_id: usize,
        values: ParamValues,
        enabled: bool,
    ) -> Result<&EffectInstance, EngineError> {
        if self.instances.len() >= self.capacity {
            return Err(EngineError::out_of_range(
                IndexKind::EffectPosition,
                self.instances.len(),
                self.capacity,
            ));
        }
        let id = EffectId(self.next_id);
        self.next_id += 1;
        let position = self.instances.len();
        self.instances.push(EffectInstance {
            id,
            description_id,
            values,
            enabled,
            position,
        });
        Ok(&self.instances[position])
    }

    /// Removes the effect at `position` and closes the gap.
    pub fn remove(&mut self, position: usize) -> Result<EffectInstance, EngineError> {
        self.check(position)?;
        let removed = self.instances.remove(position);
        self.reindex(position, self.instances.len());
        Ok(removed)
    }

    /// Moves the effect at `from` to `to`, shifting everything between by one.
    pub fn rotate(&mut self, from: usize, to: usize) -> Result<(), EngineError> {
        self.check(from)?;
        self.check(to)?;
        if from == to {
            return Ok(());
        }
        let moved = self.instances.remove(from);
        self.instances.insert(to, moved);
        self.reindex(from.min(to), from.max(to) + 1);
        Ok(())
    }

    pub fn set_enabled(&mut self, position: usize, enabled: bool) -> Result<(), EngineError> {
        self.check(position)?;
        self.instances[position].enabled = enabled;
        Ok(())
    }

    /// Sets one parameter. Returns the clamped value that was stored.
    pub fn set_parameter(
        &mut self,
        position: usize,
        param_index: usize,
        value: f32,
    ) -> Result<f32, EngineError> {
        self.check(position)?;
        let instance = &mut self.instances[position];
        let value = instance.description().clamp_param(param_index, value)?;
        instance.values.set(param_index, value);
        Ok(value)
    }

    /// Replaces all parameters. Returns the clamped values that were stored.
    pub fn set_params(
        &mut self,
        position: usize,
        values: &[f32],
    ) -> Result<ParamValues, EngineError> {
        self.check(position)?;
        let instance = &mut self.instances[position];
        instance.values = instance.description().clamp_params(values);
        Ok(instance.values)
    }

    pub fn get(&self, position: usize) -> Option<&EffectInstance> {
        self.instances.get(position)
    }

    pub fn instances(&self) -> &[EffectInstance] {
        &self.instances
    }

    pub fn order(&self) -> Vec<EffectId> {
        self.instances.iter().map(|i| i.id).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }

    fn check(&self, position: usize) -> Result<(), EngineError> {
        check_index(IndexKind::EffectPosition, position, self.instances.len())
    }

    fn reindex(&mut self, start: usize, end: usize) {
        for (position, instance) in self
            .instances
            .iter_mut()
            .enumerate()
            .take(end)
            .skip(start)
        {
            instance.position = position;
        }
    }
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}
