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

//! Ordered, user-editable effect processing applied to the mix.
//!
//! The control thread owns an [`EffectChain`], the authoritative order and
//! parameter state. The render thread owns an [`EffectRack`] of DSP units
//! that mirrors it through commands applied in the same order.

mod catalog;
mod chain;
mod delay;
mod rack;
mod units;

pub use catalog::{
    description, effect_descriptions, find_description, EffectDescription, ParamDescription,
    ParamValues, MAX_PARAMS,
};
pub use chain::{EffectChain, EffectId, EffectInstance, MAX_EFFECTS};
pub use rack::{EffectRack, RackEntry};
pub use units::EffectUnit;
