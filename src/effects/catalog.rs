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

//! The static catalog of effects a chain can be built from.

use serde::Serialize;

use super::units::{self, EffectUnit};
use crate::error::{check_index, EngineError, IndexKind};

/// The most parameters any effect in the catalog takes.
pub const MAX_PARAMS: usize = 4;

/// Describes one parameter of an effect.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ParamDescription {
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

const fn param(name: &'static str, min: f32, max: f32, default: f32) -> ParamDescription {
    ParamDescription {
        name,
        min,
        max,
        default,
    }
}

impl ParamDescription {
    /// Clamps to [min, max]. NaN maps to the default.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }
}

/// Parameter values for one effect, stored inline so they can cross into the
/// render thread without allocating.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamValues {
    values: [f32; MAX_PARAMS],
    len: usize,
}

impl ParamValues {
    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn set(&mut self, index: usize, value: f32) {
        if index < self.len {
            self.values[index] = value;
        }
    }
}

/// An entry of the effect catalog.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct EffectDescription {
    pub id: usize,
    pub name: &'static str,
    pub category: &'static str,
    pub params: &'static [ParamDescription],
    #[serde(skip)]
    build: fn(u32) -> Box<dyn EffectUnit>,
}

impl EffectDescription {
    pub fn default_params(&self) -> ParamValues {
        let mut values = [0.0; MAX_PARAMS];
        for (value, param) in values.iter_mut().zip(self.params) {
            *value = param.default;
        }
        ParamValues {
            values,
            len: self.params.len(),
        }
    }

    /// Clamps each value to its parameter's range. Missing values take the
    /// default and extra values are ignored.
    pub fn clamp_params(&self, values: &[f32]) -> ParamValues {
        let mut params = self.default_params();
        for (index, (value, param)) in values.iter().zip(self.params).enumerate() {
            params.set(index, param.clamp(*value));
        }
        params
    }

    pub fn clamp_param(&self, index: usize, value: f32) -> Result<f32, EngineError> {
        check_index(IndexKind::Parameter, index, self.params.len())?;
        Ok(self.params[index].clamp(value))
    }

    /// Builds a DSP unit for this effect, allocating its delay memory for
    /// `sample_rate`.
    pub fn build(&self, params: &ParamValues, sample_rate: u32) -> Box<dyn EffectUnit> {
        let mut unit = (self.build)(sample_rate);
        unit.set_params(params.as_slice());
        unit
    }
}

static EFFECTS: [EffectDescription; 14] = [
    EffectDescription {
        id: 0,
        name: "Passthrough",
        category: "None",
        params: &[],
        build: units::passthrough,
    },
    EffectDescription {
        id: 1,
        name: "Tremolo",
        category: "Amplitude",
        params: &[
            param("Frequency (Hz)", 0.1, 5.0, 2.0),
            param("Height", 0.05, 1.0, 0.5),
        ],
        build: units::tremolo,
    },
    EffectDescription {
        id: 2,
        name: "Vibrato",
        category: "Delay",
        params: &[
            param("Frequency (Hz)", 0.1, 5.0, 2.0),
            param("Depth (ms)", 0.0, 5.0, 2.0),
        ],
        build: units::vibrato,
    },
    EffectDescription {
        id: 3,
        name: "Gain",
        category: "Amplitude",
        params: &[param("Gain (dB)", -30.0, 20.0, 0.0)],
        build: units::gain,
    },
    EffectDescription {
        id: 4,
        name: "Flanger",
        category: "Delay",
        params: &[
            param("Depth (ms)", 0.1, 2.0, 1.0),
            param("Frequency (Hz)", 0.1, 1.0, 0.2),
        ],
        build: units::flanger,
    },
    EffectDescription {
        id: 5,
        name: "White Chorus",
        category: "Delay",
        params: &[
            param("Depth (ms)", 1.0, 30.0, 10.0),
            param("Delay (ms)", 1.0, 30.0, 10.0),
        ],
        build: units::white_chorus,
    },
    EffectDescription {
        id: 6,
        name: "FIR",
        category: "Comb",
        params: &[
            param("Gain", 0.0, 1.0, 0.5),
            param("Delay (ms)", 1.0, 50.0, 10.0),
        ],
        build: units::fir,
    },
    EffectDescription {
        id: 7,
        name: "IIR",
        category: "Comb",
        params: &[
            param("Gain", 0.0, 0.99, 0.5),
            param("Delay (ms)", 1.0, 50.0, 10.0),
        ],
        build: units::iir,
    },
    EffectDescription {
        id: 8,
        name: "All Pass",
        category: "Comb",
        params: &[
            param("Delay (ms)", 1.0, 50.0, 10.0),
            param("Scale", 0.0, 0.99, 0.5),
        ],
        build: units::all_pass,
    },
    EffectDescription {
        id: 9,
        name: "Doubling",
        category: "Delay",
        params: &[
            param("Depth (ms)", 1.0, 40.0, 10.0),
            param("Delay (ms)", 1.0, 100.0, 40.0),
        ],
        build: units::doubling,
    },
    EffectDescription {
        id: 10,
        name: "Overdrive",
        category: "Nonlinear",
        params: &[param("Gain (dB)", -10.0, 50.0, 10.0)],
        build: units::overdrive,
    },
    EffectDescription {
        id: 11,
        name: "Distortion",
        category: "Nonlinear",
        params: &[param("Gain (dB)", -10.0, 50.0, 10.0)],
        build: units::distortion,
    },
    EffectDescription {
        id: 12,
        name: "Echo",
        category: "Delay",
        params: &[
            param("Feedback", 0.0, 0.95, 0.5),
            param("Delay (ms)", 50.0, 500.0, 250.0),
        ],
        build: units::echo,
    },
    EffectDescription {
        id: 13,
        name: "Slapback",
        category: "Delay",
        params: &[
            param("Level", 0.0, 1.0, 0.5),
            param("Delay (ms)", 40.0, 120.0, 80.0),
        ],
        build: units::slapback,
    },
];

/// Returns the whole catalog. An effect's id is its index.
pub fn effect_descriptions() -> &'static [EffectDescription] {
    &EFFECTS
}

pub fn description(id: usize) -> Result<&'static EffectDescription, EngineError> {
    check_index(IndexKind::EffectDescription, id, EFFECTS.len())?;
    Ok(&EFFECTS[id])
}

/// Looks an effect up by display name, ignoring case.
pub fn find_description(name: &str) -> Option<&'static EffectDescription> {
    EFFECTS
        .iter()
        .find(|effect| effect.name.eq_ignore_ascii_case(name))
}
