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
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// What happens when a slot that is already sounding is triggered again.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetriggerBehavior {
    /// Fade out the previous voice and restart the sample from the beginning.
    #[default]
    Cut,
    /// Allow multiple voices to play simultaneously.
    Polyphonic,
}

/// A single pad of a kit, bound to the sample slot matching its index.
#[derive(Deserialize, Clone, Debug)]
pub struct Pad {
    /// The WAV file for this pad. Relative paths resolve against the kit file.
    file: PathBuf,

    /// Gain from 0.0 to 2.0 (default: 1.0).
    gain: Option<f32>,

    /// Pan from -1.0 (left) to 1.0 (right) (default: 0.0).
    pan: Option<f32>,

    /// Whether the pad loops until stopped (default: false).
    #[serde(default)]
    looping: bool,

    /// Overrides the engine's retrigger behavior for this pad.
    retrigger: Option<RetriggerBehavior>,
}

impl Pad {
    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn gain(&self) -> f32 {
        self.gain.unwrap_or(1.0)
    }

    pub fn pan(&self) -> f32 {
        self.pan.unwrap_or(0.0)
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn retrigger(&self) -> Option<RetriggerBehavior> {
        self.retrigger
    }
}

/// An effect to append to the chain when the kit is loaded.
#[derive(Deserialize, Clone, Debug)]
pub struct KitEffect {
    /// The catalog name of the effect, e.g. "Echo".
    name: String,

    /// Parameter values in catalog order. Missing values use the defaults.
    #[serde(default)]
    params: Vec<f32>,

    enabled: Option<bool>,
}

impl KitEffect {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// A YAML representation of a sample kit.
#[derive(Deserialize, Clone, Debug)]
pub struct Kit {
    pads: Vec<Pad>,

    #[serde(default)]
    effects: Vec<KitEffect>,
}

impl Kit {
    /// Parse a kit from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Kit, ConfigError> {
        let mut kit = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Kit>()?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for pad in kit.pads.iter_mut() {
            if pad.file.is_relative() {
                pad.file = base.join(&pad.file);
            }
        }
        Ok(kit)
    }

    pub fn pads(&self) -> &[Pad] {
        &self.pads
    }

    pub fn effects(&self) -> &[KitEffect] {
        &self.effects
    }
}
