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

//! Circular delay line shared by the delay based effects.

/// Values smaller than this are flushed to zero to avoid denormals in feedback paths.
const DENORMAL_THRESHOLD: f32 = 1e-15;

/// A fixed-capacity delay line. `tap(1)` is the most recently pushed sample.
pub struct DelayLine {
    buffer: Vec<f32>,
    write_index: usize,
}

impl DelayLine {
    pub fn new(capacity: usize) -> DelayLine {
        DelayLine {
            buffer: vec![0.0; capacity.max(1)],
            write_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        let sample = if sample.abs() < DENORMAL_THRESHOLD {
            0.0
        } else {
            sample
        };
        self.buffer[self.write_index] = sample;
        self.write_index = (self.write_index + 1) % self.buffer.len();
    }

    /// Returns the sample pushed `delay` pushes ago, clamped to [1, capacity].
    #[inline]
    pub fn tap(&self, delay: usize) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1, len);
        self.buffer[(self.write_index + len - delay) % len]
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_index = 0;
    }
}

/// Converts milliseconds to a whole number of samples, at least one.
pub fn ms_to_samples(ms: f32, sample_rate: u32) -> usize {
    ((ms.max(0.0) * sample_rate as f32 / 1000.0).round() as usize).max(1)
}
