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

//! DSP units. Each processes an interleaved buffer of one or two channels in
//! place and keeps independent state per channel.

use std::f32::consts::PI;

use super::delay::{ms_to_samples, DelayLine};

/// Channels a unit keeps state for.
const MAX_CHANNELS: usize = 2;

/// An effect operating in place on the mix. Units are built on the control
/// thread with all the memory they need; `set_params` and `process` never
/// allocate.
pub trait EffectUnit: Send {
    /// Applies already clamped parameter values in catalog order.
    fn set_params(&mut self, params: &[f32]);

    fn process(&mut self, buffer: &mut [f32], channels: usize);

    /// Clears delay memory and modulation state.
    fn reset(&mut self) {}
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn param_or(params: &[f32], index: usize, default: f32) -> f32 {
    params.get(index).copied().unwrap_or(default)
}

struct Passthrough;

impl EffectUnit for Passthrough {
    fn set_params(&mut self, _params: &[f32]) {}

    fn process(&mut self, _buffer: &mut [f32], _channels: usize) {}
}

/// A sine oscillator in [-1, 1].
struct Sine {
    phase: f32,
    increment: f32,
}

impl Sine {
    fn new() -> Sine {
        Sine {
            phase: 0.0,
            increment: 0.0,
        }
    }

    fn set_frequency(&mut self, frequency: f32, sample_rate: u32) {
        self.increment = 2.0 * PI * frequency / sample_rate as f32;
    }

    #[inline]
    fn next(&mut self) -> f32 {
        let value = self.phase.sin();
        self.phase += self.increment;
        if self.phase >= 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        value
    }
}

/// Low-passed white noise in roughly [-1, 1], from a fixed seed so output is
/// reproducible.
struct Noise {
    state: u32,
    value: f32,
    smoothing: f32,
}

impl Noise {
    const SEED: u32 = 0x2545_f491;

    fn new(sample_rate: u32) -> Noise {
        Noise {
            state: Self::SEED,
            value: 0.0,
            // Roughly a 5 Hz one-pole low-pass.
            smoothing: (2.0 * PI * 5.0 / sample_rate as f32).min(1.0),
        }
    }

    #[inline]
    fn next(&mut self) -> f32 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let white = (self.state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
        self.value += self.smoothing * (white - self.value);
        self.value.clamp(-1.0, 1.0)
    }

    fn reset(&mut self) {
        self.state = Self::SEED;
        self.value = 0.0;
    }
}

enum Modulator {
    Sine(Sine),
    Noise(Noise),
}

impl Modulator {
    #[inline]
    fn next(&mut self) -> f32 {
        match self {
            Modulator::Sine(sine) => sine.next(),
            Modulator::Noise(noise) => noise.next(),
        }
    }

    fn reset(&mut self) {
        match self {
            Modulator::Sine(sine) => sine.phase = 0.0,
            Modulator::Noise(noise) => noise.reset(),
        }
    }
}

struct Tremolo {
    sample_rate: u32,
    lfo: Sine,
    height: f32,
}

impl EffectUnit for Tremolo {
    fn set_params(&mut self, params: &[f32]) {
        self.lfo
            .set_frequency(param_or(params, 0, 2.0), self.sample_rate);
        self.height = param_or(params, 1, 0.5);
    }

    fn process(&mut self, buffer: &mut [f32], channels: usize) {
        for frame in buffer.chunks_exact_mut(channels) {
            let gain = 1.0 - self.height * (0.5 + 0.5 * self.lfo.next());
            frame.iter_mut().for_each(|s| *s *= gain);
        }
    }

    fn reset(&mut self) {
        self.lfo.phase = 0.0;
    }
}

struct Gain {
    gain: f32,
}

impl EffectUnit for Gain {
    fn set_params(&mut self, params: &[f32]) {
        self.gain = db_to_linear(param_or(params, 0, 0.0));
    }

    fn process(&mut self, buffer: &mut [f32], _channels: usize) {
        buffer.iter_mut().for_each(|s| *s *= self.gain);
    }
}

/// How a modulated delay maps its two catalog parameters.
#[derive(Clone, Copy)]
enum ModulatedLayout {
    /// (frequency, depth)
    Vibrato,
    /// (depth, frequency)
    Flanger,
    /// (depth, delay)
    WhiteChorus,
    /// (depth, delay)
    Doubling,
}

impl ModulatedLayout {
    /// (blend, feed forward, feedback) weights.
    fn weights(self) -> (f32, f32, f32) {
        const HALF_POWER: f32 = std::f32::consts::FRAC_1_SQRT_2;
        match self {
            ModulatedLayout::Vibrato => (0.0, 1.0, 0.0),
            ModulatedLayout::Flanger => (HALF_POWER, HALF_POWER, -HALF_POWER),
            ModulatedLayout::WhiteChorus => (HALF_POWER, 1.0, -HALF_POWER),
            ModulatedLayout::Doubling => (HALF_POWER, HALF_POWER, 0.0),
        }
    }
}

/// A delay line whose tap is swept by a modulator, read with all-pass
/// interpolation. Covers vibrato, flanger, chorus and doubling.
struct ModulatedDelay {
    layout: ModulatedLayout,
    sample_rate: u32,
    blend: f32,
    feed_forward: f32,
    feedback: f32,
    /// Center delay in samples.
    delay: f32,
    /// Sweep depth in samples.
    depth: f32,
    modulator: Modulator,
    lines: [DelayLine; MAX_CHANNELS],
    previous: [f32; MAX_CHANNELS],
}

impl ModulatedDelay {
    fn new(layout: ModulatedLayout, sample_rate: u32, max_delay_ms: f32, max_depth_ms: f32) -> Self {
        let (blend, feed_forward, feedback) = layout.weights();
        let modulator = match layout {
            ModulatedLayout::Vibrato | ModulatedLayout::Flanger => Modulator::Sine(Sine::new()),
            ModulatedLayout::WhiteChorus | ModulatedLayout::Doubling => {
                Modulator::Noise(Noise::new(sample_rate))
            }
        };
        let capacity =
            ms_to_samples(max_delay_ms, sample_rate) + 2 * ms_to_samples(max_depth_ms, sample_rate) + 2;
        ModulatedDelay {
            layout,
            sample_rate,
            blend,
            feed_forward,
            feedback,
            delay: 1.0,
            depth: 0.0,
            modulator,
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
            previous: [0.0; MAX_CHANNELS],
        }
    }

    fn set_frequency(&mut self, frequency: f32) {
        if let Modulator::Sine(sine) = &mut self.modulator {
            sine.set_frequency(frequency, self.sample_rate);
        }
    }

    fn ms(&self, ms: f32) -> f32 {
        ms.max(0.0) * self.sample_rate as f32 / 1000.0
    }
}

impl EffectUnit for ModulatedDelay {
    fn set_params(&mut self, params: &[f32]) {
        match self.layout {
            ModulatedLayout::Vibrato => {
                self.set_frequency(param_or(params, 0, 2.0));
                self.depth = self.ms(param_or(params, 1, 2.0));
                self.delay = 1.0;
            }
            ModulatedLayout::Flanger => {
                self.depth = self.ms(param_or(params, 0, 1.0));
                self.set_frequency(param_or(params, 1, 0.2));
                self.delay = 1.0;
            }
            ModulatedLayout::WhiteChorus | ModulatedLayout::Doubling => {
                self.depth = self.ms(param_or(params, 0, 10.0));
                self.delay = self.ms(param_or(params, 1, 10.0)).max(1.0);
            }
        }
        let capacity = self.lines[0].capacity() as f32;
        // Keep the whole sweep inside the line.
        self.depth = self.depth.min((capacity - 2.0 - self.delay) / 2.0).max(0.0);
    }

    fn process(&mut self, buffer: &mut [f32], channels: usize) {
        let channels = channels.min(MAX_CHANNELS);
        let tap = self.delay + self.depth;
        let center = tap.round() as usize;
        for frame in buffer.chunks_exact_mut(channels) {
            let modulation = self.modulator.next();
            let variable = modulation * self.depth + tap;
            let index = variable.floor();
            let frac_comp = 1.0 - (variable - index);
            let index = index as usize;

            for (channel, sample) in frame.iter_mut().enumerate() {
                let line = &mut self.lines[channel];
                let delay_input = *sample + self.feedback * line.tap(center);
                let interpolated = frac_comp * line.tap(index) + line.tap(index + 1)
                    - frac_comp * self.previous[channel];
                self.previous[channel] = interpolated;
                line.push(delay_input);
                *sample = interpolated * self.feed_forward + self.blend * delay_input;
            }
        }
    }

    fn reset(&mut self) {
        self.lines.iter_mut().for_each(DelayLine::reset);
        self.previous = [0.0; MAX_CHANNELS];
        self.modulator.reset();
    }
}

/// How a comb filter maps its two catalog parameters.
#[derive(Clone, Copy)]
enum CombLayout {
    /// y = x + g x[n-D], params (gain, delay)
    Fir,
    /// y = x + g y[n-D], params (gain, delay)
    Iir,
    /// y = -g x + x[n-D] + g y[n-D], params (delay, scale)
    AllPass,
    /// IIR comb with (feedback, delay)
    Echo,
    /// FIR comb with (level, delay)
    Slapback,
}

struct Comb {
    layout: CombLayout,
    sample_rate: u32,
    gain: f32,
    delay: usize,
    inputs: [DelayLine; MAX_CHANNELS],
    outputs: [DelayLine; MAX_CHANNELS],
}

impl Comb {
    fn new(layout: CombLayout, sample_rate: u32, max_delay_ms: f32) -> Comb {
        let capacity = ms_to_samples(max_delay_ms, sample_rate) + 1;
        Comb {
            layout,
            sample_rate,
            gain: 0.0,
            delay: 1,
            inputs: [DelayLine::new(capacity), DelayLine::new(capacity)],
            outputs: [DelayLine::new(capacity), DelayLine::new(capacity)],
        }
    }
}

impl EffectUnit for Comb {
    fn set_params(&mut self, params: &[f32]) {
        let (gain, delay_ms) = match self.layout {
            CombLayout::AllPass => (param_or(params, 1, 0.5), param_or(params, 0, 10.0)),
            _ => (param_or(params, 0, 0.5), param_or(params, 1, 10.0)),
        };
        self.gain = gain;
        self.delay = ms_to_samples(delay_ms, self.sample_rate).min(self.inputs[0].capacity());
    }

    fn process(&mut self, buffer: &mut [f32], channels: usize) {
        let channels = channels.min(MAX_CHANNELS);
        for frame in buffer.chunks_exact_mut(channels) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let x = *sample;
                let delayed_in = self.inputs[channel].tap(self.delay);
                let delayed_out = self.outputs[channel].tap(self.delay);
                let y = match self.layout {
                    CombLayout::Fir | CombLayout::Slapback => x + self.gain * delayed_in,
                    CombLayout::Iir | CombLayout::Echo => x + self.gain * delayed_out,
                    CombLayout::AllPass => -self.gain * x + delayed_in + self.gain * delayed_out,
                };
                self.inputs[channel].push(x);
                self.outputs[channel].push(y);
                *sample = y;
            }
        }
    }

    fn reset(&mut self) {
        self.inputs.iter_mut().for_each(DelayLine::reset);
        self.outputs.iter_mut().for_each(DelayLine::reset);
    }
}

#[derive(Clone, Copy)]
enum Shape {
    /// Symmetric soft clipping.
    Overdrive,
    /// Exponential distortion.
    Distortion,
}

struct Waveshaper {
    shape: Shape,
    gain: f32,
}

impl Waveshaper {
    #[inline]
    fn shape(&self, x: f32) -> f32 {
        let x = x * self.gain;
        let magnitude = x.abs();
        match self.shape {
            Shape::Overdrive => {
                if magnitude < 1.0 / 3.0 {
                    2.0 * x
                } else if magnitude < 2.0 / 3.0 {
                    x.signum() * (3.0 - (2.0 - 3.0 * magnitude).powi(2)) / 3.0
                } else {
                    x.signum()
                }
            }
            Shape::Distortion => x.signum() * (1.0 - (-magnitude).exp()),
        }
    }
}

impl EffectUnit for Waveshaper {
    fn set_params(&mut self, params: &[f32]) {
        self.gain = db_to_linear(param_or(params, 0, 10.0));
    }

    fn process(&mut self, buffer: &mut [f32], _channels: usize) {
        for sample in buffer.iter_mut() {
            *sample = self.shape(*sample);
        }
    }
}

pub(super) fn passthrough(_sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Passthrough)
}

pub(super) fn tremolo(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Tremolo {
        sample_rate,
        lfo: Sine::new(),
        height: 0.5,
    })
}

pub(super) fn vibrato(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(ModulatedDelay::new(ModulatedLayout::Vibrato, sample_rate, 1.0, 5.0))
}

pub(super) fn gain(_sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Gain { gain: 1.0 })
}

pub(super) fn flanger(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(ModulatedDelay::new(ModulatedLayout::Flanger, sample_rate, 1.0, 2.0))
}

pub(super) fn white_chorus(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(ModulatedDelay::new(
        ModulatedLayout::WhiteChorus,
        sample_rate,
        30.0,
        30.0,
    ))
}

pub(super) fn fir(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Comb::new(CombLayout::Fir, sample_rate, 50.0))
}

pub(super) fn iir(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Comb::new(CombLayout::Iir, sample_rate, 50.0))
}

pub(super) fn all_pass(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Comb::new(CombLayout::AllPass, sample_rate, 50.0))
}

pub(super) fn doubling(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(ModulatedDelay::new(
        ModulatedLayout::Doubling,
        sample_rate,
        100.0,
        40.0,
    ))
}

pub(super) fn overdrive(_sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Waveshaper {
        shape: Shape::Overdrive,
        gain: 1.0,
    })
}

pub(super) fn distortion(_sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Waveshaper {
        shape: Shape::Distortion,
        gain: 1.0,
    })
}

pub(super) fn echo(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Comb::new(CombLayout::Echo, sample_rate, 500.0))
}

pub(super) fn slapback(sample_rate: u32) -> Box<dyn EffectUnit> {
    Box::new(Comb::new(CombLayout::Slapback, sample_rate, 120.0))
}
