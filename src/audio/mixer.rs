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
// Core mixing logic shared by every backend and by tests.
use crate::samples::Voice;

/// Linear pan law: returns (left, right) gains. Center pan sends half the
/// gain to each side.
#[inline]
pub fn pan_gains(pan: f32, gain: f32) -> (f32, f32) {
    let right = pan * 0.5 + 0.5;
    ((1.0 - right) * gain, right * gain)
}

/// Accumulates every voice into `output`, an interleaved buffer of `channels`
/// channels. Mono output sums both sides of a voice at its gain and ignores
/// pan. Outputs wider than stereo only receive the first two channels.
/// Voices that reach their end are marked inactive; removing them is left to
/// the next pass.
pub fn mix_voices(voices: &mut [Voice], output: &mut [f32], channels: usize) {
    if channels == 0 {
        return;
    }
    for voice in voices.iter_mut() {
        let gain = voice.gain();
        let (left_gain, right_gain) = pan_gains(voice.pan(), gain);
        for frame in output.chunks_exact_mut(channels) {
            let Some((left, right)) = voice.next_frame() else {
                break;
            };
            if channels == 1 {
                frame[0] += (left + right) * 0.5 * gain;
            } else {
                frame[0] += left * left_gain;
                frame[1] += right * right_gain;
            }
        }
    }
}

/// Clamps every sample to the output range [-1, 1].
#[inline]
pub fn clip(output: &mut [f32]) {
    for sample in output.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::RetriggerBehavior;
    use crate::samples::{SampleEntry, SlotParams};

    fn voice(data: Vec<f32>, channels: u16, gain: f32, pan: f32, looping: bool) -> Voice {
        let sample = Arc::new(SampleEntry::new(0, data, channels, 48000));
        let params = SlotParams {
            gain,
            pan,
            looping,
            retrigger: RetriggerBehavior::Cut,
        };
        Voice::new(0, 0, sample, &params, 0)
    }

    #[test]
    fn test_pan_law() {
        assert_eq!(pan_gains(0.0, 1.0), (0.5, 0.5));
        assert_eq!(pan_gains(-1.0, 1.0), (1.0, 0.0));
        assert_eq!(pan_gains(1.0, 2.0), (0.0, 2.0));
        assert_eq!(pan_gains(0.5, 1.0), (0.25, 0.75));
    }

    #[test]
    fn test_mono_sample_to_stereo() {
        let mut voices = vec![voice(vec![1.0, 0.5], 1, 1.0, -1.0, false)];
        let mut output = vec![0.0; 6];
        mix_voices(&mut voices, &mut output, 2);
        assert_eq!(output, vec![1.0, 0.0, 0.5, 0.0, 0.0, 0.0]);
        assert!(!voices[0].is_active());
    }

    #[test]
    fn test_stereo_sample_to_stereo() {
        let mut voices = vec![voice(vec![0.2, 0.4, 0.6, 0.8], 2, 2.0, 0.0, false)];
        let mut output = vec![0.0; 4];
        mix_voices(&mut voices, &mut output, 2);
        assert_eq!(output, vec![0.2, 0.4, 0.6, 0.8]);
    }

    #[test]
    fn test_mono_output_ignores_pan() {
        let mut voices = vec![
            voice(vec![0.5, 0.5], 1, 1.0, 1.0, false),
            voice(vec![0.2, 0.4, 0.2, 0.4], 2, 0.5, -1.0, false),
        ];
        let mut output = vec![0.0; 2];
        mix_voices(&mut voices, &mut output, 1);
        assert!((output[0] - 0.65).abs() < 1e-6);
        assert!((output[1] - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_looping_wraps_within_buffer() {
        let mut voices = vec![voice(vec![1.0, 2.0, 3.0], 1, 2.0, -1.0, true)];
        let mut output = vec![0.0; 7];
        mix_voices(&mut voices, &mut output, 1);
        assert_eq!(output, vec![2.0, 4.0, 6.0, 2.0, 4.0, 6.0, 2.0]);
        assert!(voices[0].is_active());
    }

    #[test]
    fn test_wide_outputs_only_get_stereo() {
        let mut voices = vec![voice(vec![1.0], 1, 2.0, 0.0, false)];
        let mut output = vec![0.0; 4];
        mix_voices(&mut voices, &mut output, 4);
        assert_eq!(output, vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clip() {
        let mut output = vec![1.5, -2.0, 0.25];
        clip(&mut output);
        assert_eq!(output, vec![1.0, -1.0, 0.25]);
    }
}
