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

//! WAV decoding for sample assets.
//!
//! Samples are decoded entirely into memory as interleaved f32 so the render
//! thread never touches storage or does format conversion.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};
use tracing::debug;

use crate::error::EngineError;

/// A decoded sample at its native rate and channel count.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSample {
    /// Interleaved sample data.
    data: Vec<f32>,
    /// Number of channels, 1 or 2.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl DecodedSample {
    /// Creates a decoded sample from interleaved data.
    pub fn new(
        data: Vec<f32>,
        channel_count: u16,
        sample_rate: u32,
    ) -> Result<DecodedSample, EngineError> {
        if !(1..=2).contains(&channel_count) {
            return Err(EngineError::AssetDecode(format!(
                "unsupported channel count {}",
                channel_count
            )));
        }
        if sample_rate == 0 {
            return Err(EngineError::AssetDecode("sample rate is zero".to_string()));
        }
        if data.is_empty() {
            return Err(EngineError::AssetDecode(
                "sample contains no frames".to_string(),
            ));
        }
        if data.len() % channel_count as usize != 0 {
            return Err(EngineError::AssetDecode(
                "sample data ends mid-frame".to_string(),
            ));
        }
        Ok(DecodedSample {
            data,
            channel_count,
            sample_rate,
        })
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    /// Returns the data converted to `target_rate`. The channel count is kept.
    pub fn conformed_to(&self, target_rate: u32) -> Vec<f32> {
        if target_rate == self.sample_rate {
            return self.data.clone();
        }
        transcode_samples(
            &self.data,
            self.channel_count,
            self.sample_rate,
            target_rate,
        )
    }
}

/// Decodes WAV container bytes into interleaved f32 samples.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedSample, EngineError> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let data = match spec.sample_format {
        SampleFormat::Float => {
            if spec.bits_per_sample != 32 {
                return Err(EngineError::AssetDecode(format!(
                    "unsupported float bit depth {}",
                    spec.bits_per_sample
                )));
            }
            reader
                .into_samples::<f32>()
                .collect::<Result<Vec<f32>, hound::Error>>()?
        }
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(EngineError::AssetDecode(format!(
                    "unsupported integer bit depth {}",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<Result<Vec<f32>, hound::Error>>()?
        }
    };

    debug!(
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        samples = data.len(),
        "Decoded WAV sample"
    );

    DecodedSample::new(data, spec.channels, spec.sample_rate)
}

/// Converts interleaved samples between rates with linear interpolation.
pub fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);

    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let idx0 = source_frame * channels + channel;
            let idx1 = (source_frame + 1) * channels + channel;

            let s0 = samples.get(idx0).copied().unwrap_or(0.0);
            let s1 = samples.get(idx1).copied().unwrap_or(s0);

            output.push(s0 + (s1 - s0) * frac);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{wav_bytes, wav_bytes_i16};

    #[test]
    fn test_decode_float_wav() {
        let bytes = wav_bytes(&[0.5, -0.5, 0.25], 1, 44100);
        let sample = decode_wav(&bytes).unwrap();
        assert_eq!(sample.channel_count(), 1);
        assert_eq!(sample.sample_rate(), 44100);
        assert_eq!(sample.data(), &[0.5, -0.5, 0.25]);
    }

    #[test]
    fn test_decode_int_wav() {
        let bytes = wav_bytes_i16(&[16384, -32768, 0, 8192], 2, 48000);
        let sample = decode_wav(&bytes).unwrap();
        assert_eq!(sample.channel_count(), 2);
        assert_eq!(sample.frame_count(), 2);
        assert_eq!(sample.data(), &[0.5, -1.0, 0.0, 0.25]);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_wav(b"definitely not a wav file"),
            Err(EngineError::AssetDecode(_))
        ));
        assert!(matches!(decode_wav(&[]), Err(EngineError::AssetDecode(_))));
    }

    #[test]
    fn test_decode_rejects_surround() {
        let bytes = wav_bytes(&[0.0; 12], 6, 48000);
        assert!(matches!(
            decode_wav(&bytes),
            Err(EngineError::AssetDecode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty() {
        let bytes = wav_bytes(&[], 1, 48000);
        assert!(matches!(
            decode_wav(&bytes),
            Err(EngineError::AssetDecode(_))
        ));
    }

    #[test]
    fn test_transcode_samples() {
        // Simple mono sine wave at 44100Hz
        let source_rate = 44100;
        let target_rate = 48000;
        let source_samples: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / source_rate as f32).sin())
            .collect();

        let result = transcode_samples(&source_samples, 1, source_rate, target_rate);

        let expected_len = (4410.0_f64 * 48000.0 / 44100.0).ceil() as usize;
        assert_eq!(result.len(), expected_len);
    }

    #[test]
    fn test_transcode_stereo_keeps_channels() {
        let source_samples = vec![1.0f32, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let result = transcode_samples(&source_samples, 2, 44100, 48000);

        assert_eq!(result.len() % 2, 0);
        assert!(result.len() >= 8);
        for frame in result.chunks(2) {
            assert!((frame[0] - 1.0).abs() < 1e-6);
            assert!((frame[1] + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_transcode_downsample_interpolates() {
        let result = transcode_samples(&[0.0, 1.0, 2.0, 3.0], 1, 4, 2);
        assert_eq!(result, vec![0.0, 2.0]);

        let result = transcode_samples(&[0.0, 1.0], 1, 2, 4);
        assert_eq!(result, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_conformed_to_same_rate_is_identity() {
        let sample = DecodedSample::new(vec![0.1, 0.2], 1, 48000).unwrap();
        assert_eq!(sample.conformed_to(48000), vec![0.1, 0.2]);
        assert_eq!(sample.conformed_to(96000).len(), 4);
    }
}
