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

use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel::Receiver;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::audio::mock::{MockBackend, MockDevice};
use crate::audio::{
    command_queue, CommandSender, RenderHandle, RenderStats, Renderer, StreamConfig,
    StreamController, StreamEvent,
};
use crate::config::RetriggerBehavior;

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Encodes interleaved float samples as a 32-bit float WAV file.
pub fn wav_bytes(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(
            &mut cursor,
            WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        )
        .expect("create wav writer");
        for sample in samples {
            writer.write_sample(*sample).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// Encodes interleaved 16-bit samples as a PCM WAV file.
pub fn wav_bytes_i16(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(
            &mut cursor,
            WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
        )
        .expect("create wav writer");
        for sample in samples {
            writer.write_sample(*sample).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// A one-second mono sample holding `value` in every frame.
pub fn constant_wav(value: f32, sample_rate: u32) -> Vec<u8> {
    wav_bytes(&vec![value; sample_rate as usize], 1, sample_rate)
}

/// A closed stream controller over `device` with a two-slot renderer.
pub fn mock_controller(
    device: &MockDevice,
) -> (CommandSender, StreamController, Receiver<StreamEvent>) {
    let (tx, rx) = command_queue(64, 8);
    let renderer = Renderer::new(
        rx,
        2,
        8,
        0,
        RetriggerBehavior::Cut,
        Arc::new(RenderStats::new(2)),
    );
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let controller = StreamController::new(
        Box::new(MockBackend::new(device.clone())),
        StreamConfig::default(),
        RenderHandle::new(renderer),
        events_tx,
    );
    (tx, controller, events_rx)
}
