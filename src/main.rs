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
use std::error::Error;
use std::path::{Path, PathBuf};
#[cfg(feature = "cpal")]
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use hound::{SampleFormat, WavSpec, WavWriter};
use lowlat::audio::mock::{MockBackend, MockDevice};
use lowlat::config::{EngineConfig, Kit};
use lowlat::effects::effect_descriptions;
use lowlat::Engine;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A low-latency sample player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints the effect catalog as JSON.
    Effects {},
    /// Renders a kit and trigger pattern offline into a WAV file.
    Render {
        /// The path to the kit definition.
        kit_path: PathBuf,
        /// The trigger pattern. Steps are separated by spaces or commas, each
        /// step is a list of pad numbers joined by '+', and '.' is a rest.
        /// For example, "0 2 1+2 .".
        pattern: String,
        /// The WAV file to write.
        output_path: PathBuf,
        /// The path to an engine config.
        #[arg(short, long)]
        config_path: Option<PathBuf>,
        /// The length of a pattern step.
        #[arg(short, long, default_value = "250ms")]
        step: String,
        /// How long to keep rendering after the last step.
        #[arg(short, long, default_value = "1s")]
        tail: String,
    },
    /// Lists the available audio output devices.
    #[cfg(feature = "cpal")]
    Devices {},
    /// Plays a kit and trigger pattern through an audio device.
    #[cfg(feature = "cpal")]
    Play {
        /// The path to the kit definition.
        kit_path: PathBuf,
        /// The trigger pattern, in the same form as for render.
        pattern: String,
        /// The path to an engine config.
        #[arg(short, long)]
        config_path: Option<PathBuf>,
        /// The device name to play through. Overrides the config.
        #[arg(short, long)]
        device_name: Option<String>,
        /// The length of a pattern step.
        #[arg(short, long, default_value = "250ms")]
        step: String,
        /// How many times to play the pattern.
        #[arg(short, long, default_value_t = 1)]
        repeat: u32,
    },
}

/// One step of a trigger pattern: the pads to hit together.
type Step = Vec<usize>;

fn parse_pattern(pattern: &str) -> Result<Vec<Step>, Box<dyn Error>> {
    let steps = pattern
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|step| !step.is_empty())
        .map(|step| {
            if step == "." {
                return Ok(Vec::new());
            }
            step.split('+')
                .map(|pad| {
                    pad.parse::<usize>()
                        .map_err(|e| format!("malformed pattern step '{}': {}", step, e).into())
                })
                .collect::<Result<Step, Box<dyn Error>>>()
        })
        .collect::<Result<Vec<Step>, Box<dyn Error>>>()?;
    if steps.is_empty() {
        return Err("pattern has no steps".into());
    }
    Ok(steps)
}

fn parse_duration(value: &str) -> Result<Duration, Box<dyn Error>> {
    Ok(DurationString::from_string(value.to_string())?.into())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn Error>> {
    Ok(match path {
        Some(path) => EngineConfig::deserialize(path)?,
        None => EngineConfig::default(),
    })
}

/// Bounces `steps` through a mock device and returns the interleaved output
/// and its channel count and sample rate.
fn render(
    config: EngineConfig,
    kit: &Kit,
    steps: &[Step],
    step: Duration,
    tail: Duration,
) -> Result<(Vec<f32>, u16, u32), Box<dyn Error>> {
    let device = MockDevice::new("render");
    let mut engine = Engine::new(config, Box::new(MockBackend::new(device.clone())));
    engine.create()?;
    engine.load_kit(kit)?;

    let stream = engine.stream_config()?;
    let rate = stream.sample_rate as f64;
    let burst = stream.frames_per_burst as usize;
    let pump = |frames: usize, output: &mut Vec<f32>| {
        let mut remaining = frames;
        while remaining > 0 {
            let frames = remaining.min(burst);
            output.extend(device.pump(frames));
            remaining -= frames;
        }
    };

    let step_frames = (step.as_secs_f64() * rate).round() as usize;
    let mut output = Vec::new();
    for pads in steps {
        for pad in pads {
            engine.trigger(*pad)?;
        }
        pump(step_frames, &mut output);
    }
    pump((tail.as_secs_f64() * rate).round() as usize, &mut output);
    engine.destroy();

    Ok((output, stream.channel_count, stream.sample_rate))
}

fn write_wav(
    path: &Path,
    samples: &[f32],
    channels: u16,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(feature = "cpal")]
fn play(
    config: EngineConfig,
    kit: &Kit,
    steps: &[Step],
    step: Duration,
    repeat: u32,
) -> Result<(), Box<dyn Error>> {
    let mut engine = Engine::from_config(config)?;
    engine.create()?;
    engine.load_kit(kit)?;

    for _ in 0..repeat {
        for pads in steps {
            for pad in pads {
                engine.trigger(*pad)?;
            }
            thread::sleep(step);
            if let Some(notification) = engine.poll_notification() {
                return Err(format!("{:?}", notification).into());
            }
        }
    }
    engine.stop_all()?;
    thread::sleep(Duration::from_millis(100));
    engine.destroy();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Effects {} => {
            println!("{}", serde_json::to_string_pretty(effect_descriptions())?);
        }
        Commands::Render {
            kit_path,
            pattern,
            output_path,
            config_path,
            step,
            tail,
        } => {
            let config = load_config(config_path.as_deref())?;
            let kit = Kit::deserialize(&kit_path)?;
            let steps = parse_pattern(&pattern)?;
            let (samples, channels, sample_rate) = render(
                config,
                &kit,
                &steps,
                parse_duration(&step)?,
                parse_duration(&tail)?,
            )?;
            write_wav(&output_path, &samples, channels, sample_rate)?;
            info!(
                path = %output_path.display(),
                frames = samples.len() / channels as usize,
                "Rendered pattern"
            );
        }
        #[cfg(feature = "cpal")]
        Commands::Devices {} => {
            let devices = lowlat::audio::cpal::list_devices();

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        #[cfg(feature = "cpal")]
        Commands::Play {
            kit_path,
            pattern,
            config_path,
            device_name,
            step,
            repeat,
        } => {
            let mut config = load_config(config_path.as_deref())?;
            if let Some(device_name) = device_name {
                config = config.with_device(&device_name);
            }
            let kit = Kit::deserialize(&kit_path)?;
            let steps = parse_pattern(&pattern)?;
            play(config, &kit, &steps, parse_duration(&step)?, repeat)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern() {
        assert_eq!(
            parse_pattern("0 2, 1+2 .").unwrap(),
            vec![vec![0], vec![2], vec![1, 2], vec![]]
        );
        assert!(parse_pattern("0 x").is_err());
        assert!(parse_pattern("  ").is_err());
    }

    #[test]
    fn test_render_to_wav() {
        let dir = tempfile::tempdir().unwrap();
        let mut kick = hound::WavWriter::create(
            dir.path().join("kick.wav"),
            WavSpec {
                channels: 1,
                sample_rate: 48000,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        )
        .unwrap();
        for _ in 0..100 {
            kick.write_sample(0.5f32).unwrap();
        }
        kick.finalize().unwrap();
        let kit_path = dir.path().join("kit.yaml");
        std::fs::write(&kit_path, "pads:\n  - file: kick.wav\n    pan: -1.0\n").unwrap();
        let kit = Kit::deserialize(&kit_path).unwrap();

        let config = EngineConfig::default().with_fade_ms(0.0);
        let steps = parse_pattern("0 . 0").unwrap();
        let (samples, channels, sample_rate) = render(
            config,
            &kit,
            &steps,
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!((channels, sample_rate), (2, 48000));
        // Four 480 frame periods, stereo.
        assert_eq!(samples.len(), 4 * 480 * 2);
        assert_eq!(samples[0], 0.5);
        assert_eq!(samples[1], 0.0);
        assert_eq!(samples[100 * 2], 0.0);
        assert_eq!(samples[960 * 2], 0.5);

        let output_path = dir.path().join("out.wav");
        write_wav(&output_path, &samples, channels, sample_rate).unwrap();
        let reader = hound::WavReader::open(&output_path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len() as usize, samples.len());
    }
}
