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
use std::fmt;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, span, Level};

use super::backend::{AudioBackend, EventSender, OutputStream, StreamEvent};
use super::render::RenderHandle;
use super::stream::StreamConfig;
use super::thread_priority::CallbackPriority;
use crate::error::EngineError;

fn unavailable(err: impl fmt::Display) -> EngineError {
    EngineError::DeviceUnavailable(err.to_string())
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

/// An output device as listed by [`list_devices`].
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub host: &'static str,
    pub name: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Lists output devices across every available host.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)
            .map_err(|e| e.to_string())
            .and_then(|host| host.output_devices().map_err(|e| e.to_string()))
        {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e,
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let Ok(configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = configs.map(|c| c.channels()).max().unwrap_or(0);
            if max_channels == 0 {
                continue;
            }
            if let Some(name) = device_name(&device) {
                devices.push(DeviceInfo {
                    host: host_id.name(),
                    name,
                    max_channels,
                });
            }
        }
    }
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    devices
}

/// Output through cpal. The host is picked by audio API name and the device
/// by name; either falls back to the platform default when unset.
pub struct CpalBackend {
    host_id: cpal::HostId,
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new(device: Option<&str>, audio_api: Option<&str>) -> Result<CpalBackend, EngineError> {
        let host_id = match audio_api {
            Some(api) => cpal::available_hosts()
                .into_iter()
                .find(|id| id.name().eq_ignore_ascii_case(api))
                .ok_or_else(|| unavailable(format!("audio API {} is not available", api)))?,
            None => cpal::default_host().id(),
        };
        Ok(CpalBackend {
            host_id,
            device_name: device.map(str::to_string),
        })
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> String {
        format!(
            "{} ({})",
            self.device_name.as_deref().unwrap_or("default"),
            self.host_id.name()
        )
    }

    fn open(
        &mut self,
        config: &StreamConfig,
        renderer: RenderHandle,
        events: EventSender,
    ) -> Result<Box<dyn OutputStream>, EngineError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let host_id = self.host_id;
        let device_name = self.device_name.clone();
        let requested = config.clone();

        // cpal streams are not Send everywhere, so one thread owns the stream
        // for its whole life and takes orders over a channel.
        let thread = thread::spawn(move || {
            let span = span!(Level::INFO, "output thread (cpal)");
            let _enter = span.enter();
            output_thread(
                host_id,
                device_name,
                requested,
                renderer,
                events,
                control_rx,
                ready_tx,
            )
        });

        match ready_rx.recv() {
            Ok(Ok((negotiated, capacity))) => Ok(Box::new(CpalOutputStream {
                config: negotiated,
                capacity,
                control: Some(control_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(unavailable("output thread exited before the stream was built"))
            }
        }
    }
}

enum Control {
    Play(Sender<Result<(), EngineError>>),
    Pause(Sender<Result<(), EngineError>>),
}

type Ready = Result<(StreamConfig, u32), EngineError>;

fn output_thread(
    host_id: cpal::HostId,
    device_name: Option<String>,
    requested: StreamConfig,
    renderer: RenderHandle,
    events: EventSender,
    control: Receiver<Control>,
    ready: Sender<Ready>,
) {
    let (stream, negotiated, capacity) =
        match build_stream(host_id, device_name.as_deref(), &requested, renderer, events) {
            Ok(built) => built,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
    let _ = ready.send(Ok((negotiated, capacity)));

    // Runs until the owning OutputStream drops its sender.
    for message in control.iter() {
        match message {
            Control::Play(reply) => {
                let _ = reply.send(stream.play().map_err(unavailable));
            }
            Control::Pause(reply) => {
                let _ = reply.send(stream.pause().map_err(unavailable));
            }
        }
    }
    debug!("Closing CPAL output stream");
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, EngineError> {
    match name {
        Some(name) => host
            .output_devices()
            .map_err(unavailable)?
            .find(|device| device_name(device).as_deref().map(str::trim) == Some(name))
            .ok_or_else(|| unavailable(format!("no device found with name {}", name))),
        None => host
            .default_output_device()
            .ok_or_else(|| unavailable("no default output device")),
    }
}

/// Picks the requested rate if any supported config covers it, otherwise the
/// device default.
fn negotiate_rate(device: &cpal::Device, requested: &StreamConfig, default_rate: u32) -> u32 {
    let supported = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|c| {
                c.channels() >= requested.channel_count
                    && c.min_sample_rate() <= requested.sample_rate
                    && c.max_sample_rate() >= requested.sample_rate
            })
        })
        .unwrap_or(false);
    if supported {
        requested.sample_rate
    } else {
        default_rate
    }
}

fn build_stream(
    host_id: cpal::HostId,
    device_name: Option<&str>,
    requested: &StreamConfig,
    renderer: RenderHandle,
    events: EventSender,
) -> Result<(cpal::Stream, StreamConfig, u32), EngineError> {
    let host = cpal::host_from_id(host_id).map_err(unavailable)?;
    let device = find_device(&host, device_name)?;
    let default = device.default_output_config().map_err(unavailable)?;

    let mut negotiated = requested.clone();
    negotiated.sample_rate = negotiate_rate(&device, requested, default.sample_rate());
    negotiated.mmap_enabled = false;
    let (buffer_size, capacity) = match default.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let frames = requested
                .buffer_size_in_frames
                .max(*min)
                .min(*max);
            negotiated.buffer_size_in_frames = frames;
            (cpal::BufferSize::Fixed(frames), *max)
        }
        cpal::SupportedBufferSize::Unknown => (
            cpal::BufferSize::Default,
            requested.buffer_size_in_frames,
        ),
    };

    let stream_config = cpal::StreamConfig {
        channels: negotiated.channel_count,
        sample_rate: negotiated.sample_rate,
        buffer_size,
    };
    let channels = negotiated.channel_count as usize;
    let scratch_len = capacity as usize * channels;

    let stream = match default.sample_format() {
        cpal::SampleFormat::F32 => {
            let mut priority = CallbackPriority::from_env();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    priority.apply_once();
                    renderer.render(data, channels);
                },
                error_callback(events),
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            build_converting::<i16>(&device, &stream_config, renderer, events, scratch_len)
        }
        cpal::SampleFormat::I32 => {
            build_converting::<i32>(&device, &stream_config, renderer, events, scratch_len)
        }
        cpal::SampleFormat::U16 => {
            build_converting::<u16>(&device, &stream_config, renderer, events, scratch_len)
        }
        other => {
            return Err(unavailable(format!(
                "unsupported device sample format {:?}",
                other
            )))
        }
    }
    .map_err(unavailable)?;

    info!(
        device = device_name.unwrap_or("default"),
        host = host_id.name(),
        sample_rate = negotiated.sample_rate,
        buffer_size = negotiated.buffer_size_in_frames,
        "CPAL output stream built"
    );
    Ok((stream, negotiated, capacity))
}

/// Integer formats render into a float scratch buffer sized for the largest
/// buffer the device allows, then convert.
fn build_converting<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: RenderHandle,
    events: EventSender,
    scratch_len: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let mut scratch = vec![0.0f32; scratch_len];
    let mut priority = CallbackPriority::from_env();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            priority.apply_once();
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let scratch = &mut scratch[..data.len()];
            renderer.render(scratch, channels);
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src);
            }
        },
        error_callback(events),
        None,
    )
}

fn error_callback(events: EventSender) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        error!("CPAL output stream error: {}", err);
        let event = match err {
            cpal::StreamError::DeviceNotAvailable | cpal::StreamError::StreamInvalidated => {
                StreamEvent::Disconnected
            }
            other => StreamEvent::Error(other.to_string()),
        };
        let _ = events.send(event);
    }
}

struct CpalOutputStream {
    config: StreamConfig,
    capacity: u32,
    control: Option<Sender<Control>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutputStream {
    fn request(
        &self,
        message: impl FnOnce(Sender<Result<(), EngineError>>) -> Control,
    ) -> Result<(), EngineError> {
        let control = self
            .control
            .as_ref()
            .ok_or(EngineError::StreamDisconnected)?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        control
            .send(message(reply_tx))
            .map_err(|_| EngineError::StreamDisconnected)?;
        reply_rx.recv().map_err(|_| EngineError::StreamDisconnected)?
    }
}

impl OutputStream for CpalOutputStream {
    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.request(Control::Play)
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.request(Control::Pause)
    }

    fn buffer_capacity_in_frames(&self) -> u32 {
        self.capacity
    }
}

impl Drop for CpalOutputStream {
    fn drop(&mut self) {
        // Dropping the sender ends the output thread, which drops the stream.
        self.control.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("CPAL output thread panicked");
            }
        }
    }
}
