// src/audio/device.rs
// Hardware stream seam. The engine only talks to `AudioBackend`; the cpal
// implementation opens the real devices.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, Stream, StreamConfig};
use crossbeam::channel::Sender;

use super::capture::CaptureCallback;
use super::playback::PlaybackCallback;
use super::{CHANNELS, EngineConfig, EngineEvent};
use crate::error::{LooperError, Result};

/// Shape of a stream requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub sample_rate: u32,
    /// Frames per hardware callback
    pub block_size: usize,
    pub channels: u16,
}

impl StreamSettings {
    pub fn output(config: &EngineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            channels: CHANNELS as u16,
        }
    }

    pub fn input(config: &EngineConfig, channels: u16) -> Self {
        Self {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            channels,
        }
    }
}

/// A running hardware stream. Dropping the handle closes it.
pub trait ActiveStream {}

pub trait AudioBackend {
    /// Start an output stream driven by `callback`
    fn open_output(
        &self,
        settings: &StreamSettings,
        callback: PlaybackCallback,
    ) -> Result<Box<dyn ActiveStream>>;

    /// Start an input stream feeding `callback`
    fn open_input(
        &self,
        settings: &StreamSettings,
        callback: CaptureCallback,
    ) -> Result<Box<dyn ActiveStream>>;

    /// Channel count the input device captures with
    fn input_channels(&self) -> Result<u16>;
}

struct CpalStream(#[allow(dead_code)] Stream);

impl ActiveStream for CpalStream {}

/// Default host devices through cpal
pub struct CpalBackend {
    host: Host,
    events: Sender<EngineEvent>,
}

impl CpalBackend {
    pub fn new(events: Sender<EngineEvent>) -> Self {
        Self {
            host: cpal::default_host(),
            events,
        }
    }

    fn output_device(&self) -> Result<Device> {
        self.host
            .default_output_device()
            .ok_or_else(|| LooperError::Device("No output device available".to_string()))
    }

    fn input_device(&self) -> Result<Device> {
        self.host
            .default_input_device()
            .ok_or_else(|| LooperError::Device("No input device available".to_string()))
    }

    fn stream_config(settings: &StreamSettings) -> StreamConfig {
        StreamConfig {
            channels: settings.channels,
            sample_rate: cpal::SampleRate(settings.sample_rate),
            buffer_size: BufferSize::Fixed(settings.block_size as u32),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open_output(
        &self,
        settings: &StreamSettings,
        mut callback: PlaybackCallback,
    ) -> Result<Box<dyn ActiveStream>> {
        let device = self.output_device()?;
        log::info!(
            "Output device: {} ({}Hz, {}ch, {} frames)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            settings.sample_rate,
            settings.channels,
            settings.block_size
        );

        let err_events = self.events.clone();
        let stream = device.build_output_stream(
            &Self::stream_config(settings),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback.process(data),
            move |err| {
                let _ = err_events.try_send(EngineEvent::StreamError(err.to_string()));
            },
            None,
        )?;
        stream.play()?;
        Ok(Box::new(CpalStream(stream)))
    }

    fn open_input(
        &self,
        settings: &StreamSettings,
        mut callback: CaptureCallback,
    ) -> Result<Box<dyn ActiveStream>> {
        let device = self.input_device()?;
        log::info!(
            "Input device: {} ({}Hz, {}ch, {} frames)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            settings.sample_rate,
            settings.channels,
            settings.block_size
        );

        let err_events = self.events.clone();
        let stream = device.build_input_stream(
            &Self::stream_config(settings),
            move |data: &[f32], _: &cpal::InputCallbackInfo| callback.process(data),
            move |err| {
                let _ = err_events.try_send(EngineEvent::StreamError(err.to_string()));
            },
            None,
        )?;
        stream.play()?;
        Ok(Box::new(CpalStream(stream)))
    }

    fn input_channels(&self) -> Result<u16> {
        let config = self
            .input_device()?
            .default_input_config()
            .map_err(|e| LooperError::Device(e.to_string()))?;
        Ok(config.channels())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_follow_engine_config() {
        let config = EngineConfig {
            sample_rate: 48000,
            block_size: 256,
            ..EngineConfig::default()
        };
        let output = StreamSettings::output(&config);
        assert_eq!(output.channels, 2);
        assert_eq!(output.block_size, 256);

        let input = StreamSettings::input(&config, 1);
        assert_eq!(input.channels, 1);
        assert_eq!(input.sample_rate, 48000);

        let cpal_config = CpalBackend::stream_config(&output);
        assert_eq!(cpal_config.sample_rate, cpal::SampleRate(48000));
        assert_eq!(cpal_config.buffer_size, BufferSize::Fixed(256));
    }
}
