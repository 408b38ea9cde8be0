//! Audio Engine
//!
//! Plays the patch through the system output device with cpal. The engine
//! renders at a fixed 48 kHz, so the stream asks the device for that rate
//! and falls back to the device default (with a warning) when it is not
//! offered. f32, i16 and u16 device formats are supported.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Host, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use log::{error, info, warn};
use thiserror::Error;

use super::audio_processor::AudioProcessor;
use crate::dsp::SAMPLE_RATE;

/// Errors from the audio host.
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("No audio output device found")]
    NoOutputDevice,
    #[error("Failed to get device configuration: {0}")]
    Configuration(String),
    #[error("Failed to create audio stream: {0}")]
    StreamCreation(String),
    #[error("Failed to control audio playback: {0}")]
    Playback(String),
}

/// Information about an audio output device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Index in the device list, for [`AudioEngine::select_device`].
    pub index: usize,
}

/// Owns the output device and, while playing, the stream whose callback
/// owns the [`AudioProcessor`].
pub struct AudioEngine {
    host: Host,
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

/// Sample formats the stream can be built for, in order of preference.
const FORMATS: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Picks a supported format at the engine rate, or the device default.
fn stream_config(device: &Device) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let wanted = SampleRate(SAMPLE_RATE);
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::Configuration(e.to_string()))?
        .filter(|range| range.min_sample_rate() <= wanted && range.max_sample_rate() >= wanted)
        .collect();

    for format in FORMATS {
        if let Some(range) = ranges.iter().find(|range| range.sample_format() == format) {
            return Ok((range.clone().with_sample_rate(wanted).config(), format));
        }
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| AudioError::Configuration(e.to_string()))?;
    warn!(
        "device does not offer {} Hz output, using {} Hz {:?}; pitch will be off",
        SAMPLE_RATE,
        fallback.sample_rate().0,
        fallback.sample_format()
    );
    Ok((fallback.config(), fallback.sample_format()))
}

impl AudioEngine {
    /// Opens the default output device.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;
        let (config, sample_format) = stream_config(&device)?;

        Ok(Self {
            host,
            device,
            config,
            sample_format,
            stream: None,
        })
    }

    pub fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        let default_name = self
            .host
            .default_output_device()
            .and_then(|d| d.name().ok());

        self.host
            .output_devices()
            .map(|devices| {
                devices
                    .enumerate()
                    .filter_map(|(index, device)| {
                        device.name().ok().map(|name| DeviceInfo {
                            is_default: Some(&name) == default_name.as_ref(),
                            name,
                            index,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn current_device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "Unknown".to_string())
    }

    /// Switches to another output device by index.
    ///
    /// A running stream is stopped; its processor goes with it, so the
    /// caller starts again with a fresh one.
    pub fn select_device(&mut self, index: usize) -> Result<(), AudioError> {
        if self.is_running() {
            warn!("switching devices drops the running processor");
            self.stop()?;
        }

        let device = self
            .host
            .output_devices()
            .map_err(|e| AudioError::Configuration(e.to_string()))?
            .nth(index)
            .ok_or(AudioError::NoOutputDevice)?;
        (self.config, self.sample_format) = stream_config(&device)?;
        self.device = device;
        info!("selected output device {}", self.current_device_name());
        Ok(())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Starts playback, moving the processor into the audio callback.
    ///
    /// The callback is the only owner of the processor, so it renders
    /// without locks. Does nothing if a stream is already running.
    pub fn start_with_processor(&mut self, processor: AudioProcessor) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(processor)?,
            SampleFormat::I16 => self.build_stream::<i16>(processor)?,
            SampleFormat::U16 => self.build_stream::<u16>(processor)?,
            other => {
                return Err(AudioError::Configuration(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::Playback(e.to_string()))?;

        info!(
            "playing on {} ({} Hz, {} channels, {:?})",
            self.current_device_name(),
            self.sample_rate(),
            self.channels(),
            self.sample_format
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn build_stream<T>(&self, mut processor: AudioProcessor) -> Result<Stream, AudioError>
    where
        T: SizedSample + FromSample<i16>,
    {
        let channels = self.config.channels as usize;
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    processor.process_with(data, channels, <T as Sample>::from_sample::<i16>);
                },
                move |err| {
                    error!("audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| AudioError::StreamCreation(e.to_string()))
    }

    /// Stops playback and drops the stream together with its processor.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| AudioError::Playback(e.to_string()))?;
            info!("playback stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NoOutputDevice;
        assert_eq!(err.to_string(), "No audio output device found");

        let err = AudioError::StreamCreation("test error".to_string());
        assert!(err.to_string().contains("test error"));
    }

    #[test]
    fn test_device_info() {
        let info = DeviceInfo {
            name: "Test Device".to_string(),
            is_default: true,
            index: 0,
        };
        assert_eq!(info.name, "Test Device");
        assert!(info.is_default);
        assert_eq!(info.index, 0);
    }

    #[test]
    fn test_device_formats_convert_engine_samples() {
        assert_eq!(FORMATS[0], SampleFormat::F32);
        assert_eq!(<i16 as Sample>::from_sample(-1234i16), -1234);
        assert_eq!(<u16 as Sample>::from_sample(0i16), 32768);
        assert!(<f32 as Sample>::from_sample(32767i16) > 0.99);
    }

    // Opening a device needs audio hardware, which CI does not have.
}
