//! Raw microphone capture for the test harness.
//!
//! The device is asked for the untouched signal: echo cancellation, automatic
//! gain and host noise suppression are all turned off. The rate the device
//! actually delivers is read back from the stream and becomes the take's
//! sample rate.

use std::time::Duration;

use log::{debug, info};

use crate::buffer::AudioBuffer;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{track, TrackWriter};

pub const MIN_CAPTURE_SECS: f32 = 3.0;
pub const MAX_CAPTURE_SECS: f32 = 10.0;
/// Shorter takes are rejected as insufficient.
pub const MIN_USABLE_CAPTURE_SECS: f32 = 0.5;

/// What the harness asks the capture device for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
}

impl CaptureConstraints {
    /// Mono at `sample_rate` with every host enhancement disabled.
    pub fn raw(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channel_count: 1,
            echo_cancellation: false,
            auto_gain_control: false,
            noise_suppression: false,
        }
    }
}

/// An input device. `open` starts delivering samples into `sink`.
pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;

    fn open(
        &self,
        constraints: &CaptureConstraints,
        sink: TrackWriter,
    ) -> PipelineResult<Box<dyn CaptureStream>>;
}

/// A running capture.
pub trait CaptureStream: Send {
    /// Rate the device actually runs at.
    fn sample_rate(&self) -> u32;

    /// Stop delivering samples and release the device.
    fn stop(&mut self);
}

pub fn clamp_capture_secs(secs: f32) -> f32 {
    if secs.is_nan() {
        MIN_CAPTURE_SECS
    } else {
        secs.clamp(MIN_CAPTURE_SECS, MAX_CAPTURE_SECS)
    }
}

/// Capture `secs` (clamped to 3..=10) of raw mono audio.
///
/// Completes on a timer; there is no way to cancel a take once started.
pub async fn record(
    device: &dyn CaptureDevice,
    constraints: CaptureConstraints,
    secs: f32,
) -> PipelineResult<AudioBuffer> {
    let secs = clamp_capture_secs(secs);
    // Room for a device running at up to twice the requested rate.
    let capacity = (constraints.sample_rate as f32 * secs * 2.0) as usize + 8192;
    let (sink, input) = track(capacity);

    let mut stream = device.open(&constraints, sink)?;
    let rate = stream.sample_rate();
    if rate != constraints.sample_rate {
        info!(
            "'{}' runs at {} Hz (asked for {} Hz)",
            device.name(),
            rate,
            constraints.sample_rate
        );
    }

    tokio::time::sleep(Duration::from_secs_f32(secs)).await;
    stream.stop();

    let samples = input.drain();
    let captured_secs = samples.len() as f32 / rate.max(1) as f32;
    debug!("captured {} samples ({:.2}s) from '{}'", samples.len(), captured_secs, device.name());
    if input.dropped() > 0 {
        debug!("capture ring dropped {} samples", input.dropped());
    }
    if captured_secs < MIN_USABLE_CAPTURE_SECS {
        return Err(PipelineError::InsufficientCapture {
            captured_secs,
            required_secs: MIN_USABLE_CAPTURE_SECS,
        });
    }
    Ok(AudioBuffer::mono(rate, samples))
}

// =============================================================================
// Buffer-backed device
// =============================================================================

/// Plays a prepared buffer into the capture sink, for offline runs and tests.
#[derive(Debug, Clone)]
pub struct BufferCapture {
    name: String,
    buffer: AudioBuffer,
    deny: bool,
}

impl BufferCapture {
    pub fn new(name: impl Into<String>, buffer: AudioBuffer) -> Self {
        Self {
            name: name.into(),
            buffer,
            deny: false,
        }
    }

    /// A device that refuses access, like a denied permission prompt.
    pub fn denied(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: AudioBuffer::silence(48000, 1, 0),
            deny: true,
        }
    }
}

struct BufferStream {
    rate: u32,
    sink: Option<TrackWriter>,
}

impl CaptureStream for BufferStream {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn stop(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
    }
}

impl CaptureDevice for BufferCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(
        &self,
        _constraints: &CaptureConstraints,
        mut sink: TrackWriter,
    ) -> PipelineResult<Box<dyn CaptureStream>> {
        if self.deny {
            return Err(PipelineError::DeviceAccessDenied(self.name.clone()));
        }
        sink.write(&self.buffer.to_mono());
        Ok(Box::new(BufferStream {
            rate: self.buffer.sample_rate(),
            sink: Some(sink),
        }))
    }
}
