//! Band-limited sample rate conversion between the session rate and a
//! backend's native rate.
//!
//! # Purpose
//! Backends run at fixed native rates (48 kHz or 16 kHz) while the session
//! rate is whatever the capture device reports. This module bridges the two
//! with windowed-sinc resampling (`rubato::SincFixedIn`).
//!
//! # Design Notes
//! - Output length is always `ceil(n * to / from)`, computed in integer math.
//! - The sinc filter delay is measured once per rate pair by pushing an
//!   impulse through a scratch resampler, then dropped from the front, so
//!   output sample `k` lines up with input time `k / to`.
//! - [`StreamResampler`] is the streaming form used inside graphs; the
//!   whole-buffer helpers are built on it, so both paths produce identical
//!   samples.

use log::trace;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::buffer::AudioBuffer;
use crate::error::{PipelineError, PipelineResult};

/// Input frames per rubato call.
const RESAMPLE_CHUNK: usize = 512;
/// Upper bound on flush iterations (each yields at least one chunk).
const MAX_FLUSH_ROUNDS: usize = 64;
/// Input position of the impulse used to measure the filter delay.
const IMPULSE_OFFSET: usize = RESAMPLE_CHUNK / 2;
/// Input chunks pushed while measuring the delay.
const IMPULSE_CHUNKS: usize = 4;

/// Exact output length of a conversion: `ceil(n * to / from)`.
pub fn resampled_len(n: usize, from: u32, to: u32) -> usize {
    if from == to {
        return n;
    }
    let from = from.max(1) as u64;
    ((n as u64 * to as u64 + from - 1) / from) as usize
}

fn sinc_resampler(from: u32, to: u32) -> PipelineResult<SincFixedIn<f32>> {
    let ratio = to as f64 / from as f64;
    SincFixedIn::<f32>::new(ratio, 1.1, sinc_params(), RESAMPLE_CHUNK, 1)
        .map_err(|e| PipelineError::Resample(e.to_string()))
}

/// Output samples between where an input sample should land and where the
/// filter actually puts it.
///
/// The reported `output_delay` does not account for the history the
/// interpolator is primed with, so the real offset is found by resampling an
/// impulse and locating the peak. A filter that runs early reports 0.
fn measure_delay(from: u32, to: u32) -> PipelineResult<usize> {
    let mut r = sinc_resampler(from, to)?;
    let mut output = Vec::new();
    for chunk in 0..IMPULSE_CHUNKS {
        let mut input = vec![0.0f32; r.input_frames_next()];
        if chunk == 0 {
            input[IMPULSE_OFFSET] = 1.0;
        }
        let waves = vec![input];
        let out = r
            .process(&waves, None)
            .map_err(|e| PipelineError::Resample(e.to_string()))?;
        if let Some(ch) = out.into_iter().next() {
            output.extend(ch);
        }
    }

    let peak = output
        .iter()
        .enumerate()
        .fold((0usize, 0.0f32), |best, (i, v)| {
            if v.abs() > best.1 {
                (i, v.abs())
            } else {
                best
            }
        })
        .0;
    let ideal = IMPULSE_OFFSET as f64 * to as f64 / from as f64;
    Ok((peak as f64 - ideal).round().max(0.0) as usize)
}

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Streaming mono resampler with delay compensation and exact-length flush.
pub struct StreamResampler {
    from: u32,
    to: u32,
    /// `None` when the rates match.
    inner: Option<SincFixedIn<f32>>,
    pending_in: Vec<f32>,
    /// Output not yet handed out (delay already removed).
    ready: Vec<f32>,
    delay_left: usize,
    total_in: usize,
    emitted: usize,
}

impl StreamResampler {
    pub fn new(from: u32, to: u32) -> PipelineResult<Self> {
        if from == 0 || to == 0 {
            return Err(PipelineError::Resample(format!(
                "invalid rates {} -> {}",
                from, to
            )));
        }
        let (inner, delay) = if from == to {
            (None, 0)
        } else {
            (Some(sinc_resampler(from, to)?), measure_delay(from, to)?)
        };
        trace!("resampler {} -> {} Hz, delay {} samples", from, to, delay);
        Ok(Self {
            from,
            to,
            inner,
            pending_in: Vec::with_capacity(RESAMPLE_CHUNK * 2),
            ready: Vec::new(),
            delay_left: delay,
            total_in: 0,
            emitted: 0,
        })
    }

    /// Feed input samples, returning whatever output is complete.
    pub fn push(&mut self, input: &[f32]) -> PipelineResult<Vec<f32>> {
        self.total_in += input.len();
        if self.inner.is_none() {
            self.emitted += input.len();
            return Ok(input.to_vec());
        }

        self.pending_in.extend_from_slice(input);
        while let Some(r) = self.inner.as_mut() {
            let need = r.input_frames_next();
            if self.pending_in.len() < need {
                break;
            }
            let waves = vec![self.pending_in.drain(..need).collect::<Vec<f32>>()];
            let out = r
                .process(&waves, None)
                .map_err(|e| PipelineError::Resample(e.to_string()))?;
            self.accept(out);
        }
        Ok(self.take_ready(resampled_len(self.total_in, self.from, self.to)))
    }

    /// Drain the filter. After this call the total number of samples emitted
    /// equals `resampled_len(total input)`.
    pub fn flush(&mut self) -> PipelineResult<Vec<f32>> {
        let target = resampled_len(self.total_in, self.from, self.to);
        if self.inner.is_some() {
            if !self.pending_in.is_empty() {
                let waves = vec![std::mem::take(&mut self.pending_in)];
                if let Some(r) = self.inner.as_mut() {
                    let out = r
                        .process_partial(Some(&waves[..]), None)
                        .map_err(|e| PipelineError::Resample(e.to_string()))?;
                    self.accept(out);
                }
            }
            let mut rounds = 0;
            while self.emitted + self.ready.len() < target && rounds < MAX_FLUSH_ROUNDS {
                if let Some(r) = self.inner.as_mut() {
                    let out = r
                        .process_partial(None::<&[Vec<f32>]>, None)
                        .map_err(|e| PipelineError::Resample(e.to_string()))?;
                    self.accept(out);
                }
                rounds += 1;
            }
        }

        let mut out = self.take_ready(target);
        let missing = target.saturating_sub(self.emitted);
        if missing > 0 {
            out.resize(out.len() + missing, 0.0);
            self.emitted += missing;
        }
        self.ready.clear();
        Ok(out)
    }

    fn accept(&mut self, out: Vec<Vec<f32>>) {
        let Some(mut samples) = out.into_iter().next() else {
            return;
        };
        if self.delay_left > 0 {
            let skip = self.delay_left.min(samples.len());
            samples.drain(..skip);
            self.delay_left -= skip;
        }
        self.ready.extend_from_slice(&samples);
    }

    fn take_ready(&mut self, limit: usize) -> Vec<f32> {
        let n = self.ready.len().min(limit.saturating_sub(self.emitted));
        self.emitted += n;
        self.ready.drain(..n).collect()
    }
}

/// Resample a whole mono signal.
pub fn resample(samples: &[f32], from: u32, to: u32) -> PipelineResult<Vec<f32>> {
    if from == to {
        return Ok(samples.to_vec());
    }
    let mut r = StreamResampler::new(from, to)?;
    let mut out = r.push(samples)?;
    out.extend(r.flush()?);
    Ok(out)
}

/// Resample every channel of `buffer` to `to` Hz.
pub fn resample_buffer(buffer: &AudioBuffer, to: u32) -> PipelineResult<AudioBuffer> {
    if buffer.sample_rate() == to {
        return Ok(buffer.clone());
    }
    let channels = buffer
        .channels()
        .iter()
        .map(|ch| resample(ch, buffer.sample_rate(), to))
        .collect::<PipelineResult<Vec<_>>>()?;
    AudioBuffer::new(to, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::analysis::compute_rms;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_resampled_len_is_ceiling() {
        assert_eq!(resampled_len(48000, 48000, 16000), 16000);
        assert_eq!(resampled_len(48001, 48000, 16000), 16001);
        assert_eq!(resampled_len(16000, 16000, 48000), 48000);
        assert_eq!(resampled_len(7, 44100, 48000), 8);
        assert_eq!(resampled_len(0, 48000, 16000), 0);
    }

    #[test]
    fn test_output_length_exact() {
        for &n in &[1usize, 100, 511, 512, 4801, 48000] {
            let x = vec![0.1f32; n];
            let down = resample(&x, 48000, 16000).unwrap();
            assert_eq!(down.len(), resampled_len(n, 48000, 16000), "down n={}", n);
            let up = resample(&x, 16000, 48000).unwrap();
            assert_eq!(up.len(), resampled_len(n, 16000, 48000), "up n={}", n);
        }
    }

    #[test]
    fn test_streaming_matches_total_length() {
        let x = sine(440.0, 48000, 10_000);
        let mut r = StreamResampler::new(48000, 16000).unwrap();
        let mut out = Vec::new();
        for chunk in x.chunks(137) {
            out.extend(r.push(chunk).unwrap());
        }
        out.extend(r.flush().unwrap());
        assert_eq!(out.len(), resampled_len(10_000, 48000, 16000));
    }

    #[test]
    fn test_round_trip_preserves_level() {
        let x = sine(1000.0, 48000, 48000);
        let down = resample(&x, 48000, 16000).unwrap();
        let up = resample(&down, 16000, 48000).unwrap();
        assert_eq!(up.len(), x.len());

        let a = compute_rms(&x[4800..43200]).linear;
        let b = compute_rms(&up[4800..43200]).linear;
        assert!((a - b).abs() / a < 0.05, "level {} vs {}", a, b);
    }

    #[test]
    fn test_delay_is_compensated() {
        // Silence, then a burst starting at 0.5 s. The burst onset must land
        // within a few samples of the same time after conversion.
        let mut x = vec![0.0f32; 24000];
        x.extend(sine(500.0, 48000, 24000).iter().map(|v| v * 2.0));
        let down = resample(&x, 48000, 16000).unwrap();
        let onset = down.iter().position(|v| v.abs() > 0.2).unwrap();
        // |sin| passes 0.2 about 64 us after the burst starts.
        let expected = 8001;
        assert!(
            (onset as i64 - expected as i64).abs() <= 6,
            "onset {} expected near {}",
            onset,
            expected
        );
    }

    fn impulse_at(len: usize, at: usize) -> Vec<f32> {
        let mut x = vec![0.0f32; len];
        x[at] = 1.0;
        x
    }

    fn peak_index(x: &[f32]) -> usize {
        let mut best = 0;
        for (i, v) in x.iter().enumerate() {
            if v.abs() > x[best].abs() {
                best = i;
            }
        }
        best
    }

    #[test]
    fn test_impulse_stays_aligned_downsampling() {
        let x = impulse_at(48000, 24000);
        let down = resample(&x, 48000, 16000).unwrap();
        let peak = peak_index(&down) as i64;
        assert!((peak - 8000).abs() <= 1, "peak at {}", peak);
    }

    #[test]
    fn test_impulse_stays_aligned_upsampling() {
        let x = impulse_at(16000, 8000);
        let up = resample(&x, 16000, 48000).unwrap();
        let peak = peak_index(&up) as i64;
        assert!((peak - 24000).abs() <= 2, "peak at {}", peak);
    }

    #[test]
    fn test_impulse_round_trip_aligned() {
        let x = impulse_at(48000, 24000);
        let down = resample(&x, 48000, 16000).unwrap();
        let up = resample(&down, 16000, 48000).unwrap();
        let peak = peak_index(&up) as i64;
        assert!((peak - 24000).abs() <= 3, "peak at {}", peak);
    }

    #[test]
    fn test_streaming_impulse_matches_whole_buffer() {
        let x = impulse_at(9000, 4321);
        let whole = resample(&x, 48000, 16000).unwrap();
        let mut r = StreamResampler::new(48000, 16000).unwrap();
        let mut streamed = Vec::new();
        for chunk in x.chunks(300) {
            streamed.extend(r.push(chunk).unwrap());
        }
        streamed.extend(r.flush().unwrap());
        assert_eq!(peak_index(&streamed), peak_index(&whole));
    }

    #[test]
    fn test_same_rate_is_identity() {
        let x = sine(300.0, 16000, 1000);
        assert_eq!(resample(&x, 16000, 16000).unwrap(), x);
        let mut r = StreamResampler::new(16000, 16000).unwrap();
        assert_eq!(r.push(&x).unwrap(), x);
        assert!(r.flush().unwrap().is_empty());
    }

    #[test]
    fn test_buffer_resample_keeps_channels() {
        let buf = AudioBuffer::new(48000, vec![vec![0.0; 960], vec![0.2; 960]]).unwrap();
        let out = resample_buffer(&buf, 16000).unwrap();
        assert_eq!(out.sample_rate(), 16000);
        assert_eq!(out.channel_count(), 2);
        assert_eq!(out.frame_count(), 320);
    }
}
