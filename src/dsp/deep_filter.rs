//! Deep-filtering backend with an attenuation limit.
//!
//! # Purpose
//! Stands behind the deep-filtering slot of the backend contract: a spectral
//! gain stage whose strongest suppression is bounded by a user-selected
//! attenuation limit in dB.
//!
//! # Design Notes
//! - 48 kHz, 480-sample frames, 960-point sqrt-Hann STFT. `frame_len` is
//!   fixed at creation and reported through the engine contract.
//! - Noise power comes from the shared [`NoiseTracker`]: seeded from the
//!   first frames, then updated only from noise-like bins.
//! - Gains come from the decision-directed a-priori SNR and are floored at
//!   `10^(-atten/20)`. An attenuation of 0 dB leaves the signal untouched.

use log::debug;
use rustfft::num_complex::Complex;

use crate::backend::{DenoiseEngine, FrameError};
use crate::dsp::noise_estimate::NoiseTracker;
use crate::dsp::stft::StftProcessor;
use crate::dsp::utils::db_to_gain;

pub const DEEP_FILTER_RATE: u32 = 48_000;
pub const DEEP_FILTER_FRAME: usize = 480;
const DEEP_FILTER_WINDOW: usize = 960;

pub const MIN_ATTENUATION_DB: f32 = 0.0;
pub const MAX_ATTENUATION_DB: f32 = 100.0;

// Frames averaged into the initial noise estimate.
const WARMUP_FRAMES: u32 = 20;
const DD_ALPHA: f32 = 0.98;

struct GainState {
    floor: f32,
    noise: NoiseTracker,
    prev_clean: Vec<f32>,
}

impl GainState {
    fn new(bins: usize, floor: f32) -> Self {
        Self {
            floor,
            noise: NoiseTracker::new(bins, WARMUP_FRAMES),
            prev_clean: vec![0.0; bins],
        }
    }

    fn shape(&mut self, spec: &mut [Complex<f32>]) {
        self.noise.update(spec.iter().map(|s| s.norm_sqr()), 0.0);
        if self.floor >= 1.0 {
            return;
        }
        for (k, s) in spec.iter_mut().enumerate() {
            let p = s.norm_sqr();
            let noise = self.noise.power(k);
            let post = p / noise;
            let xi = DD_ALPHA * self.prev_clean[k] / noise + (1.0 - DD_ALPHA) * (post - 1.0).max(0.0);
            let g = (xi / (1.0 + xi)).max(self.floor);
            *s *= g;
            self.prev_clean[k] = g * g * p;
        }
    }

    fn reset(&mut self) {
        self.noise.reset();
        self.prev_clean.fill(0.0);
    }
}

pub struct DeepFilterEngine {
    stft: StftProcessor,
    gains: GainState,
    attenuation_db: f32,
    closed: bool,
}

impl DeepFilterEngine {
    /// `attenuation_db` is clamped to `0..=100`.
    pub fn new(attenuation_db: f32) -> Self {
        let attenuation_db = if attenuation_db.is_finite() {
            attenuation_db.clamp(MIN_ATTENUATION_DB, MAX_ATTENUATION_DB)
        } else {
            MIN_ATTENUATION_DB
        };
        let stft = StftProcessor::new(DEEP_FILTER_WINDOW, DEEP_FILTER_FRAME);
        let floor = db_to_gain(-attenuation_db);
        debug!("deep filter: attenuation limit {} dB (floor {:.4})", attenuation_db, floor);
        Self {
            gains: GainState::new(stft.bins(), floor),
            stft,
            attenuation_db,
            closed: false,
        }
    }

    pub fn attenuation_db(&self) -> f32 {
        self.attenuation_db
    }
}

impl DenoiseEngine for DeepFilterEngine {
    fn name(&self) -> &str {
        "deep-filter"
    }

    fn native_rate(&self) -> u32 {
        DEEP_FILTER_RATE
    }

    fn frame_len(&self) -> usize {
        DEEP_FILTER_FRAME
    }

    fn latency(&self) -> usize {
        self.stft.latency()
    }

    fn process_frame(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), FrameError> {
        if self.closed {
            return Err(FrameError("deep filter engine is closed".into()));
        }
        if input.len() != DEEP_FILTER_FRAME || output.len() != DEEP_FILTER_FRAME {
            return Err(FrameError(format!(
                "expected {} samples, got {}",
                DEEP_FILTER_FRAME,
                input.len()
            )));
        }
        let gains = &mut self.gains;
        self.stft.process_hop(input, output, |spec| gains.shape(spec));
        Ok(())
    }

    fn reset(&mut self) {
        self.stft.reset();
        self.gains.reset();
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::analysis::compute_rms;

    fn run(engine: &mut DeepFilterEngine, x: &[f32]) -> Vec<f32> {
        let mut y = vec![0.0; x.len()];
        for (i, o) in x.chunks(480).zip(y.chunks_mut(480)) {
            engine.process_frame(i, o).unwrap();
        }
        y
    }

    fn noise(len: usize, amp: f32) -> Vec<f32> {
        let mut s = 0x9e37_79b9u32;
        (0..len)
            .map(|_| {
                s ^= s << 13;
                s ^= s >> 17;
                s ^= s << 5;
                (s as f32 / u32::MAX as f32 * 2.0 - 1.0) * amp
            })
            .collect()
    }

    #[test]
    fn test_attenuation_is_clamped() {
        assert_eq!(DeepFilterEngine::new(250.0).attenuation_db(), 100.0);
        assert_eq!(DeepFilterEngine::new(-5.0).attenuation_db(), 0.0);
        assert_eq!(DeepFilterEngine::new(f32::NAN).attenuation_db(), 0.0);
    }

    #[test]
    fn test_zero_attenuation_is_transparent() {
        let mut eng = DeepFilterEngine::new(0.0);
        let x = noise(9600, 0.1);
        let y = run(&mut eng, &x);
        let lat = eng.latency();
        for k in 960..(x.len() - lat) {
            assert!((y[k + lat] - x[k]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_noise_reduced_down_to_limit() {
        let mut eng = DeepFilterEngine::new(20.0);
        let x = noise(96000, 0.05);
        let y = run(&mut eng, &x);
        let before = compute_rms(&x[48000..]).linear;
        let after = compute_rms(&y[48000..]).linear;
        assert!(after < before * 0.5, "before {} after {}", before, after);
        // The floor bounds suppression at 20 dB.
        assert!(after > before * 0.08, "after {} below floor", after);
    }
}
