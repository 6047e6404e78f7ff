//! Spectral/statistical suppressor (decision-directed Wiener filter).
//!
//! # Perceptual Contract
//! - **Target Source**: Spoken voice over stationary background noise.
//! - **Intended Effect**: Reduce hiss, hum and fan noise while keeping timbre.
//! - **Failure Modes**:
//!   - "Musical noise" if the gain curve is too jagged (guarded by 3-tap smoothing).
//!   - Voice thinning if the noise floor tracks speech (guarded by speech-conditioned ballistics).
//! - **Will Not Do**: Remove non-stationary noise (barks, clicks, sirens).
//!
//! # Noise Reduction Model
//! 1. **Statistics**: 960-point sqrt-Hann STFT at 48 kHz, 480-sample hop.
//! 2. **Speech presence**: spectral flatness, high-band ratio and an energy gate.
//! 3. **Noise floor**: per-bin noise power, seeded from the first frames and then
//!    updated only from noise-like bins; adaptation slows while speech is likely.
//! 4. **Wiener gain**: a-priori SNR from the decision-directed recursion, `G = xi / (1 + xi)`.
//! 5. **Floor**: gains never fall below a speech-conditioned floor.

use rustfft::num_complex::Complex;

use crate::backend::{DenoiseEngine, FrameError};
use crate::dsp::noise_estimate::NoiseTracker;
use crate::dsp::stft::StftProcessor;
use crate::dsp::utils::{frame_rms, lerp, smoothstep, MAG_FLOOR};

pub const SPECTRAL_RATE: u32 = 48_000;
pub const SPECTRAL_FRAME: usize = 480;
const SPECTRAL_WINDOW: usize = 960;

// 0.2 s of noise seeds the estimate.
const NOISE_WARMUP_FRAMES: u32 = 20;

// Decision-directed smoothing of the a-priori SNR.
const DD_ALPHA: f32 = 0.98;
const SNR_EPS: f32 = 1e-12;

const FLATNESS_MIN: f32 = 0.25;
const FLATNESS_MAX: f32 = 0.85;
const HF_SPLIT_FRAC: f32 = 0.25;
const HF_RATIO_MIN: f32 = 0.18;
const HF_RATIO_MAX: f32 = 0.45;
const ENERGY_GATE_MIN: f32 = 0.003;
const ENERGY_GATE_MAX: f32 = 0.02;
const SPEECH_WEIGHT_TONAL: f32 = 0.65;
const SPEECH_WEIGHT_UNVOICED: f32 = 0.35;

const GAIN_FLOOR_NOISE: f32 = 0.08;
const GAIN_FLOOR_SPEECH: f32 = 0.35;
const SMOOTH_STRENGTH: f32 = 0.6;

pub struct SpectralEngine {
    stft: StftProcessor,
    wiener: WienerState,
    closed: bool,
}

/// Per-bin state of the gain computation.
struct WienerState {
    noise: NoiseTracker,
    /// Previous frame's power per bin.
    prev_power: Vec<f32>,
    prev_gain: Vec<f32>,
    mag: Vec<f32>,
    gains: Vec<f32>,
}

impl SpectralEngine {
    pub fn new() -> Self {
        let stft = StftProcessor::new(SPECTRAL_WINDOW, SPECTRAL_FRAME);
        let wiener = WienerState::new(stft.bins());
        Self {
            stft,
            wiener,
            closed: false,
        }
    }
}

impl WienerState {
    fn new(bins: usize) -> Self {
        Self {
            noise: NoiseTracker::new(bins, NOISE_WARMUP_FRAMES),
            prev_power: vec![0.0; bins],
            prev_gain: vec![1.0; bins],
            mag: vec![0.0; bins],
            gains: vec![1.0; bins],
        }
    }

    fn reset(&mut self) {
        self.noise.reset();
        self.prev_power.fill(0.0);
        self.prev_gain.fill(1.0);
        self.gains.fill(1.0);
    }

    /// Crude per-frame speech probability from spectral shape and level.
    fn speech_probability(mag: &[f32], frame: &[f32]) -> f32 {
        let nyq = mag.len() - 1;
        let mut geo = 0.0f32;
        let mut arith = 0.0f32;
        let hf_start = (nyq as f32 * HF_SPLIT_FRAC) as usize;
        let (mut hf, mut lf) = (0.0f32, 0.0f32);
        for (i, &m) in mag.iter().enumerate().take(nyq).skip(1) {
            let m = m.max(MAG_FLOOR);
            geo += m.ln();
            arith += m;
            if i >= hf_start {
                hf += m;
            } else {
                lf += m;
            }
        }
        let count = (nyq - 1).max(1) as f32;
        let flatness = ((geo / count).exp() / (arith / count + MAG_FLOOR)).clamp(0.0, 1.0);
        let hf_ratio = (hf / (hf + lf + MAG_FLOOR)).clamp(0.0, 1.0);

        let tonal = 1.0 - smoothstep(FLATNESS_MIN, FLATNESS_MAX, flatness);
        let unvoiced = smoothstep(HF_RATIO_MIN, HF_RATIO_MAX, hf_ratio) * (1.0 - tonal);
        let p = (SPEECH_WEIGHT_TONAL * tonal + SPEECH_WEIGHT_UNVOICED * unvoiced).clamp(0.0, 1.0);
        p * smoothstep(ENERGY_GATE_MIN, ENERGY_GATE_MAX, frame_rms(frame))
    }

    fn shape(&mut self, spec: &mut [Complex<f32>], input: &[f32]) {
        let nyq = spec.len() - 1;
        for (m, s) in self.mag.iter_mut().zip(spec.iter()) {
            *m = s.norm().max(MAG_FLOOR);
        }
        let spp = Self::speech_probability(&self.mag, input);

        // Speech only slows adaptation once the seed is in.
        let protect = if self.noise.is_warm() { spp } else { 0.0 };
        self.noise.update(self.mag.iter().map(|m| m * m), protect);

        let floor = lerp(GAIN_FLOOR_NOISE, GAIN_FLOOR_SPEECH, spp);
        for i in 0..=nyq {
            let power = self.mag[i] * self.mag[i];
            let noise = self.noise.power(i);

            let gamma = power / (noise + SNR_EPS);
            let pg = self.prev_gain[i];
            let xi_hist = pg * pg * self.prev_power[i] / (noise + SNR_EPS);
            let xi = DD_ALPHA * xi_hist + (1.0 - DD_ALPHA) * (gamma - 1.0).max(0.0);
            self.gains[i] = (xi / (1.0 + xi)).max(floor);
            self.prev_power[i] = power;
        }

        // Musical-noise guard
        let mut prev = self.gains[0];
        for i in 1..nyq {
            let curr = self.gains[i];
            let avg = (prev + curr + self.gains[i + 1]) / 3.0;
            prev = curr;
            self.gains[i] = lerp(curr, avg, SMOOTH_STRENGTH);
        }

        for (s, (&g, pg)) in spec
            .iter_mut()
            .zip(self.gains.iter().zip(self.prev_gain.iter_mut()))
        {
            *s *= g;
            *pg = g;
        }
    }
}

impl Default for SpectralEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DenoiseEngine for SpectralEngine {
    fn name(&self) -> &str {
        "spectral"
    }

    fn native_rate(&self) -> u32 {
        SPECTRAL_RATE
    }

    fn frame_len(&self) -> usize {
        SPECTRAL_FRAME
    }

    fn latency(&self) -> usize {
        self.stft.latency()
    }

    fn process_frame(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), FrameError> {
        if self.closed {
            return Err(FrameError("spectral engine is closed".into()));
        }
        if input.len() != SPECTRAL_FRAME || output.len() != SPECTRAL_FRAME {
            return Err(FrameError(format!(
                "expected {} samples, got {}",
                SPECTRAL_FRAME,
                input.len()
            )));
        }
        let wiener = &mut self.wiener;
        self.stft
            .process_hop(input, output, |spec| wiener.shape(spec, input));
        Ok(())
    }

    fn reset(&mut self) {
        self.stft.reset();
        self.wiener.reset();
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
