//! Dual-signal-transform backend (DTLN-style two-stage suppressor).
//!
//! # Purpose
//! Runs at a fixed 16 kHz with 512-sample frames, so it is always reached
//! through the resampling adapter when the session rate is 48 kHz.
//!
//! # Design Notes
//! - Stage 1: STFT magnitude mask (512-point sqrt-Hann, 128-sample hop)
//!   against a per-bin noise power estimate seeded from the first hops.
//! - Stage 2: time-domain envelope expander on the stage-1 output, one
//!   decision per hop.
//! - One engine frame is four hops. Output lags input by the STFT latency
//!   only; stage 2 is causal with no look-ahead.

use rustfft::num_complex::Complex;

use crate::backend::{DenoiseEngine, FrameError};
use crate::dsp::noise_estimate::NoiseTracker;
use crate::dsp::stft::StftProcessor;
use crate::dsp::utils::{frame_rms, smoothstep, MAG_FLOOR};

pub const DTLN_RATE: u32 = 16_000;
pub const DTLN_FRAME: usize = 512;
const DTLN_WINDOW: usize = 512;
const DTLN_HOP: usize = 128;

// Stage 1
// About 0.16 s of hops.
const MASK_WARMUP_HOPS: u32 = 20;
const MASK_FLOOR: f32 = 0.06;
// Mask reaches 1 at this posterior SNR (power ratio).
const MASK_KNEE: f32 = 6.0;

// Stage 2
const ENV_ATTACK: f32 = 0.5;
const ENV_RELEASE: f32 = 0.9;
const ENV_FLOOR_RISE: f32 = 1.001;
const ENV_FLOOR_INIT: f32 = 1e-3;
const EXPANDER_RANGE_LO: f32 = 1.5;
const EXPANDER_RANGE_HI: f32 = 4.0;
const EXPANDER_MIN_GAIN: f32 = 0.3;

struct MaskStage {
    noise: NoiseTracker,
}

impl MaskStage {
    fn new(bins: usize) -> Self {
        Self {
            noise: NoiseTracker::new(bins, MASK_WARMUP_HOPS),
        }
    }

    fn shape(&mut self, spec: &mut [Complex<f32>]) {
        self.noise.update(spec.iter().map(|s| s.norm_sqr()), 0.0);
        for (k, s) in spec.iter_mut().enumerate() {
            let snr = s.norm_sqr() / self.noise.power(k);
            let mask = smoothstep(1.0, MASK_KNEE, snr).max(MASK_FLOOR);
            *s *= mask;
        }
    }

    fn reset(&mut self) {
        self.noise.reset();
    }
}

struct EnvelopeStage {
    env: f32,
    floor: f32,
    gain: f32,
}

impl EnvelopeStage {
    fn new() -> Self {
        Self {
            env: 0.0,
            floor: ENV_FLOOR_INIT,
            gain: 1.0,
        }
    }

    fn process(&mut self, block: &mut [f32]) {
        let level = frame_rms(block);
        let a = if level > self.env { ENV_ATTACK } else { ENV_RELEASE };
        self.env = a * self.env + (1.0 - a) * level;

        // Floor follows the envelope down immediately and drifts up slowly.
        self.floor = if self.env < self.floor {
            self.env.max(MAG_FLOOR)
        } else {
            self.floor * ENV_FLOOR_RISE
        };

        let ratio = self.env / self.floor.max(MAG_FLOOR);
        let target = EXPANDER_MIN_GAIN
            + (1.0 - EXPANDER_MIN_GAIN) * smoothstep(EXPANDER_RANGE_LO, EXPANDER_RANGE_HI, ratio);

        // Linear ramp from the previous block's gain avoids zipper noise.
        let step = (target - self.gain) / block.len().max(1) as f32;
        for s in block.iter_mut() {
            self.gain += step;
            *s *= self.gain;
        }
        self.gain = target;
    }
}

pub struct DtlnEngine {
    stft: StftProcessor,
    mask: MaskStage,
    envelope: EnvelopeStage,
    closed: bool,
}

impl DtlnEngine {
    pub fn new() -> Self {
        let stft = StftProcessor::new(DTLN_WINDOW, DTLN_HOP);
        Self {
            mask: MaskStage::new(stft.bins()),
            stft,
            envelope: EnvelopeStage::new(),
            closed: false,
        }
    }
}

impl Default for DtlnEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DenoiseEngine for DtlnEngine {
    fn name(&self) -> &str {
        "dtln"
    }

    fn native_rate(&self) -> u32 {
        DTLN_RATE
    }

    fn frame_len(&self) -> usize {
        DTLN_FRAME
    }

    fn latency(&self) -> usize {
        self.stft.latency()
    }

    fn process_frame(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), FrameError> {
        if self.closed {
            return Err(FrameError("dtln engine is closed".into()));
        }
        if input.len() != DTLN_FRAME || output.len() != DTLN_FRAME {
            return Err(FrameError(format!(
                "expected {} samples, got {}",
                DTLN_FRAME,
                input.len()
            )));
        }
        let mask = &mut self.mask;
        for (i, o) in input.chunks(DTLN_HOP).zip(output.chunks_mut(DTLN_HOP)) {
            self.stft.process_hop(i, o, |spec| mask.shape(spec));
            self.envelope.process(o);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.stft.reset();
        self.mask.reset();
        self.envelope = EnvelopeStage::new();
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

    #[test]
    fn test_contract() {
        let eng = DtlnEngine::new();
        assert_eq!(eng.native_rate(), 16000);
        assert_eq!(eng.frame_len(), 512);
        assert_eq!(eng.latency(), 384);
    }

    #[test]
    fn test_noise_is_attenuated() {
        // Whole frames only; the engine never sees a partial frame.
        let mut s = 0x2545_f491u32;
        let x: Vec<f32> = (0..DTLN_FRAME * 62)
            .map(|_| {
                s ^= s << 13;
                s ^= s >> 17;
                s ^= s << 5;
                (s as f32 / u32::MAX as f32 * 2.0 - 1.0) * 0.05
            })
            .collect();
        let mut eng = DtlnEngine::new();
        let mut y = vec![0.0; x.len()];
        for (i, o) in x.chunks(512).zip(y.chunks_mut(512)) {
            eng.process_frame(i, o).unwrap();
        }
        let before = compute_rms(&x[16384..]).linear;
        let after = compute_rms(&y[16384..]).linear;
        assert!(after < before * 0.6, "before {} after {}", before, after);
    }
}
