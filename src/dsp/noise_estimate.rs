//! Per-bin noise power estimate shared by the spectral engines.
//!
//! The estimate is the plain mean of the first `warmup` frames. After that a
//! bin only adapts when its power looks like noise (`p < SPEECH_RATIO * n`),
//! so speech cannot drag the floor up. Bins held by speech creep upward
//! slowly so a low seed cannot pin them forever.

use crate::dsp::utils::{lerp, MAG_FLOOR};

// p above this multiple of the estimate freezes the bin.
const SPEECH_RATIO: f32 = 4.0;
const NOISE_ALPHA: f32 = 0.9;
// Adaptation rate when the caller is confident speech is present.
const NOISE_ALPHA_SLOW: f32 = 0.99;
const NOISE_CREEP: f32 = 1.002;

pub struct NoiseTracker {
    noise: Vec<f32>,
    warmup: u32,
    frames: u32,
}

impl NoiseTracker {
    pub fn new(bins: usize, warmup: u32) -> Self {
        Self {
            noise: vec![0.0; bins],
            warmup: warmup.max(1),
            frames: 0,
        }
    }

    /// Fold one frame of bin powers into the estimate.
    ///
    /// `protect` in `0..=1` slows adaptation, for callers that have their own
    /// speech presence estimate.
    pub fn update<I>(&mut self, powers: I, protect: f32)
    where
        I: IntoIterator<Item = f32>,
    {
        let alpha = lerp(NOISE_ALPHA, NOISE_ALPHA_SLOW, protect.clamp(0.0, 1.0));
        if self.frames < self.warmup {
            let weight = 1.0 / (self.frames + 1) as f32;
            for (n, p) in self.noise.iter_mut().zip(powers) {
                *n += (p - *n) * weight;
            }
        } else {
            for (n, p) in self.noise.iter_mut().zip(powers) {
                if p < SPEECH_RATIO * *n {
                    *n = alpha * *n + (1.0 - alpha) * p;
                } else {
                    *n *= NOISE_CREEP;
                }
            }
        }
        self.frames = self.frames.saturating_add(1);
    }

    /// Noise power of bin `k`, never below `MAG_FLOOR`.
    pub fn power(&self, k: usize) -> f32 {
        self.noise.get(k).copied().unwrap_or(0.0).max(MAG_FLOOR)
    }

    pub fn is_warm(&self) -> bool {
        self.frames >= self.warmup
    }

    pub fn reset(&mut self) {
        self.noise.fill(0.0);
        self.frames = 0;
    }
}
