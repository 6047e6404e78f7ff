//! Radix-2 Cooley-Tukey FFT used by the offline spectrogram.
//!
//! # Purpose
//! The analysis path needs a small, deterministic FFT whose lookup tables are
//! owned by the caller. Backend engines use `rustfft` instead; this one exists
//! so the harness's spectrogram has no hidden global state.
//!
//! # Design Notes
//! - Tables (twiddles, bit-reversal permutation, Hann window) are built once
//!   per size and stored in an explicit [`FftCache`].
//! - `clear()` drops every table, so tests can reset the cache between runs.
//! - Sizes must be powers of two. This is a caller precondition, checked only
//!   by a debug assertion.

use std::collections::HashMap;
use std::f32::consts::PI;

/// Precomputed tables for one FFT size.
#[derive(Debug, Clone)]
pub struct FftTables {
    pub size: usize,
    /// `cos` / `sin` of `-2πk/N` for `k < N/2`.
    twiddle_re: Vec<f32>,
    twiddle_im: Vec<f32>,
    bitrev: Vec<usize>,
    /// Periodic Hann window of length `size`.
    pub window: Vec<f32>,
}

impl FftTables {
    fn build(size: usize) -> Self {
        debug_assert!(size.is_power_of_two(), "fft size must be a power of two");
        let half = size / 2;
        let mut twiddle_re = Vec::with_capacity(half);
        let mut twiddle_im = Vec::with_capacity(half);
        for k in 0..half {
            let phase = -2.0 * PI * k as f32 / size as f32;
            twiddle_re.push(phase.cos());
            twiddle_im.push(phase.sin());
        }

        let bits = size.trailing_zeros();
        let bitrev = (0..size)
            .map(|i| {
                if bits == 0 {
                    0
                } else {
                    i.reverse_bits() >> (usize::BITS - bits)
                }
            })
            .collect();

        let window = (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
            .collect();

        Self {
            size,
            twiddle_re,
            twiddle_im,
            bitrev,
            window,
        }
    }

    /// In-place forward transform. `re` and `im` must both be `size` long.
    pub fn forward(&self, re: &mut [f32], im: &mut [f32]) {
        let n = self.size;
        debug_assert_eq!(re.len(), n);
        debug_assert_eq!(im.len(), n);

        for i in 0..n {
            let j = self.bitrev[i];
            if j > i {
                re.swap(i, j);
                im.swap(i, j);
            }
        }

        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let stride = n / len;
            for start in (0..n).step_by(len) {
                for k in 0..half {
                    let wr = self.twiddle_re[k * stride];
                    let wi = self.twiddle_im[k * stride];
                    let a = start + k;
                    let b = a + half;
                    let tr = re[b] * wr - im[b] * wi;
                    let ti = re[b] * wi + im[b] * wr;
                    re[b] = re[a] - tr;
                    im[b] = im[a] - ti;
                    re[a] += tr;
                    im[a] += ti;
                }
            }
            len <<= 1;
        }
    }
}

/// Explicitly owned cache of FFT tables keyed by size.
#[derive(Debug, Default)]
pub struct FftCache {
    tables: HashMap<usize, FftTables>,
}

impl FftCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables for `size`, building them on first use.
    pub fn tables(&mut self, size: usize) -> &FftTables {
        self.tables
            .entry(size)
            .or_insert_with(|| FftTables::build(size))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
