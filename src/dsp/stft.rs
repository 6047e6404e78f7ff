//! Hop-driven STFT analysis/resynthesis shared by the spectral engines.
//!
//! The frame slides by one hop per call: the newest hop is appended, the
//! windowed frame is transformed, a caller-supplied closure shapes the
//! half-spectrum, and the inverse is overlap-added. Output lags input by
//! `window_len - hop`.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::dsp::utils::{make_sqrt_hann_window, ola_gain};

pub struct StftProcessor {
    fft_forward: Arc<dyn Fft<f32>>,
    fft_backward: Arc<dyn Fft<f32>>,
    window_len: usize,
    hop: usize,
    window: Vec<f32>,
    frame: Vec<f32>,
    spec: Vec<Complex<f32>>,
    ola: Vec<f32>,
    /// 1 / (N * sum of w² across overlapping frames).
    out_scale: f32,
}

impl StftProcessor {
    pub fn new(window_len: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(window_len);
        let fft_backward = planner.plan_fft_inverse(window_len);
        let window = make_sqrt_hann_window(window_len);
        let out_scale = 1.0 / (window_len as f32 * ola_gain(&window, hop));

        Self {
            fft_forward,
            fft_backward,
            window_len,
            hop,
            window,
            frame: vec![0.0; window_len],
            spec: vec![Complex::new(0.0, 0.0); window_len],
            ola: vec![0.0; window_len],
            out_scale,
        }
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Bins in the half-spectrum handed to the shaping closure.
    pub fn bins(&self) -> usize {
        self.window_len / 2 + 1
    }

    pub fn latency(&self) -> usize {
        self.window_len - self.hop
    }

    /// Consume one hop of `input` and write one hop of `output`.
    pub fn process_hop<F>(&mut self, input: &[f32], output: &mut [f32], mut shape: F)
    where
        F: FnMut(&mut [Complex<f32>]),
    {
        let n = self.window_len;
        let hop = self.hop;
        debug_assert_eq!(input.len(), hop);
        debug_assert_eq!(output.len(), hop);

        self.frame.copy_within(hop..n, 0);
        self.frame[n - hop..].copy_from_slice(input);

        for i in 0..n {
            self.spec[i] = Complex::new(self.frame[i] * self.window[i], 0.0);
        }
        self.fft_forward.process(&mut self.spec);

        let nyq = n / 2;
        shape(&mut self.spec[..=nyq]);

        // Restore conjugate symmetry
        self.spec[0].im = 0.0;
        self.spec[nyq].im = 0.0;
        for k in 1..nyq {
            self.spec[n - k] = self.spec[k].conj();
        }
        self.fft_backward.process(&mut self.spec);

        for i in 0..n {
            self.ola[i] += self.spec[i].re * self.window[i] * self.out_scale;
        }
        output.copy_from_slice(&self.ola[..hop]);
        self.ola.copy_within(hop..n, 0);
        self.ola[n - hop..].fill(0.0);
    }

    pub fn reset(&mut self) {
        self.frame.fill(0.0);
        self.ola.fill(0.0);
        self.spec.fill(Complex::new(0.0, 0.0));
    }
}
