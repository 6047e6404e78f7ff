//! Offline measurement primitives used by the harness.
//!
//! Nothing in this module runs on the render path. All functions take plain
//! sample slices; [`Metrics::compute`] and [`WaveformOverview::compute`]
//! operate on the mono mix of an [`AudioBuffer`].

use ebur128::{EbuR128, Mode};
use log::debug;

use crate::buffer::AudioBuffer;
use crate::dsp::fft::FftCache;

/// Ceiling returned by [`estimate_snr`] when the noise floor is digital silence.
pub const SNR_CEILING_DB: f32 = 60.0;
/// Below this many samples SNR statistics are meaningless.
pub const SNR_MIN_SAMPLES: usize = 20;
/// Fraction of sorted |x| treated as the noise population.
const SNR_NOISE_FRACTION: f32 = 0.10;
/// Fraction of sorted |x| treated as the signal population.
const SNR_SIGNAL_FRACTION: f32 = 0.50;

pub const DEFAULT_FFT_SIZE: usize = 1024;
pub const DEFAULT_HOP_SIZE: usize = 256;
const SPECTRO_MIN_DB: f32 = -100.0;
const SPECTRO_MAX_DB: f32 = 0.0;

// =============================================================================
// Level statistics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rms {
    pub linear: f32,
    pub db: f32,
}

pub fn compute_rms(samples: &[f32]) -> Rms {
    if samples.is_empty() {
        return Rms {
            linear: 0.0,
            db: f32::NEG_INFINITY,
        };
    }
    let sum: f64 = samples.iter().map(|&x| (x as f64) * (x as f64)).sum();
    let linear = (sum / samples.len() as f64).sqrt() as f32;
    let db = if linear > 0.0 {
        20.0 * linear.log10()
    } else {
        f32::NEG_INFINITY
    };
    Rms { linear, db }
}

pub fn compute_peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, &x| m.max(x.abs()))
}

/// Peak-to-RMS ratio in dB. Returns 0 rather than NaN/inf when either side is
/// non-positive.
pub fn compute_crest_factor(peak: f32, rms_linear: f32) -> f32 {
    if peak <= 0.0 || rms_linear <= 0.0 {
        return 0.0;
    }
    20.0 * (peak / rms_linear).log10()
}

/// Reference-free SNR estimate from amplitude statistics.
///
/// The quietest 10 % of samples (by magnitude) stand in for the noise floor
/// and the loudest 50 % for the signal.
pub fn estimate_snr(samples: &[f32]) -> f32 {
    let n = samples.len();
    if n < SNR_MIN_SAMPLES {
        return 0.0;
    }
    let mut mags: Vec<f32> = samples.iter().map(|x| x.abs()).collect();
    mags.sort_by(|a, b| a.total_cmp(b));

    let noise_count = ((n as f32 * SNR_NOISE_FRACTION) as usize).max(1);
    let signal_count = ((n as f32 * SNR_SIGNAL_FRACTION) as usize).max(1);

    let noise_rms = compute_rms(&mags[..noise_count]).linear;
    let signal_rms = compute_rms(&mags[n - signal_count..]).linear;

    if noise_rms <= 0.0 {
        return SNR_CEILING_DB;
    }
    if signal_rms <= 0.0 {
        return 0.0;
    }
    20.0 * (signal_rms / noise_rms).log10()
}

// =============================================================================
// Spectrogram
// =============================================================================

/// Magnitude spectrogram in dB, `frames[t][k]` for time slice `t`, bin `k`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrogram {
    pub frames: Vec<Vec<f32>>,
    pub freq_bin_count: usize,
    pub sample_rate: u32,
    pub fft_size: usize,
    pub hop_size: usize,
}

impl Spectrogram {
    pub fn time_slices(&self) -> usize {
        self.frames.len()
    }

    /// Centre frequency of bin `k` in Hz.
    pub fn bin_frequency(&self, k: usize) -> f32 {
        k as f32 * self.sample_rate as f32 / self.fft_size.max(1) as f32
    }
}

/// Short-time spectrogram of `samples`. `fft_size` must be a power of two.
pub fn compute_spectrogram(
    samples: &[f32],
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
    cache: &mut FftCache,
) -> Spectrogram {
    debug_assert!(fft_size.is_power_of_two());
    let hop_size = hop_size.max(1);
    let bins = fft_size / 2;
    let slices = if samples.len() < fft_size {
        0
    } else {
        (samples.len() - fft_size) / hop_size + 1
    };

    let tables = cache.tables(fft_size);
    // A Hann window halves the coherent gain; 2/N * 2 puts a full-scale sine at 0 dB.
    let scale = 4.0 / fft_size as f32;
    let mut re = vec![0.0f32; fft_size];
    let mut im = vec![0.0f32; fft_size];
    let mut frames = Vec::with_capacity(slices);

    for t in 0..slices {
        let start = t * hop_size;
        for i in 0..fft_size {
            re[i] = samples[start + i] * tables.window[i];
            im[i] = 0.0;
        }
        tables.forward(&mut re, &mut im);

        let row = (0..bins)
            .map(|k| {
                let mag = (re[k] * re[k] + im[k] * im[k]).sqrt() * scale;
                (20.0 * (mag + 1e-10).log10()).clamp(SPECTRO_MIN_DB, SPECTRO_MAX_DB)
            })
            .collect();
        frames.push(row);
    }

    Spectrogram {
        frames,
        freq_bin_count: bins,
        sample_rate,
        fft_size,
        hop_size,
    }
}

// =============================================================================
// Buffer-level summaries
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub rms_db: f32,
    pub peak: f32,
    pub crest_db: f32,
    pub snr_db: f32,
    /// Integrated loudness (EBU R128). `None` when the buffer is too short to gate.
    pub loudness_lufs: Option<f64>,
}

impl Metrics {
    pub fn compute(buffer: &AudioBuffer) -> Self {
        let mono = buffer.to_mono();
        let rms = compute_rms(&mono);
        let peak = compute_peak(&mono);
        Self {
            rms_db: rms.db,
            peak,
            crest_db: compute_crest_factor(peak, rms.linear),
            snr_db: estimate_snr(&mono),
            loudness_lufs: integrated_loudness(&mono, buffer.sample_rate()),
        }
    }
}

fn integrated_loudness(mono: &[f32], sample_rate: u32) -> Option<f64> {
    // Gating needs at least one 400 ms block.
    if (mono.len() as u64) * 10 < sample_rate as u64 * 4 {
        return None;
    }
    let mut meter = match EbuR128::new(1, sample_rate, Mode::I) {
        Ok(m) => m,
        Err(e) => {
            debug!("loudness meter unavailable at {} Hz: {:?}", sample_rate, e);
            return None;
        }
    };
    meter.add_frames_f32(mono).ok()?;
    let lufs = meter.loudness_global().ok()?;
    lufs.is_finite().then_some(lufs)
}

/// Min/max envelope per display column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveformOverview {
    pub columns: Vec<(f32, f32)>,
}

impl WaveformOverview {
    pub fn compute(buffer: &AudioBuffer, columns: usize) -> Self {
        let mono = buffer.to_mono();
        if mono.is_empty() || columns == 0 {
            return Self::default();
        }
        let columns = columns.min(mono.len());
        let out = (0..columns)
            .map(|c| {
                let start = c * mono.len() / columns;
                let end = ((c + 1) * mono.len() / columns).max(start + 1);
                mono[start..end]
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)))
            })
            .collect();
        Self { columns: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, rate: u32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_rms_zero_and_empty() {
        let z = compute_rms(&[0.0; 64]);
        assert_eq!(z.linear, 0.0);
        assert_eq!(z.db, f32::NEG_INFINITY);
        let e = compute_rms(&[]);
        assert_eq!(e.linear, 0.0);
        assert_eq!(e.db, f32::NEG_INFINITY);
    }

    #[test]
    fn test_rms_constant() {
        let r = compute_rms(&[0.3; 100]);
        assert_relative_eq!(r.linear, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_peak() {
        assert_eq!(compute_peak(&[0.5, -0.9, 0.1]), 0.9);
        assert_eq!(compute_peak(&[]), 0.0);
    }

    #[test]
    fn test_crest_factor_guards() {
        assert_eq!(compute_crest_factor(0.0, 1.0), 0.0);
        assert_eq!(compute_crest_factor(1.0, 0.0), 0.0);
        assert_relative_eq!(compute_crest_factor(1.0, 0.5), 6.0206, epsilon = 1e-3);
    }

    #[test]
    fn test_snr_edges() {
        assert_eq!(estimate_snr(&[0.5; 19]), 0.0);
        assert_eq!(estimate_snr(&[0.0; 100]), SNR_CEILING_DB);
    }

    #[test]
    fn test_snr_two_level_signal() {
        // Half the samples at 0.05, half at 0.5: noise and signal populations
        // are each a single level, 20 dB apart.
        let x: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 0.05 } else { -0.5 }).collect();
        assert_relative_eq!(estimate_snr(&x), 20.0, epsilon = 1e-3);
    }

    #[test]
    fn test_spectrogram_peak_bin_every_slice() {
        let rate = 48000;
        let fft = 1024;
        // Bin 32 is exactly 1500 Hz at 48 kHz / 1024.
        let freq = 1500.0;
        let x = sine(freq, rate, 8192, 0.8);
        let mut cache = FftCache::new();
        let spec = compute_spectrogram(&x, rate, fft, 256, &mut cache);

        assert_eq!(spec.freq_bin_count, 512);
        assert_eq!(spec.time_slices(), (8192 - 1024) / 256 + 1);
        let expected = (freq * fft as f32 / rate as f32).round() as usize;
        for row in &spec.frames {
            let (best, _) = row
                .iter()
                .enumerate()
                .fold((0, f32::MIN), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc });
            assert_eq!(best, expected);
        }
    }

    #[test]
    fn test_spectrogram_short_input() {
        let mut cache = FftCache::new();
        let spec = compute_spectrogram(&[0.1; 100], 48000, 1024, 256, &mut cache);
        assert_eq!(spec.time_slices(), 0);
        assert_eq!(spec.freq_bin_count, 512);
    }

    #[test]
    fn test_spectrogram_values_clamped() {
        let mut cache = FftCache::new();
        let spec = compute_spectrogram(&vec![0.0; 2048], 48000, 1024, 256, &mut cache);
        for row in &spec.frames {
            for &v in row {
                assert!((-100.0..=0.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_metrics_on_tone() {
        let buf = AudioBuffer::mono(48000, sine(1000.0, 48000, 48000, 0.5));
        let m = Metrics::compute(&buf);
        assert_relative_eq!(m.peak, 0.5, epsilon = 1e-3);
        assert_relative_eq!(m.crest_db, 3.0103, epsilon = 0.05);
        assert!(m.loudness_lufs.is_some());

        let short = AudioBuffer::mono(48000, vec![0.1; 1000]);
        assert!(Metrics::compute(&short).loudness_lufs.is_none());
    }

    #[test]
    fn test_waveform_overview() {
        let buf = AudioBuffer::mono(8, vec![0.0, 1.0, -1.0, 0.5, 0.2, -0.2, 0.0, 0.0]);
        let w = WaveformOverview::compute(&buf, 2);
        assert_eq!(w.columns, vec![(-1.0, 1.0), (-0.2, 0.2)]);
    }
}
