// Shared numeric helpers for the backend engines and the gate.

use std::f32::consts::PI;

/// Smallest magnitude kept in spectral paths (avoids log/div by zero).
pub const MAG_FLOOR: f32 = 1e-9;
/// Amount/strength below this is treated as bypass.
pub const BYPASS_AMOUNT_EPS: f32 = 1e-4;

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let denom = (edge1 - edge0).max(1e-12);
    let t = ((x - edge0) / denom).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub fn db_to_gain(db: f32) -> f32 {
    (10.0f32).powf(db / 20.0)
}

pub fn frame_rms(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / (x.len().max(1) as f32)).sqrt()
}

/// Periodic Hann window. Periodic (not symmetric) so that overlapping frames
/// sum to a constant.
pub fn make_hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / len as f32).cos()))
        .collect()
}

/// Square-rooted periodic Hann, used for both analysis and synthesis so the
/// product is a plain Hann.
pub fn make_sqrt_hann_window(len: usize) -> Vec<f32> {
    make_hann_window(len).into_iter().map(f32::sqrt).collect()
}

/// Overlap-add gain of `window²` at the given hop. Constant across the frame
/// for the windows above.
pub fn ola_gain(window: &[f32], hop: usize) -> f32 {
    let n = window.len();
    let mut sum = 0.0f32;
    let mut i = 0;
    while i < n {
        sum += window[i] * window[i];
        i += hop.max(1);
    }
    sum.max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqrt_hann_ola_is_flat() {
        let w = make_sqrt_hann_window(512);
        let g0 = ola_gain(&w, 128);
        // Every phase of the hop must see the same overlap sum.
        for phase in 1..128 {
            let mut s = 0.0;
            let mut i = phase;
            while i < 512 {
                s += w[i] * w[i];
                i += 128;
            }
            assert!((s - g0).abs() < 1e-4);
        }
        assert!((g0 - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_db_to_gain() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-20.0) - 0.1).abs() < 1e-6);
    }
}
