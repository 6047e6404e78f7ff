//! Lock-free level metering shared between the render side and the UI.
//!
//! Floats are stored as their bit pattern in `AtomicU32` so the render path
//! never takes a lock. All accesses use `Relaxed`: meters are advisory and
//! eventually consistent with the next render block.

use std::sync::atomic::{AtomicU32, Ordering};

/// An `f32` cell readable and writable from any thread without locking.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Input/output levels of the live pipeline.
#[derive(Debug, Default)]
pub struct LevelMeters {
    input_peak: AtomicF32,
    input_rms: AtomicF32,
    output_peak: AtomicF32,
    output_rms: AtomicF32,
}

impl LevelMeters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one render block of input samples.
    pub fn update_input(&self, block: &[f32]) {
        let (peak, rms) = block_levels(block);
        self.input_peak.store(peak);
        self.input_rms.store(rms);
    }

    /// Record one render block of output samples.
    pub fn update_output(&self, block: &[f32]) {
        let (peak, rms) = block_levels(block);
        self.output_peak.store(peak);
        self.output_rms.store(rms);
    }

    pub fn input_peak(&self) -> f32 {
        self.input_peak.load()
    }

    pub fn input_rms(&self) -> f32 {
        self.input_rms.load()
    }

    pub fn output_peak(&self) -> f32 {
        self.output_peak.load()
    }

    pub fn output_rms(&self) -> f32 {
        self.output_rms.load()
    }

    /// Output minus input RMS in dB. Negative while the backend is removing
    /// energy. Zero when either side is silent.
    pub fn reduction_db(&self) -> f32 {
        let i = self.input_rms();
        let o = self.output_rms();
        if i <= 0.0 || o <= 0.0 {
            return 0.0;
        }
        20.0 * (o / i).log10()
    }

    pub fn reset(&self) {
        self.input_peak.store(0.0);
        self.input_rms.store(0.0);
        self.output_peak.store(0.0);
        self.output_rms.store(0.0);
    }
}

fn block_levels(block: &[f32]) -> (f32, f32) {
    if block.is_empty() {
        return (0.0, 0.0);
    }
    let mut peak = 0.0f32;
    let mut sum = 0.0f32;
    for &x in block {
        peak = peak.max(x.abs());
        sum += x * x;
    }
    (peak, (sum / block.len() as f32).sqrt())
}
