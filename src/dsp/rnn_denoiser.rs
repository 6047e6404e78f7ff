//! Recurrent-network backend (RNNoise via `nnnoiseless`).
//!
//! RNNoise works on 480-sample frames at 48 kHz and expects samples in the
//! 16-bit range, so frames are scaled on the way in and out. The model's own
//! analysis window delays output by one frame.

use nnnoiseless::DenoiseState;

use crate::backend::{DenoiseEngine, FrameError};

pub const RNN_RATE: u32 = 48_000;
const I16_SCALE: f32 = 32767.0;

pub struct RnnEngine {
    state: Box<DenoiseState<'static>>,
    scaled_in: Vec<f32>,
    scaled_out: Vec<f32>,
    /// Voice probability reported for the last frame.
    last_vad: f32,
    closed: bool,
}

impl RnnEngine {
    pub fn new() -> Self {
        Self {
            state: DenoiseState::new(),
            scaled_in: vec![0.0; DenoiseState::FRAME_SIZE],
            scaled_out: vec![0.0; DenoiseState::FRAME_SIZE],
            last_vad: 0.0,
            closed: false,
        }
    }

    pub fn last_voice_probability(&self) -> f32 {
        self.last_vad
    }
}

impl Default for RnnEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DenoiseEngine for RnnEngine {
    fn name(&self) -> &str {
        "rnnoise"
    }

    fn native_rate(&self) -> u32 {
        RNN_RATE
    }

    fn frame_len(&self) -> usize {
        DenoiseState::FRAME_SIZE
    }

    fn latency(&self) -> usize {
        DenoiseState::FRAME_SIZE
    }

    fn process_frame(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), FrameError> {
        if self.closed {
            return Err(FrameError("rnnoise engine is closed".into()));
        }
        let n = DenoiseState::FRAME_SIZE;
        if input.len() != n || output.len() != n {
            return Err(FrameError(format!(
                "expected {} samples, got {}",
                n,
                input.len()
            )));
        }
        for (d, &s) in self.scaled_in.iter_mut().zip(input) {
            *d = s * I16_SCALE;
        }
        self.last_vad = self
            .state
            .process_frame(&mut self.scaled_out, &self.scaled_in);
        for (d, &s) in output.iter_mut().zip(&self.scaled_out) {
            let y = s / I16_SCALE;
            if !y.is_finite() {
                return Err(FrameError("non-finite output".into()));
            }
            *d = y;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = DenoiseState::new();
        self.last_vad = 0.0;
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
