//! Voice activity gate for whole captured buffers.
//!
//! # Purpose
//! Finds speech regions in a take and produces a copy with everything else
//! silenced. Runs in the harness only, never on the render path.
//!
//! # Design Notes
//! - 30 ms frames, decisions on the mono mix, applied to every channel.
//! - `Silence -> Speaking` when frame RMS exceeds
//!   `0.005 + sensitivity * 0.04`.
//! - While speaking, up to 8 quiet frames are still marked as speech
//!   (redemption). The 9th ends the region at that frame's start.
//! - Each silence-to-speech edge gets a 5 ms linear fade-in.

use log::debug;

use crate::buffer::AudioBuffer;
use crate::dsp::analysis::compute_rms;

pub const VAD_FRAME_SECS: f64 = 0.030;
pub const VAD_BASE_THRESHOLD: f32 = 0.005;
pub const VAD_SENSITIVITY_RANGE: f32 = 0.04;
pub const VAD_REDEMPTION_FRAMES: usize = 8;
pub const VAD_FADE_SECS: f64 = 0.005;

/// Half-open `[start_secs, end_secs)` interval of detected speech.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechRegion {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl SpeechRegion {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VadOutput {
    pub regions: Vec<SpeechRegion>,
    pub gated: AudioBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Silence,
    Speaking { start: usize, quiet_frames: usize },
}

/// RMS threshold for a sensitivity in `[0, 1]` (clamped).
pub fn vad_threshold(sensitivity: f32) -> f32 {
    VAD_BASE_THRESHOLD + sensitivity.clamp(0.0, 1.0) * VAD_SENSITIVITY_RANGE
}

/// Detect speech regions in `buffer` and gate everything else to zero.
pub fn apply_vad(buffer: &AudioBuffer, sensitivity: f32) -> VadOutput {
    let rate = buffer.sample_rate() as f64;
    let total = buffer.frame_count();
    let frame = ((VAD_FRAME_SECS * rate).round() as usize).max(1);
    let fade_len = ((VAD_FADE_SECS * rate).round() as usize).max(1);
    let threshold = vad_threshold(sensitivity);
    let mono = buffer.to_mono();

    // Sample ranges that count as speech, in order.
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut state = GateState::Silence;

    for start in (0..total).step_by(frame) {
        let end = (start + frame).min(total);
        let loud = compute_rms(&mono[start..end]).linear > threshold;
        state = match state {
            GateState::Silence if loud => GateState::Speaking {
                start,
                quiet_frames: 0,
            },
            GateState::Silence => GateState::Silence,
            GateState::Speaking { start: s, .. } if loud => GateState::Speaking {
                start: s,
                quiet_frames: 0,
            },
            GateState::Speaking {
                start: s,
                quiet_frames,
            } => {
                if quiet_frames + 1 > VAD_REDEMPTION_FRAMES {
                    spans.push((s, start));
                    GateState::Silence
                } else {
                    GateState::Speaking {
                        start: s,
                        quiet_frames: quiet_frames + 1,
                    }
                }
            }
        };
    }
    if let GateState::Speaking { start, .. } = state {
        spans.push((start, total));
    }

    let regions: Vec<SpeechRegion> = spans
        .iter()
        .map(|&(s, e)| SpeechRegion {
            start_secs: s as f64 / rate,
            end_secs: e as f64 / rate,
        })
        .collect();
    debug!(
        "vad: {} region(s), threshold {:.4}, frame {} samples",
        regions.len(),
        threshold,
        frame
    );

    let gated_channels = buffer
        .channels()
        .iter()
        .map(|ch| gate_channel(ch, &spans, fade_len))
        .collect();

    VadOutput {
        regions,
        gated: AudioBuffer::new(buffer.sample_rate(), gated_channels)
            .unwrap_or_else(|_| AudioBuffer::silence(buffer.sample_rate(), 1, total)),
    }
}

fn gate_channel(samples: &[f32], spans: &[(usize, usize)], fade_len: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; samples.len()];
    for &(s, e) in spans {
        for i in s..e {
            let j = i - s;
            let g = if j < fade_len {
                j as f32 / fade_len as f32
            } else {
                1.0
            };
            out[i] = samples[i] * g;
        }
    }
    out
}
