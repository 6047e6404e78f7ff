//! Immutable multi-channel sample buffers.
//!
//! A buffer is produced by capture or by a processing stage and is never
//! mutated afterwards. Stages take a buffer by reference and return a new one.

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build a buffer from per-channel sample vectors.
    ///
    /// Every channel must hold the same number of frames and at least one
    /// channel must be present.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> PipelineResult<Self> {
        if sample_rate == 0 {
            return Err(PipelineError::InvalidBuffer("sample rate must be > 0".into()));
        }
        let Some(first) = channels.first() else {
            return Err(PipelineError::InvalidBuffer("no channels".into()));
        };
        let frames = first.len();
        if let Some((idx, ch)) = channels.iter().enumerate().find(|(_, c)| c.len() != frames) {
            return Err(PipelineError::InvalidBuffer(format!(
                "channel {} has {} frames, expected {}",
                idx,
                ch.len(),
                frames
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: vec![samples],
        }
    }

    pub fn silence(sample_rate: u32, channel_count: usize, frame_count: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: vec![vec![0.0; frame_count]; channel_count.max(1)],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Average of all channels. Analysis always runs on this mix.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let scale = 1.0 / self.channels.len() as f32;
        (0..self.frame_count())
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_ragged_channels() {
        let err = AudioBuffer::new(48000, vec![vec![0.0; 4], vec![0.0; 3]]);
        assert!(matches!(err, Err(PipelineError::InvalidBuffer(_))));
    }

    #[test]
    fn test_rejects_empty_channel_list() {
        assert!(AudioBuffer::new(48000, Vec::new()).is_err());
    }

    #[test]
    fn test_duration_and_mono_mix() {
        let buf = AudioBuffer::new(4, vec![vec![1.0, 0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0, 1.0]])
            .unwrap();
        assert_eq!(buf.frame_count(), 4);
        assert!((buf.duration_secs() - 1.0).abs() < 1e-12);
        assert_eq!(buf.to_mono(), vec![0.5, 0.0, 1.0, 0.5]);
    }
}
