//! WAV import/export.
//!
//! Exports are always two-channel: a mono take is duplicated to both
//! channels, extra channels beyond two are dropped.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::info;
use serde::{Deserialize, Serialize};

use crate::buffer::AudioBuffer;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportFormat {
    /// 16-bit signed integer PCM.
    #[default]
    Pcm16,
    /// 32-bit IEEE float.
    Float32,
}

impl ExportFormat {
    fn spec(self, sample_rate: u32) -> WavSpec {
        match self {
            ExportFormat::Pcm16 => WavSpec {
                channels: 2,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            ExportFormat::Float32 => WavSpec {
                channels: 2,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        }
    }
}

/// Write `buffer` as a stereo WAV file at the buffer's sample rate.
pub fn export_wav(path: &Path, buffer: &AudioBuffer, format: ExportFormat) -> PipelineResult<()> {
    let left = buffer.channel(0);
    let right = if buffer.channel_count() > 1 {
        buffer.channel(1)
    } else {
        left
    };

    let mut writer = WavWriter::create(path, format.spec(buffer.sample_rate()))?;
    for (&l, &r) in left.iter().zip(right) {
        match format {
            ExportFormat::Pcm16 => {
                writer.write_sample(to_i16(l))?;
                writer.write_sample(to_i16(r))?;
            }
            ExportFormat::Float32 => {
                writer.write_sample(l)?;
                writer.write_sample(r)?;
            }
        }
    }
    writer.finalize()?;
    info!(
        "exported {} frames ({:?}) to '{}'",
        buffer.frame_count(),
        format,
        path.display()
    );
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Read a WAV file of any integer or float format into a buffer.
/// Full-scale value of a signed integer sample of `bits` width.
fn int_full_scale(bits: u16) -> PipelineResult<f32> {
    if bits == 0 || bits > 32 {
        return Err(PipelineError::InvalidBuffer(format!(
            "unsupported integer sample width: {} bits",
            bits
        )));
    }
    Ok((1i64 << (bits - 1)) as f32)
}

pub fn read_wav(path: &Path) -> PipelineResult<AudioBuffer> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channel_count = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = int_full_scale(spec.bits_per_sample)?;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
    };

    let frames = interleaved.len() / channel_count;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (ch, &s) in channels.iter_mut().zip(frame) {
            ch.push(s);
        }
    }
    AudioBuffer::new(spec.sample_rate, channels).map_err(|e| match e {
        PipelineError::InvalidBuffer(msg) => {
            PipelineError::InvalidBuffer(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vxsuppress-{}-{}.wav", name, std::process::id()))
    }

    #[test]
    fn test_integer_sample_width_is_checked() {
        assert_eq!(int_full_scale(16).unwrap(), 32768.0);
        assert_eq!(int_full_scale(24).unwrap(), 8_388_608.0);
        assert!(matches!(
            int_full_scale(0),
            Err(PipelineError::InvalidBuffer(_))
        ));
        assert!(int_full_scale(40).is_err());
    }

    #[test]
    fn test_mono_export_is_duplicated_to_stereo() {
        let path = temp_path("mono16");
        let buf = AudioBuffer::mono(48000, vec![0.0, 0.5, -0.5, 1.0, -2.0]);
        export_wav(&path, &buf, ExportFormat::Pcm16).unwrap();

        let reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples.len(), 10);
        assert_eq!(samples[2], 16384);
        assert_eq!(samples[3], 16384);
        assert_eq!(samples[8], -32767);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_float_export_reads_back_exactly() {
        let path = temp_path("stereo32");
        let buf = AudioBuffer::new(16000, vec![vec![0.25, -0.125], vec![0.75, 0.0]]).unwrap();
        export_wav(&path, &buf, ExportFormat::Float32).unwrap();
        let back = read_wav(&path).unwrap();
        assert_eq!(back, buf);
        std::fs::remove_file(&path).ok();
    }
}
