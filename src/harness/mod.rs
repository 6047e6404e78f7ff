//! Offline test harness.
//!
//! # Purpose
//! Captures a raw take, runs it through the same processor and mixer
//! machinery as the live path (rendered offline, never to an output device),
//! and produces everything needed to compare raw against processed: metrics,
//! spectrograms, waveform overviews, A/B playback and WAV export.
//!
//! # Design Notes
//! - A backend that cannot be loaded is not fatal here. The failure goes into
//!   the diagnostic trail and the take is processed as pass-through.
//! - The voice gate runs after the backend, on the whole processed buffer.
//! - Reprocessing on settings changes is debounced; see [`debounce`].

pub mod capture;
pub mod debounce;
pub mod diagnostics;
pub mod export;
pub mod playback;

pub use capture::{record, BufferCapture, CaptureConstraints, CaptureDevice, CaptureStream};
pub use debounce::Debouncer;
pub use diagnostics::{DiagnosticEntry, DiagnosticLevel, DiagnosticLog};
pub use export::{export_wav, read_wav, ExportFormat};
pub use playback::{PlaybackDevice, PlaybackHandle, Player, PlayerEvent};

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::backend::BackendLoader;
use crate::buffer::AudioBuffer;
use crate::dsp::analysis::{
    compute_spectrogram, Metrics, Spectrogram, WaveformOverview, DEFAULT_FFT_SIZE,
    DEFAULT_HOP_SIZE,
};
use crate::dsp::fft::FftCache;
use crate::dsp::vad::{apply_vad, SpeechRegion};
use crate::error::{PipelineError, PipelineResult};
use crate::processor::{
    build_processor, render_offline, PassThroughProcessor, Processor, ProcessorEvent,
    ProcessorStats,
};
use crate::settings::EffectSettings;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Capture length, clamped to 3..=10 s.
    pub capture_secs: f32,
    /// Requested capture rate. The device may deliver another.
    pub sample_rate: u32,
    pub debounce_ms: u64,
    pub ab_gap_ms: u64,
    pub diagnostics_capacity: usize,
    pub spectrogram_fft_size: usize,
    pub spectrogram_hop_size: usize,
    pub waveform_columns: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            capture_secs: 5.0,
            sample_rate: 48_000,
            debounce_ms: 300,
            ab_gap_ms: 400,
            diagnostics_capacity: 50,
            spectrogram_fft_size: DEFAULT_FFT_SIZE,
            spectrogram_hop_size: DEFAULT_HOP_SIZE,
            waveform_columns: 800,
        }
    }
}

impl HarnessConfig {
    pub fn sanitized(&self) -> Self {
        let d = Self::default();
        Self {
            capture_secs: capture::clamp_capture_secs(self.capture_secs),
            sample_rate: if self.sample_rate == 0 {
                d.sample_rate
            } else {
                self.sample_rate
            },
            debounce_ms: self.debounce_ms,
            ab_gap_ms: self.ab_gap_ms,
            diagnostics_capacity: self.diagnostics_capacity.max(1),
            spectrogram_fft_size: if self.spectrogram_fft_size.is_power_of_two()
                && self.spectrogram_fft_size >= 64
            {
                self.spectrogram_fft_size
            } else {
                d.spectrogram_fft_size
            },
            spectrogram_hop_size: self.spectrogram_hop_size.max(1),
            waveform_columns: self.waveform_columns.max(1),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn ab_gap(&self) -> Duration {
        Duration::from_millis(self.ab_gap_ms)
    }
}

// =============================================================================
// Results
// =============================================================================

/// A raw take after processing.
#[derive(Debug, Clone)]
pub struct ProcessedTake {
    pub buffer: AudioBuffer,
    pub settings: EffectSettings,
    /// Speech regions, empty unless the gate ran.
    pub regions: Vec<SpeechRegion>,
    pub backend_used: String,
    /// The selected backend could not be loaded; pass-through was used.
    pub fell_back: bool,
    pub stats: ProcessorStats,
    pub frame_faults: usize,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub metrics: Metrics,
    pub spectrogram: Spectrogram,
    pub waveform: WaveformOverview,
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub raw: Analysis,
    pub processed: Analysis,
}

impl Comparison {
    pub fn snr_gain_db(&self) -> f32 {
        self.processed.metrics.snr_db - self.raw.metrics.snr_db
    }
}

// =============================================================================
// Processing
// =============================================================================

/// Run `raw` through the chain described by `settings`, offline.
///
/// An unavailable backend is logged to `diagnostics` and replaced by
/// pass-through. Any other failure is returned.
pub fn process_buffer(
    raw: &AudioBuffer,
    settings: &EffectSettings,
    loader: Arc<dyn BackendLoader>,
    diagnostics: &mut DiagnosticLog,
) -> PipelineResult<ProcessedTake> {
    let settings = settings.sanitized();
    let kind = settings.backend_kind();
    let (mut processor, _control) =
        build_processor(kind, loader, settings.strength, settings.pre_gain);

    let (buffer, backend_used, fell_back, stats, events) =
        match render_offline(processor.as_mut(), raw) {
            Ok(render) => {
                let events = processor.drain_events();
                (
                    render.buffer,
                    processor.name().to_string(),
                    false,
                    render.stats,
                    events,
                )
            }
            Err(e) if e.is_backend_unavailable() => {
                diagnostics.push(
                    DiagnosticLevel::Warning,
                    format!("{}; processing as pass-through", e),
                );
                let mut fallback = PassThroughProcessor::new();
                let render = render_offline(&mut fallback, raw)?;
                (render.buffer, fallback.name().to_string(), true, render.stats, Vec::new())
            }
            Err(e) => {
                diagnostics.push(DiagnosticLevel::Error, format!("processing failed: {}", e));
                return Err(e);
            }
        };

    let frame_faults = events
        .iter()
        .filter(|e| matches!(e, ProcessorEvent::FrameFault { .. }))
        .count();
    if frame_faults > 0 {
        diagnostics.push(
            DiagnosticLevel::Warning,
            format!(
                "'{}' passed {} faulted frame(s) through unprocessed",
                backend_used, frame_faults
            ),
        );
    }

    let (buffer, regions) = if settings.vad_enabled {
        let gated = apply_vad(&buffer, settings.vad_sensitivity);
        (gated.gated, gated.regions)
    } else {
        (buffer, Vec::new())
    };

    Ok(ProcessedTake {
        buffer,
        settings,
        regions,
        backend_used,
        fell_back,
        stats,
        frame_faults,
    })
}

/// Metrics, spectrogram and waveform for one buffer.
pub fn analyze(buffer: &AudioBuffer, config: &HarnessConfig, cache: &mut FftCache) -> Analysis {
    let mono = buffer.to_mono();
    Analysis {
        metrics: Metrics::compute(buffer),
        spectrogram: compute_spectrogram(
            &mono,
            buffer.sample_rate(),
            config.spectrogram_fft_size,
            config.spectrogram_hop_size,
            cache,
        ),
        waveform: WaveformOverview::compute(buffer, config.waveform_columns),
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct TestHarness {
    config: HarnessConfig,
    loader: Arc<dyn BackendLoader>,
    diagnostics: DiagnosticLog,
    fft: FftCache,
    raw: Option<AudioBuffer>,
    processed: Option<ProcessedTake>,
}

impl TestHarness {
    pub fn new(config: HarnessConfig, loader: Arc<dyn BackendLoader>) -> Self {
        let config = config.sanitized();
        Self {
            diagnostics: DiagnosticLog::new(config.diagnostics_capacity),
            config,
            loader,
            fft: FftCache::new(),
            raw: None,
            processed: None,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn raw(&self) -> Option<&AudioBuffer> {
        self.raw.as_ref()
    }

    pub fn processed(&self) -> Option<&ProcessedTake> {
        self.processed.as_ref()
    }

    /// Replace the raw take, e.g. with a file loaded from disk.
    pub fn set_raw(&mut self, buffer: AudioBuffer) {
        self.raw = Some(buffer);
        self.processed = None;
    }

    /// Capture a new raw take from `device`.
    pub async fn record(&mut self, device: &dyn CaptureDevice) -> PipelineResult<&AudioBuffer> {
        let constraints = CaptureConstraints::raw(self.config.sample_rate);
        match capture::record(device, constraints, self.config.capture_secs).await {
            Ok(take) => {
                info!(
                    "recorded {:.2}s at {} Hz from '{}'",
                    take.duration_secs(),
                    take.sample_rate(),
                    device.name()
                );
                self.processed = None;
                Ok(&*self.raw.insert(take))
            }
            Err(e) => {
                self.diagnostics
                    .push(DiagnosticLevel::Error, format!("capture failed: {}", e));
                Err(e)
            }
        }
    }

    /// Process the current raw take with `settings`.
    pub fn process_raw(&mut self, settings: &EffectSettings) -> PipelineResult<&ProcessedTake> {
        let raw = self
            .raw
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidBuffer("no raw take recorded".into()))?;
        let take = process_buffer(raw, settings, self.loader.clone(), &mut self.diagnostics)?;
        debug!(
            "processed take with '{}' ({} frames, {} region(s))",
            take.backend_used,
            take.buffer.frame_count(),
            take.regions.len()
        );
        Ok(&*self.processed.insert(take))
    }

    pub fn analyze(&mut self, buffer: &AudioBuffer) -> Analysis {
        analyze(buffer, &self.config, &mut self.fft)
    }

    /// Raw and processed analyses, once both exist.
    pub fn compare(&mut self) -> Option<Comparison> {
        let raw = self.raw.as_ref()?;
        let processed = self.processed.as_ref()?;
        Some(Comparison {
            raw: analyze(raw, &self.config, &mut self.fft),
            processed: analyze(&processed.buffer, &self.config, &mut self.fft),
        })
    }

    pub fn export_raw(&self, path: &Path, format: ExportFormat) -> PipelineResult<()> {
        let raw = self
            .raw
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidBuffer("no raw take recorded".into()))?;
        export_wav(path, raw, format)
    }

    pub fn export_processed(&self, path: &Path, format: ExportFormat) -> PipelineResult<()> {
        let take = self
            .processed
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidBuffer("no processed take".into()))?;
        export_wav(path, &take.buffer, format)
    }

    /// Player using the configured A/B gap.
    pub fn player(
        &self,
        device: Arc<dyn PlaybackDevice>,
    ) -> (Player, UnboundedReceiver<PlayerEvent>) {
        Player::with_gap(device, self.config.ab_gap())
    }

    /// Debounced reprocessing of a shared harness on settings changes.
    pub fn reprocessor(harness: Arc<Mutex<TestHarness>>) -> Debouncer<EffectSettings> {
        let delay = harness
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .config
            .debounce();
        Debouncer::new(delay, move |settings: EffectSettings| {
            let harness = harness.clone();
            async move {
                reprocess_now(&harness, &settings);
            }
        })
    }
}

fn reprocess_now(harness: &Mutex<TestHarness>, settings: &EffectSettings) {
    let mut h = harness.lock().unwrap_or_else(|p| p.into_inner());
    if h.raw.is_none() {
        debug!("settings changed before any take was recorded");
        return;
    }
    // Failures are already in the diagnostic trail.
    let _ = h.process_raw(settings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BuiltinLoader;
    use crate::dsp::analysis::estimate_snr;
    use crate::processor::backend_processor::testing::{FakeEngine, FakeLoader};
    use crate::settings::BackendChoice;

    struct XorShift(u32);

    impl XorShift {
        fn next_f32(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0 as f32 / u32::MAX as f32 * 2.0 - 1.0
        }
    }

    /// Noise throughout, 440 Hz tone in every other half second starting
    /// with the second.
    fn noisy_take(rate: u32, secs: f32) -> AudioBuffer {
        let mut rng = XorShift(0x1234_5678);
        let n = (rate as f32 * secs) as usize;
        let seg = rate as usize / 2;
        let samples = (0..n)
            .map(|i| {
                let noise = rng.next_f32() * 0.0866;
                let tone = if (i / seg) % 2 == 1 {
                    0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin()
                } else {
                    0.0
                };
                tone + noise
            })
            .collect();
        AudioBuffer::mono(rate, samples)
    }

    #[test]
    fn test_config_sanitized() {
        let c = HarnessConfig {
            capture_secs: 30.0,
            spectrogram_fft_size: 1000,
            ..HarnessConfig::default()
        }
        .sanitized();
        assert_eq!(c.capture_secs, 10.0);
        assert_eq!(c.spectrogram_fft_size, DEFAULT_FFT_SIZE);
        let parsed: HarnessConfig = serde_json::from_str(r#"{ "ab_gap_ms": 250 }"#).unwrap();
        assert_eq!(parsed.ab_gap(), Duration::from_millis(250));
        assert_eq!(parsed.debounce(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_deep_filter_end_to_end() {
        let device = BufferCapture::new("fixture", noisy_take(48000, 5.0));
        let mut harness = TestHarness::new(HarnessConfig::default(), Arc::new(BuiltinLoader::new()));
        let raw_len = harness.record(&device).await.unwrap().frame_count();
        assert_eq!(raw_len, 240_000);

        let settings = EffectSettings {
            backend: BackendChoice::DeepFilter,
            attenuation_db: 20.0,
            strength: 1.0,
            ..EffectSettings::default()
        };
        let take = harness.process_raw(&settings).unwrap();
        assert!(!take.fell_back);
        assert_eq!(take.backend_used, "mix(deep-filter)");
        let out_len = take.buffer.frame_count();
        assert!(out_len.abs_diff(raw_len) <= 480);

        let cmp = harness.compare().unwrap();
        assert!(
            cmp.processed.metrics.snr_db >= cmp.raw.metrics.snr_db,
            "processed {} dB < raw {} dB",
            cmp.processed.metrics.snr_db,
            cmp.raw.metrics.snr_db
        );
        assert!(cmp.raw.spectrogram.time_slices() > 0);
        assert_eq!(cmp.raw.waveform.columns.len(), 800);
    }

    #[test]
    fn test_unavailable_backend_falls_back_and_is_logged() {
        let mut diagnostics = DiagnosticLog::new(10);
        let raw = noisy_take(48000, 1.0);
        let settings = EffectSettings::default().with_backend(BackendChoice::Vendor);
        let take = process_buffer(
            &raw,
            &settings,
            Arc::new(BuiltinLoader::new()),
            &mut diagnostics,
        )
        .unwrap();
        assert!(take.fell_back);
        assert_eq!(take.backend_used, "passthrough");
        assert_eq!(take.buffer, raw);
        assert_eq!(take.stats.samples_in, 48000);
        let entry = diagnostics.latest().unwrap();
        assert_eq!(entry.level, DiagnosticLevel::Warning);
        assert!(entry.message.contains("vendor"));
    }

    #[test]
    fn test_frame_faults_are_reported() {
        let mut eng = FakeEngine::new(48000, 480, 0, 1.0);
        eng.fail_frames = vec![2, 3];
        let mut diagnostics = DiagnosticLog::new(10);
        let take = process_buffer(
            &AudioBuffer::mono(48000, vec![0.1; 4800]),
            &EffectSettings::default().with_backend(BackendChoice::Spectral),
            FakeLoader::with(eng),
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(take.frame_faults, 2);
        assert!(diagnostics.latest().unwrap().message.contains("2 faulted"));
    }

    #[test]
    fn test_vad_runs_after_backend() {
        let mut diagnostics = DiagnosticLog::new(10);
        let mut x = vec![0.0f32; 48000];
        for (i, v) in x.iter_mut().enumerate().skip(24000) {
            *v = 0.3 * (i as f32 * 0.05).sin();
        }
        let settings = EffectSettings {
            vad_enabled: true,
            vad_sensitivity: 0.2,
            ..EffectSettings::default()
        };
        let take = process_buffer(
            &AudioBuffer::mono(48000, x),
            &settings,
            Arc::new(BuiltinLoader::new()),
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(take.regions.len(), 1);
        assert!((take.regions[0].start_secs - 0.5).abs() < 0.031);
        assert!(take.buffer.channel(0)[..23000].iter().all(|&v| v == 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_reprocessing_uses_latest_settings() {
        let mut h = TestHarness::new(HarnessConfig::default(), Arc::new(BuiltinLoader::new()));
        h.set_raw(noisy_take(48000, 0.5));
        let shared = Arc::new(Mutex::new(h));
        let reprocess = TestHarness::reprocessor(shared.clone());

        reprocess.schedule(EffectSettings::default().with_backend(BackendChoice::Rnnoise));
        tokio::time::sleep(Duration::from_millis(100)).await;
        reprocess.schedule(EffectSettings::default().with_backend(BackendChoice::Spectral));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(reprocess.runs(), 1);
        let h = shared.lock().unwrap();
        assert_eq!(h.processed().unwrap().backend_used, "mix(spectral)");
    }

    #[test]
    fn test_snr_of_fixture_is_finite() {
        let raw = noisy_take(48000, 2.0);
        let snr = estimate_snr(raw.channel(0));
        assert!(snr.is_finite() && snr > 0.0);
    }
}
