//! Live suppression pipeline.
//!
//! # Purpose
//! Owns the active processor for a live input track and exposes one output
//! track that stays the same across backend swaps, so the transport layer
//! never has to reconnect.
//!
//! # Design Notes
//! - Strength and pre-gain changes go straight to the live mixer's
//!   [`MixControl`]. Anything else builds a new processor next to the old one;
//!   the old one keeps running until the new one is active.
//! - A failed swap leaves the previous processor in place and returns the
//!   error.
//! - The outgoing processor is finished before it is destroyed, so its
//!   partial frame and latency tail still reach the output.
//! - Level meters are updated once per render block.

use std::sync::Arc;

use log::{info, warn};

use crate::backend::BackendLoader;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{AudioContext, SourceNode, Track, TrackWriter};
use crate::meters::LevelMeters;
use crate::processor::{build_processor, MixControl, PassThroughProcessor, Processor, ProcessorOptions};
use crate::settings::EffectSettings;

struct ActiveChain {
    processor: Box<dyn Processor>,
    /// Feeds the processor's input track.
    tap: TrackWriter,
    output: Track,
    control: Option<MixControl>,
}

pub struct LivePipeline {
    context: AudioContext,
    input: SourceNode,
    loader: Arc<dyn BackendLoader>,
    settings: EffectSettings,
    chain: ActiveChain,
    output: TrackWriter,
    meters: Arc<LevelMeters>,
}

impl LivePipeline {
    /// Start on pass-through audio reading from `input`.
    pub fn new(
        context: AudioContext,
        input: Track,
        loader: Arc<dyn BackendLoader>,
    ) -> PipelineResult<Self> {
        let chain = Self::start_chain(&context, Box::new(PassThroughProcessor::new()), None)?;
        let (output, _) = context.track();
        Ok(Self {
            context,
            input: SourceNode::connect(input),
            loader,
            settings: EffectSettings::default(),
            chain,
            output,
            meters: Arc::new(LevelMeters::new()),
        })
    }

    fn start_chain(
        context: &AudioContext,
        mut processor: Box<dyn Processor>,
        control: Option<MixControl>,
    ) -> PipelineResult<ActiveChain> {
        let (tap, track) = context.track();
        if let Err(e) = processor.initialize(&ProcessorOptions {
            track,
            context: *context,
        }) {
            processor.destroy();
            return Err(e);
        }
        let Some(output) = processor.processed_track() else {
            let name = processor.name().to_string();
            processor.destroy();
            return Err(PipelineError::NotActive(name));
        };
        Ok(ActiveChain {
            processor,
            tap,
            output,
            control,
        })
    }

    /// The stable output consumers read from.
    pub fn output_track(&self) -> Track {
        self.output.track()
    }

    pub fn meters(&self) -> Arc<LevelMeters> {
        self.meters.clone()
    }

    pub fn settings(&self) -> EffectSettings {
        self.settings
    }

    pub fn active_name(&self) -> &str {
        self.chain.processor.name()
    }

    /// Live gain handle of the active mixer, `None` on pass-through.
    pub fn mix_control(&self) -> Option<MixControl> {
        self.chain.control.clone()
    }

    /// Process everything buffered on the input. Returns samples published.
    pub fn render(&mut self) -> PipelineResult<usize> {
        let block = self.input.pull();
        if !block.is_empty() {
            self.meters.update_input(&block);
            self.chain.tap.write(&block);
        }
        self.chain.processor.render()?;
        for event in self.chain.processor.drain_events() {
            if let Some(err) = event.as_error() {
                log::debug!("{}", err);
            }
        }
        let out = self.chain.output.drain();
        if out.is_empty() {
            return Ok(0);
        }
        self.meters.update_output(&out);
        Ok(self.output.write(&out))
    }

    /// Switch to `settings`. Gain-only changes are applied in place.
    pub fn apply_settings(&mut self, settings: EffectSettings) -> PipelineResult<()> {
        let settings = settings.sanitized();
        if !self.settings.requires_rebuild(&settings) {
            if let Some(control) = &self.chain.control {
                control.set_strength(settings.strength);
                control.set_pre_gain(settings.pre_gain);
            }
            self.settings = settings;
            return Ok(());
        }

        let kind = settings.backend_kind();
        let (processor, control) = build_processor(
            kind,
            self.loader.clone(),
            settings.strength,
            settings.pre_gain,
        );
        let chain = match Self::start_chain(&self.context, processor, control) {
            Ok(chain) => chain,
            Err(e) => {
                warn!(
                    "keeping '{}': switching to '{}' failed: {}",
                    self.chain.processor.name(),
                    kind.name(),
                    e
                );
                return Err(e);
            }
        };

        let mut old = std::mem::replace(&mut self.chain, chain);
        old.tap.close();
        if let Err(e) = old.processor.finish() {
            warn!("flushing '{}' before the swap failed: {}", old.processor.name(), e);
        }
        let rest = old.output.drain();
        if !rest.is_empty() {
            self.meters.update_output(&rest);
            self.output.write(&rest);
        }
        old.processor.destroy();
        info!(
            "live pipeline switched from '{}' to '{}'",
            old.processor.name(),
            self.chain.processor.name()
        );
        self.settings = settings;
        Ok(())
    }

    /// Tear everything down and close the output.
    pub fn shutdown(&mut self) {
        self.chain.processor.destroy();
        self.chain.tap.close();
        self.input.disconnect();
        self.output.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BuiltinLoader;
    use crate::processor::backend_processor::testing::{FakeEngine, FakeLoader};
    use crate::settings::BackendChoice;

    fn pipeline(loader: Arc<dyn BackendLoader>) -> (LivePipeline, TrackWriter) {
        let ctx = AudioContext::realtime(48000);
        let (mic, track) = ctx.track();
        (LivePipeline::new(ctx, track, loader).unwrap(), mic)
    }

    #[test]
    fn test_starts_on_passthrough() {
        let (mut p, mut mic) = pipeline(Arc::new(BuiltinLoader::new()));
        let out = p.output_track();
        mic.write(&[0.5; 128]);
        assert_eq!(p.render().unwrap(), 128);
        assert_eq!(out.drain(), vec![0.5; 128]);
        assert_eq!(p.active_name(), "passthrough");
        assert!((p.meters().input_peak() - 0.5).abs() < 1e-6);
        assert!((p.meters().output_rms() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_swap_keeps_output_track() {
        let loader = FakeLoader::with(FakeEngine::new(48000, 480, 0, 0.5));
        let (mut p, mut mic) = pipeline(loader);
        let out = p.output_track();

        p.apply_settings(EffectSettings::default().with_backend(BackendChoice::Spectral))
            .unwrap();
        assert_eq!(p.active_name(), "mix(spectral)");
        mic.write(&[0.8; 960]);
        p.render().unwrap();
        let y = out.drain();
        assert_eq!(y.len(), 960);
        assert!(y.iter().all(|&v| (v - 0.4).abs() < 1e-6));

        // Gain-only change does not rebuild.
        p.apply_settings(EffectSettings {
            strength: 0.0,
            ..p.settings()
        })
        .unwrap();
        assert_eq!(p.mix_control().unwrap().strength(), 0.0);
        mic.write(&[0.8; 480]);
        p.render().unwrap();
        assert!(out.drain().iter().all(|&v| (v - 0.8).abs() < 1e-6));
    }

    #[test]
    fn test_swap_mid_stream_loses_no_samples() {
        let loader = FakeLoader::with(FakeEngine::new(48000, 480, 100, 0.5));
        let (mut p, mut mic) = pipeline(loader);
        let out = p.output_track();

        p.apply_settings(EffectSettings::default().with_backend(BackendChoice::Spectral))
            .unwrap();
        // One full frame plus a partial one is in flight at the swap.
        mic.write(&[0.8; 700]);
        p.render().unwrap();
        p.apply_settings(EffectSettings::default().with_backend(BackendChoice::None))
            .unwrap();
        assert_eq!(p.active_name(), "passthrough");

        mic.write(&[0.8; 300]);
        p.render().unwrap();
        let y = out.drain();
        assert_eq!(y.len(), 1000);
        // The latency tail is processed; nothing drops to silence.
        assert!(y[..480].iter().all(|&v| (v - 0.4).abs() < 1e-6));
        assert!(y.iter().all(|&v| v > 0.3), "gap in output");
        assert!(y[700..].iter().all(|&v| (v - 0.8).abs() < 1e-6));
    }

    #[test]
    fn test_failed_swap_keeps_previous_processor() {
        let (mut p, mut mic) = pipeline(FakeLoader::failing());
        let err = p
            .apply_settings(EffectSettings::default().with_backend(BackendChoice::Vendor))
            .unwrap_err();
        assert!(err.is_backend_unavailable());
        assert_eq!(p.active_name(), "passthrough");
        assert_eq!(p.settings().backend, BackendChoice::None);

        let out = p.output_track();
        mic.write(&[0.1; 64]);
        assert_eq!(p.render().unwrap(), 64);
        assert_eq!(out.drain().len(), 64);
    }

    #[test]
    fn test_shutdown_closes_output() {
        let (mut p, _mic) = pipeline(Arc::new(BuiltinLoader::new()));
        let out = p.output_track();
        p.shutdown();
        assert!(!out.is_open());
    }
}
