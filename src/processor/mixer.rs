//! Dry/wet mixer around exactly one inner processor.
//!
//! # Purpose
//! Blends the inner processor's output with the untouched input:
//! `out = dry * (1 - strength) + wet * strength`. A pre-gain is applied to the
//! inner processor's input only.
//!
//! # Design Notes
//! - Gains live in a [`MixControl`] shared by `Arc`. The control thread writes,
//!   the render side reads on the next block. No locks, no ramps.
//! - The inner processor compensates its own latency, so dry and wet samples
//!   pair up in FIFO order.
//! - The mixer owns the inner processor and tears it down before its own nodes.

use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;

use crate::dsp::utils::BYPASS_AMOUNT_EPS;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{DestinationNode, SourceNode, Track, TrackWriter};
use crate::meters::AtomicF32;
use crate::processor::{
    LifecycleEvent, Processor, ProcessorEvent, ProcessorOptions, ProcessorState, ProcessorStats,
};

// =============================================================================
// Live gain parameters
// =============================================================================

#[derive(Debug)]
struct MixParams {
    strength: AtomicF32,
    pre_gain: AtomicF32,
}

/// Handle to the mixer's live gains. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MixControl {
    params: Arc<MixParams>,
}

impl Default for MixControl {
    fn default() -> Self {
        Self {
            params: Arc::new(MixParams {
                strength: AtomicF32::new(1.0),
                pre_gain: AtomicF32::new(1.0),
            }),
        }
    }
}

impl MixControl {
    /// Clamped to `[0, 1]`. NaN counts as 0.
    pub fn set_strength(&self, strength: f32) {
        let s = if strength.is_nan() {
            0.0
        } else {
            strength.clamp(0.0, 1.0)
        };
        self.params.strength.store(s);
    }

    pub fn strength(&self) -> f32 {
        self.params.strength.load()
    }

    /// Clamped to `>= 0`. NaN counts as 1.
    pub fn set_pre_gain(&self, gain: f32) {
        let g = if gain.is_nan() { 1.0 } else { gain.max(0.0) };
        self.params.pre_gain.store(g);
    }

    pub fn pre_gain(&self) -> f32 {
        self.params.pre_gain.load()
    }

    pub fn dry_gain(&self) -> f32 {
        1.0 - self.strength()
    }

    pub fn wet_gain(&self) -> f32 {
        self.strength()
    }
}

// =============================================================================
// Mixer
// =============================================================================

pub struct DryWetMixer {
    inner: Box<dyn Processor>,
    name: String,
    control: MixControl,
    state: ProcessorState,
    source: Option<SourceNode>,
    inner_input: Option<TrackWriter>,
    inner_output: Option<Track>,
    dry: VecDeque<f32>,
    destination: Option<DestinationNode>,
    events: Vec<ProcessorEvent>,
}

impl DryWetMixer {
    pub fn new(inner: Box<dyn Processor>) -> Self {
        let name = format!("mix({})", inner.name());
        Self {
            inner,
            name,
            control: MixControl::default(),
            state: ProcessorState::Uninitialized,
            source: None,
            inner_input: None,
            inner_output: None,
            dry: VecDeque::new(),
            destination: None,
            events: Vec::new(),
        }
    }

    pub fn control(&self) -> MixControl {
        self.control.clone()
    }

    pub fn set_strength(&self, strength: f32) {
        self.control.set_strength(strength);
    }

    pub fn set_pre_gain(&self, gain: f32) {
        self.control.set_pre_gain(gain);
    }

    /// The wrapped processor.
    pub fn inner(&self) -> &dyn Processor {
        self.inner.as_ref()
    }

    pub fn inner_mut(&mut self) -> &mut dyn Processor {
        self.inner.as_mut()
    }

    fn transition(&mut self, event: LifecycleEvent) {
        let from = self.state;
        self.state = from.on_event(event);
        if from != self.state {
            self.events.push(ProcessorEvent::StateChanged {
                from,
                to: self.state,
            });
        }
    }

    /// Move buffered input to the dry FIFO and the inner processor.
    fn feed(&mut self) {
        let input = self.source.as_mut().map(SourceNode::pull).unwrap_or_default();
        if input.is_empty() {
            return;
        }
        self.dry.extend(input.iter().copied());
        let pre_gain = self.control.pre_gain();
        if let Some(w) = self.inner_input.as_mut() {
            if pre_gain == 1.0 {
                w.write(&input);
            } else {
                let scaled: Vec<f32> = input.iter().map(|x| x * pre_gain).collect();
                w.write(&scaled);
            }
        }
    }

    /// Pair available wet output with dry input and publish the blend.
    fn mix(&mut self) -> usize {
        let wet = self
            .inner_output
            .as_ref()
            .map(Track::drain)
            .unwrap_or_default();
        if wet.is_empty() {
            return 0;
        }
        let strength = self.control.strength();
        let mut out = Vec::with_capacity(wet.len());
        for w in wet {
            let d = self.dry.pop_front().unwrap_or(0.0);
            out.push(if strength <= BYPASS_AMOUNT_EPS {
                d
            } else if strength >= 1.0 - BYPASS_AMOUNT_EPS {
                w
            } else {
                d * (1.0 - strength) + w * strength
            });
        }
        self.destination.as_mut().map_or(0, |dst| dst.write(&out))
    }
}

impl Processor for DryWetMixer {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn initialize(&mut self, options: &ProcessorOptions) -> PipelineResult<()> {
        if self.state.is_active() {
            self.destroy();
        }
        self.transition(LifecycleEvent::LoadRequested);

        let (inner_input, inner_track) = options.context.track();
        if let Err(e) = self.inner.initialize(&ProcessorOptions {
            track: inner_track,
            context: options.context,
        }) {
            self.transition(LifecycleEvent::LoadFailed);
            return Err(e);
        }
        let Some(inner_output) = self.inner.processed_track() else {
            self.inner.destroy();
            self.transition(LifecycleEvent::LoadFailed);
            return Err(PipelineError::NotActive(self.inner.name().to_string()));
        };

        self.source = Some(SourceNode::connect(options.track.clone()));
        self.inner_input = Some(inner_input);
        self.inner_output = Some(inner_output);
        self.dry.clear();
        let (writer, _) = options.context.track();
        self.destination = Some(DestinationNode::new(writer));
        self.transition(LifecycleEvent::Ready);
        debug!(
            "mixer around '{}' active (strength {:.2}, pre-gain {:.2})",
            self.inner.name(),
            self.control.strength(),
            self.control.pre_gain()
        );
        Ok(())
    }

    fn render(&mut self) -> PipelineResult<usize> {
        if !self.state.is_active() {
            return Err(PipelineError::NotActive(self.name.clone()));
        }
        self.feed();
        self.inner.render()?;
        Ok(self.mix())
    }

    fn finish(&mut self) -> PipelineResult<usize> {
        if !self.state.is_active() {
            return Err(PipelineError::NotActive(self.name.clone()));
        }
        self.feed();
        if let Some(mut w) = self.inner_input.take() {
            w.close();
        }
        self.inner.finish()?;
        let mut written = self.mix();
        // Anything the inner processor did not return goes out dry.
        if !self.dry.is_empty() {
            let rest: Vec<f32> = self.dry.drain(..).collect();
            written += self.destination.as_mut().map_or(0, |d| d.write(&rest));
        }
        Ok(written)
    }

    fn processed_track(&self) -> Option<Track> {
        self.destination.as_ref().map(DestinationNode::track)
    }

    fn destroy(&mut self) {
        self.inner.destroy();
        if let Some(mut s) = self.source.take() {
            s.disconnect();
        }
        if let Some(mut w) = self.inner_input.take() {
            w.close();
        }
        self.inner_output = None;
        self.dry.clear();
        if let Some(mut d) = self.destination.take() {
            d.disconnect();
        }
        self.transition(LifecycleEvent::Disposed);
    }

    fn stats(&self) -> ProcessorStats {
        self.inner.stats()
    }

    fn drain_events(&mut self) -> Vec<ProcessorEvent> {
        let mut events = std::mem::take(&mut self.events);
        events.extend(self.inner.drain_events());
        events
    }
}
