//! Backend processor: source -> [resample in] -> backend node ->
//! [resample out] -> destination.
//!
//! # Purpose
//! Runs one [`DenoiseEngine`] inside a processor graph. The engine sees fixed
//! frames at its native rate; the rest of the graph sees a continuous stream
//! at the context rate.
//!
//! # Design Notes
//! - [`BackendNode`] frames the stream, removes the engine latency so output
//!   sample `k` lines up with input sample `k`, and copies a final partial
//!   frame through verbatim at `finish`.
//! - A frame that fails in the engine is replaced by the latency-aligned dry
//!   input, reported as a [`ProcessorEvent::FrameFault`] and logged.
//! - Teardown order is fixed: source, backend node, destination, then the
//!   engine is closed (once) and every reference dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::backend::{BackendKind, BackendLoader, DenoiseEngine};
use crate::dsp::resample::StreamResampler;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{DestinationNode, SourceNode, Track};
use crate::processor::{
    LifecycleEvent, Processor, ProcessorEvent, ProcessorOptions, ProcessorState, ProcessorStats,
};

// =============================================================================
// Backend node
// =============================================================================

/// Fixed-frame driver around an engine.
pub struct BackendNode {
    engine: Box<dyn DenoiseEngine>,
    frame_len: usize,
    pending: Vec<f32>,
    in_frame: Vec<f32>,
    out_frame: Vec<f32>,
    /// Dry input delayed by the engine latency; substitutes faulted frames.
    dry_delay: VecDeque<f32>,
    latency_left: usize,
    /// Input samples that went into full frames.
    framed: u64,
    emitted: u64,
    frames_processed: u64,
    faults: Vec<ProcessorEvent>,
}

impl BackendNode {
    pub fn new(engine: Box<dyn DenoiseEngine>) -> Self {
        let frame_len = engine.frame_len().max(1);
        let latency = engine.latency();
        Self {
            engine,
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
            in_frame: vec![0.0; frame_len],
            out_frame: vec![0.0; frame_len],
            dry_delay: std::iter::repeat(0.0).take(latency).collect(),
            latency_left: latency,
            framed: 0,
            emitted: 0,
            frames_processed: 0,
            faults: Vec::new(),
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Feed samples, returning latency-compensated output for complete frames.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(input);
        let mut out = Vec::with_capacity(self.pending.len());
        let mut offset = 0;
        while self.pending.len() - offset >= self.frame_len {
            let end = offset + self.frame_len;
            self.in_frame.copy_from_slice(&self.pending[offset..end]);
            self.run_frame(&mut out);
            self.framed += self.frame_len as u64;
            offset = end;
        }
        self.pending.drain(..offset);
        out
    }

    /// Flush the engine with silence until every framed sample has been
    /// emitted, then append the unframed tail unchanged.
    pub fn finish(&mut self) -> Vec<f32> {
        let mut out = Vec::new();
        let outstanding = self.framed.saturating_sub(self.emitted) as usize;
        let mut guard = outstanding / self.frame_len + 2;
        while self.emitted < self.framed && guard > 0 {
            self.in_frame.fill(0.0);
            self.run_frame(&mut out);
            guard -= 1;
        }
        let over = (self.emitted - self.framed.min(self.emitted)) as usize;
        out.truncate(out.len().saturating_sub(over));
        self.emitted -= over as u64;

        out.extend_from_slice(&self.pending);
        self.emitted += self.pending.len() as u64;
        self.framed += self.pending.len() as u64;
        self.pending.clear();
        out
    }

    fn run_frame(&mut self, out: &mut Vec<f32>) {
        self.dry_delay.extend(self.in_frame.iter().copied());
        let index = self.frames_processed;

        match self.engine.process_frame(&self.in_frame, &mut self.out_frame) {
            Ok(()) => {
                self.dry_delay.drain(..self.frame_len);
            }
            Err(e) => {
                if self.faults.is_empty() {
                    warn!(
                        "backend '{}' failed on frame {}: {}; passing frame through",
                        self.engine.name(),
                        index,
                        e
                    );
                } else {
                    debug!("backend '{}' failed on frame {}: {}", self.engine.name(), index, e);
                }
                for (o, d) in self.out_frame.iter_mut().zip(self.dry_delay.drain(..self.frame_len)) {
                    *o = d;
                }
                self.faults.push(ProcessorEvent::FrameFault {
                    backend: self.engine.name().to_string(),
                    frame_index: index,
                    reason: e.to_string(),
                });
            }
        }
        self.frames_processed += 1;

        let skip = self.latency_left.min(self.frame_len);
        self.latency_left -= skip;
        out.extend_from_slice(&self.out_frame[skip..]);
        self.emitted += (self.frame_len - skip) as u64;
    }

    pub fn take_faults(&mut self) -> Vec<ProcessorEvent> {
        std::mem::take(&mut self.faults)
    }

    /// Detach the engine from the node.
    pub fn into_engine(self) -> Box<dyn DenoiseEngine> {
        self.engine
    }
}

// =============================================================================
// Processor
// =============================================================================

pub struct BackendProcessor {
    kind: BackendKind,
    name: String,
    loader: Arc<dyn BackendLoader>,
    state: ProcessorState,
    source: Option<SourceNode>,
    resample_in: Option<StreamResampler>,
    node: Option<BackendNode>,
    resample_out: Option<StreamResampler>,
    destination: Option<DestinationNode>,
    events: Vec<ProcessorEvent>,
    stats: ProcessorStats,
}

impl BackendProcessor {
    pub fn new(kind: BackendKind, loader: Arc<dyn BackendLoader>) -> Self {
        Self {
            kind,
            name: kind.name().to_string(),
            loader,
            state: ProcessorState::Uninitialized,
            source: None,
            resample_in: None,
            node: None,
            resample_out: None,
            destination: None,
            events: Vec::new(),
            stats: ProcessorStats::default(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
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

    fn load(&mut self, options: &ProcessorOptions) -> PipelineResult<()> {
        let engine = self
            .loader
            .load(self.kind)
            .map_err(|e| e.into_pipeline_error(self.kind))?;

        let rate = options.context.sample_rate();
        let native = engine.native_rate();
        let resamplers = if native != rate {
            StreamResampler::new(rate, native)
                .and_then(|down| Ok((down, StreamResampler::new(native, rate)?)))
                .map(|(d, u)| (Some(d), Some(u)))
        } else {
            Ok((None, None))
        };
        let (resample_in, resample_out) = match resamplers {
            Ok(pair) => pair,
            Err(e) => {
                let mut engine = engine;
                engine.close();
                return Err(PipelineError::BackendUnavailable {
                    backend: self.name.clone(),
                    reason: e.to_string(),
                });
            }
        };
        if resample_in.is_some() {
            debug!("'{}' resamples {} <-> {} Hz", self.name, rate, native);
        }

        self.source = Some(SourceNode::connect(options.track.clone()));
        self.resample_in = resample_in;
        self.node = Some(BackendNode::new(engine));
        self.resample_out = resample_out;
        let (writer, _) = options.context.track();
        self.destination = Some(DestinationNode::new(writer));
        self.stats = ProcessorStats::default();
        Ok(())
    }

    fn publish(&mut self, processed: Vec<f32>, resample_flush: bool) -> PipelineResult<usize> {
        let mut out = match self.resample_out.as_mut() {
            Some(r) => r.push(&processed)?,
            None => processed,
        };
        if resample_flush {
            if let Some(r) = self.resample_out.as_mut() {
                out.extend(r.flush()?);
            }
        }
        if let Some(node) = self.node.as_mut() {
            let faults = node.take_faults();
            self.stats.frame_faults += faults.len() as u64;
            self.stats.frames_processed = node.frames_processed();
            self.events.extend(faults);
        }
        self.stats.samples_out += out.len() as u64;
        Ok(self
            .destination
            .as_mut()
            .map_or(0, |d| d.write(&out)))
    }
}

impl Processor for BackendProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn initialize(&mut self, options: &ProcessorOptions) -> PipelineResult<()> {
        if self.state.is_active() {
            debug!("'{}' re-initialized while active", self.name);
            self.destroy();
        }
        self.transition(LifecycleEvent::LoadRequested);
        match self.load(options) {
            Ok(()) => {
                self.transition(LifecycleEvent::Ready);
                info!("backend processor '{}' active", self.name);
                Ok(())
            }
            Err(e) => {
                warn!("backend processor '{}' failed to load: {}", self.name, e);
                self.transition(LifecycleEvent::LoadFailed);
                Err(e)
            }
        }
    }

    fn render(&mut self) -> PipelineResult<usize> {
        if !self.state.is_active() {
            return Err(PipelineError::NotActive(self.name.clone()));
        }
        let input = self.source.as_mut().map(SourceNode::pull).unwrap_or_default();
        if input.is_empty() {
            return Ok(0);
        }
        self.stats.samples_in += input.len() as u64;
        let native = match self.resample_in.as_mut() {
            Some(r) => r.push(&input)?,
            None => input,
        };
        let processed = match self.node.as_mut() {
            Some(n) => n.process(&native),
            None => Vec::new(),
        };
        self.publish(processed, false)
    }

    fn finish(&mut self) -> PipelineResult<usize> {
        let mut written = self.render()?;
        let native_tail = match self.resample_in.as_mut() {
            Some(r) => r.flush()?,
            None => Vec::new(),
        };
        let processed = match self.node.as_mut() {
            Some(n) => {
                let mut p = n.process(&native_tail);
                p.extend(n.finish());
                p
            }
            None => Vec::new(),
        };
        written += self.publish(processed, true)?;
        Ok(written)
    }

    fn processed_track(&self) -> Option<Track> {
        self.destination.as_ref().map(DestinationNode::track)
    }

    fn destroy(&mut self) {
        if matches!(
            self.state,
            ProcessorState::Destroyed | ProcessorState::Uninitialized
        ) && self.node.is_none()
        {
            self.state = self.state.on_event(LifecycleEvent::Disposed);
            return;
        }
        if let Some(mut s) = self.source.take() {
            s.disconnect();
        }
        let engine = self.node.take().map(BackendNode::into_engine);
        if let Some(mut d) = self.destination.take() {
            d.disconnect();
        }
        if let Some(mut engine) = engine {
            if !engine.is_closed() {
                engine.close();
            }
        }
        self.resample_in = None;
        self.resample_out = None;
        self.transition(LifecycleEvent::Disposed);
        debug!("backend processor '{}' destroyed", self.name);
    }

    fn stats(&self) -> ProcessorStats {
        self.stats
    }

    fn drain_events(&mut self) -> Vec<ProcessorEvent> {
        std::mem::take(&mut self.events)
    }
}
