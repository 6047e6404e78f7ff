//! Identity processor. Used when no backend is selected and as the fallback
//! whenever a backend cannot be loaded.

use crate::error::{PipelineError, PipelineResult};
use crate::graph::{DestinationNode, SourceNode, Track};
use crate::processor::{LifecycleEvent, Processor, ProcessorOptions, ProcessorState, ProcessorStats};

pub struct PassThroughProcessor {
    state: ProcessorState,
    source: Option<SourceNode>,
    destination: Option<DestinationNode>,
    samples: u64,
}

impl PassThroughProcessor {
    pub fn new() -> Self {
        Self {
            state: ProcessorState::Uninitialized,
            source: None,
            destination: None,
            samples: 0,
        }
    }
}

impl Default for PassThroughProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PassThroughProcessor {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn initialize(&mut self, options: &ProcessorOptions) -> PipelineResult<()> {
        if self.state.is_active() {
            self.destroy();
        }
        self.state = self.state.on_event(LifecycleEvent::LoadRequested);
        self.source = Some(SourceNode::connect(options.track.clone()));
        let (writer, _) = options.context.track();
        self.destination = Some(DestinationNode::new(writer));
        self.samples = 0;
        self.state = self.state.on_event(LifecycleEvent::Ready);
        Ok(())
    }

    fn render(&mut self) -> PipelineResult<usize> {
        let (Some(src), Some(dst)) = (self.source.as_mut(), self.destination.as_mut()) else {
            return Err(PipelineError::NotActive("passthrough".into()));
        };
        let input = src.pull();
        self.samples += input.len() as u64;
        Ok(dst.write(&input))
    }

    fn finish(&mut self) -> PipelineResult<usize> {
        self.render()
    }

    fn processed_track(&self) -> Option<Track> {
        self.destination.as_ref().map(DestinationNode::track)
    }

    fn destroy(&mut self) {
        if let Some(mut s) = self.source.take() {
            s.disconnect();
        }
        if let Some(mut d) = self.destination.take() {
            d.disconnect();
        }
        self.state = self.state.on_event(LifecycleEvent::Disposed);
    }

    fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            samples_in: self.samples,
            samples_out: self.samples,
            ..ProcessorStats::default()
        }
    }
}
