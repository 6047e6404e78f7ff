//! Processor lifecycle contract.
//!
//! # Purpose
//! Every stage that turns an input track into a processed track implements
//! [`Processor`]: pass-through, each backend, and the dry/wet mixer that wraps
//! one of them.
//!
//! # Design Notes
//! - Lifecycle is an explicit state machine (`Uninitialized -> Loading ->
//!   Active -> Destroyed`) fed by [`LifecycleEvent`]s. Backend readiness and
//!   disposal are events, not flags.
//! - `destroy` is infallible and idempotent. `restart` is `destroy` then
//!   `initialize`, in that order. Restarts are serialized by `&mut self`.
//! - `render` consumes whatever input is buffered. `finish` is called once
//!   the input has ended and flushes every internal delay.

pub mod backend_processor;
pub mod mixer;
pub mod passthrough;

pub use backend_processor::{BackendNode, BackendProcessor};
pub use mixer::{DryWetMixer, MixControl};
pub use passthrough::PassThroughProcessor;

use std::ops::AddAssign;
use std::sync::Arc;

use log::debug;

use crate::backend::{BackendKind, BackendLoader};
use crate::buffer::AudioBuffer;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{AudioContext, Track};

/// Extra ring space for offline renders beyond the take length.
const OFFLINE_HEADROOM: usize = 8192;
/// Samples an offline render may come up short before it is an error: one
/// frame of the longest backend (512 at 16 kHz) seen from a 48 kHz session.
const MAX_OFFLINE_SHORTFALL: usize = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Uninitialized,
    Loading,
    Active,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    LoadRequested,
    Ready,
    LoadFailed,
    Disposed,
}

impl ProcessorState {
    /// Next state for `event`. Events that make no sense in the current
    /// state leave it unchanged.
    pub fn on_event(self, event: LifecycleEvent) -> ProcessorState {
        use LifecycleEvent::*;
        use ProcessorState::*;
        match (self, event) {
            (_, Disposed) => Destroyed,
            (Uninitialized | Destroyed, LoadRequested) => Loading,
            (Loading, Ready) => Active,
            (Loading, LoadFailed) => Uninitialized,
            (state, _) => state,
        }
    }

    pub fn is_active(self) -> bool {
        self == ProcessorState::Active
    }
}

/// Where a processor reads from and which graph it belongs to.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub track: Track,
    pub context: AudioContext,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub frames_processed: u64,
    pub frame_faults: u64,
    pub samples_in: u64,
    pub samples_out: u64,
}

impl AddAssign for ProcessorStats {
    fn add_assign(&mut self, other: Self) {
        self.frames_processed += other.frames_processed;
        self.frame_faults += other.frame_faults;
        self.samples_in += other.samples_in;
        self.samples_out += other.samples_out;
    }
}

/// Something a processor noticed while rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    /// A frame failed inside the engine and was passed through unmodified.
    FrameFault {
        backend: String,
        frame_index: u64,
        reason: String,
    },
    StateChanged {
        from: ProcessorState,
        to: ProcessorState,
    },
}

impl ProcessorEvent {
    /// The matching error, for callers that want frame faults surfaced.
    pub fn as_error(&self) -> Option<PipelineError> {
        match self {
            ProcessorEvent::FrameFault {
                backend,
                frame_index,
                reason,
            } => Some(PipelineError::FrameProcessingFault {
                backend: backend.clone(),
                frame_index: *frame_index,
                reason: reason.clone(),
            }),
            ProcessorEvent::StateChanged { .. } => None,
        }
    }
}

pub trait Processor: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ProcessorState;

    /// Wire the processor's nodes and acquire its backend.
    fn initialize(&mut self, options: &ProcessorOptions) -> PipelineResult<()>;

    /// Process all buffered input. Returns the number of samples published.
    fn render(&mut self) -> PipelineResult<usize>;

    /// Input has ended: flush delays and publish the remainder.
    fn finish(&mut self) -> PipelineResult<usize>;

    /// Live output, `None` unless active.
    fn processed_track(&self) -> Option<Track>;

    /// Release every node and the backend. Safe to call repeatedly and before
    /// `initialize`.
    fn destroy(&mut self);

    fn restart(&mut self, options: &ProcessorOptions) -> PipelineResult<()> {
        self.destroy();
        self.initialize(options)
    }

    fn stats(&self) -> ProcessorStats {
        ProcessorStats::default()
    }

    fn drain_events(&mut self) -> Vec<ProcessorEvent> {
        Vec::new()
    }
}

/// Build the processor for `kind`. Anything other than pass-through is
/// wrapped in a dry/wet mixer; its control handle is returned alongside.
pub fn build_processor(
    kind: BackendKind,
    loader: Arc<dyn BackendLoader>,
    strength: f32,
    pre_gain: f32,
) -> (Box<dyn Processor>, Option<MixControl>) {
    if kind.is_passthrough() {
        return (Box::new(PassThroughProcessor::new()), None);
    }
    let inner = Box::new(BackendProcessor::new(kind, loader));
    let mixer = DryWetMixer::new(inner);
    let control = mixer.control();
    control.set_strength(strength);
    control.set_pre_gain(pre_gain);
    (Box::new(mixer), Some(control))
}

/// Result of [`render_offline`].
#[derive(Debug, Clone)]
pub struct OfflineRender {
    pub buffer: AudioBuffer,
    /// Summed over every channel.
    pub stats: ProcessorStats,
}

/// Run every channel of `buffer` through `processor` without an output device.
///
/// Each channel gets a fresh graph (via `restart`). The result has exactly
/// the input's length and rate. A channel that comes back short is completed
/// with the matching input samples; more than one backend frame missing is an
/// error. The processor is destroyed afterwards.
pub fn render_offline(
    processor: &mut dyn Processor,
    buffer: &AudioBuffer,
) -> PipelineResult<OfflineRender> {
    let frames = buffer.frame_count();
    let context = AudioContext::offline(buffer.sample_rate(), frames + OFFLINE_HEADROOM);
    let mut channels = Vec::with_capacity(buffer.channel_count());
    let mut stats = ProcessorStats::default();

    let result = (|| {
        for ch in buffer.channels() {
            let (mut writer, track) = context.track();
            writer.write(ch);
            writer.close();

            processor.restart(&ProcessorOptions {
                track,
                context,
            })?;
            let output = processor
                .processed_track()
                .ok_or_else(|| PipelineError::NotActive(processor.name().to_string()))?;

            processor.render()?;
            processor.finish()?;
            stats += processor.stats();
            let mut out = output.drain();
            if out.len() < frames {
                let missing = frames - out.len();
                if missing > MAX_OFFLINE_SHORTFALL {
                    return Err(PipelineError::ShortRender {
                        processor: processor.name().to_string(),
                        produced: out.len(),
                        expected: frames,
                    });
                }
                debug!(
                    "offline render of '{}' was {} samples short; passing input through",
                    processor.name(),
                    missing
                );
                out.extend_from_slice(&ch[out.len()..]);
            } else if out.len() > frames {
                debug!(
                    "offline render of '{}' produced {} extra samples",
                    processor.name(),
                    out.len() - frames
                );
                out.truncate(frames);
            }
            channels.push(out);
        }
        Ok::<(), PipelineError>(())
    })();

    processor.destroy();
    result?;
    Ok(OfflineRender {
        buffer: AudioBuffer::new(buffer.sample_rate(), channels)?,
        stats,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::graph::{DestinationNode, SourceNode};
    use std::sync::Mutex;

    /// Records lifecycle calls into a shared log and copies input to output.
    pub struct RecordingProcessor {
        pub log: Arc<Mutex<Vec<&'static str>>>,
        state: ProcessorState,
        source: Option<SourceNode>,
        destination: Option<DestinationNode>,
        /// Multiplies every sample.
        pub gain: f32,
        /// Samples dropped from the end of each render.
        pub drop_tail: usize,
        samples: u64,
    }

    impl RecordingProcessor {
        pub fn new(log: Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                log,
                state: ProcessorState::Uninitialized,
                source: None,
                destination: None,
                gain: 1.0,
                drop_tail: 0,
                samples: 0,
            }
        }

        fn record(&self, what: &'static str) {
            self.log.lock().unwrap().push(what);
        }
    }

    impl Processor for RecordingProcessor {
        fn name(&self) -> &str {
            "recording"
        }

        fn state(&self) -> ProcessorState {
            self.state
        }

        fn initialize(&mut self, options: &ProcessorOptions) -> PipelineResult<()> {
            self.record("initialize");
            self.state = self.state.on_event(LifecycleEvent::LoadRequested);
            self.source = Some(SourceNode::connect(options.track.clone()));
            self.destination = Some(DestinationNode::new(options.context.track().0));
            self.samples = 0;
            self.state = self.state.on_event(LifecycleEvent::Ready);
            Ok(())
        }

        fn render(&mut self) -> PipelineResult<usize> {
            let (Some(src), Some(dst)) = (self.source.as_mut(), self.destination.as_mut()) else {
                return Err(PipelineError::NotActive("recording".into()));
            };
            let input: Vec<f32> = src.pull().iter().map(|x| x * self.gain).collect();
            self.samples += input.len() as u64;
            let keep = input.len().saturating_sub(self.drop_tail);
            Ok(dst.write(&input[..keep]))
        }

        fn finish(&mut self) -> PipelineResult<usize> {
            self.render()
        }

        fn processed_track(&self) -> Option<Track> {
            self.destination.as_ref().map(DestinationNode::track)
        }

        fn stats(&self) -> ProcessorStats {
            ProcessorStats {
                samples_in: self.samples,
                ..ProcessorStats::default()
            }
        }

        fn destroy(&mut self) {
            self.record("destroy");
            self.source = None;
            if let Some(d) = self.destination.as_mut() {
                d.disconnect();
            }
            self.destination = None;
            self.state = self.state.on_event(LifecycleEvent::Disposed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingProcessor;
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_state_machine_transitions() {
        use LifecycleEvent::*;
        let s = ProcessorState::Uninitialized;
        assert_eq!(s.on_event(Ready), ProcessorState::Uninitialized);
        let s = s.on_event(LoadRequested);
        assert_eq!(s, ProcessorState::Loading);
        assert_eq!(s.on_event(LoadFailed), ProcessorState::Uninitialized);
        let s = s.on_event(Ready);
        assert!(s.is_active());
        let s = s.on_event(Disposed);
        assert_eq!(s, ProcessorState::Destroyed);
        assert_eq!(s.on_event(LoadRequested), ProcessorState::Loading);
    }

    #[test]
    fn test_restart_destroys_before_initialize() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = RecordingProcessor::new(log.clone());
        let ctx = AudioContext::realtime(48000);
        let (_w, track) = ctx.track();
        let opts = ProcessorOptions {
            track,
            context: ctx,
        };

        p.restart(&opts).unwrap();
        p.restart(&opts).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["destroy", "initialize", "destroy", "initialize"]
        );
        assert!(p.state().is_active());
    }

    #[test]
    fn test_render_offline_keeps_length_and_channels() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = RecordingProcessor::new(log);
        p.gain = 0.5;
        let buf = AudioBuffer::new(48000, vec![vec![1.0; 1000], vec![0.5; 1000]]).unwrap();
        let out = render_offline(&mut p, &buf).unwrap().buffer;
        assert_eq!(out.channel_count(), 2);
        assert_eq!(out.frame_count(), 1000);
        assert_eq!(out.channel(0)[10], 0.5);
        assert_eq!(out.channel(1)[999], 0.25);
        assert_eq!(p.state(), ProcessorState::Destroyed);
    }

    #[test]
    fn test_short_render_is_completed_from_input() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = RecordingProcessor::new(log);
        p.gain = 0.5;
        p.drop_tail = 100;
        let x: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let out = render_offline(&mut p, &AudioBuffer::mono(48000, x.clone()))
            .unwrap()
            .buffer;
        assert_eq!(out.frame_count(), 1000);
        assert_eq!(out.channel(0)[899], x[899] * 0.5);
        // Missing samples are the dry input, not silence.
        assert_eq!(&out.channel(0)[900..], &x[900..]);
    }

    #[test]
    fn test_render_missing_more_than_a_frame_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = RecordingProcessor::new(log);
        p.drop_tail = MAX_OFFLINE_SHORTFALL + 1;
        let err = render_offline(&mut p, &AudioBuffer::mono(48000, vec![0.1; 4000])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ShortRender {
                produced: 2463,
                expected: 4000,
                ..
            }
        ));
        assert_eq!(p.state(), ProcessorState::Destroyed);
    }

    #[test]
    fn test_offline_stats_cover_every_channel() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut p = RecordingProcessor::new(log);
        let buf = AudioBuffer::new(48000, vec![vec![0.0; 1000], vec![0.0; 1000]]).unwrap();
        let render = render_offline(&mut p, &buf).unwrap();
        assert_eq!(render.stats.samples_in, 2000);
    }

    #[test]
    fn test_frame_fault_event_maps_to_error() {
        let ev = ProcessorEvent::FrameFault {
            backend: "dtln".into(),
            frame_index: 7,
            reason: "nan".into(),
        };
        assert!(matches!(
            ev.as_error(),
            Some(PipelineError::FrameProcessingFault { frame_index: 7, .. })
        ));
    }
}
