//! Voice noise-suppression pipeline.
//!
//! A microphone track runs through one of several interchangeable denoising
//! backends, optionally blended with the dry signal, and comes out on an
//! output track that stays stable across backend changes. The [`harness`]
//! module captures raw takes and compares them against processed ones offline.
//!
//! Signal flow:
//!
//! ```text
//! source -> [resample in] -> backend -> [resample out] -> mixer -> destination
//! ```
//!
//! The voice gate and every analysis primitive run on whole buffers in the
//! harness, never on the render path.

pub mod backend;
pub mod buffer;
pub mod dsp;
pub mod error;
pub mod graph;
pub mod harness;
pub mod meters;
pub mod pipeline;
pub mod presets;
pub mod processor;
pub mod settings;

pub use backend::{BackendKind, BackendLoader, BuiltinLoader, DenoiseEngine};
pub use buffer::AudioBuffer;
pub use error::{PipelineError, PipelineResult};
pub use graph::{AudioContext, Track, TrackWriter};
pub use harness::{HarnessConfig, TestHarness};
pub use meters::LevelMeters;
pub use pipeline::LivePipeline;
pub use presets::{PresetLibrary, SettingsPreset};
pub use processor::{build_processor, render_offline, DryWetMixer, MixControl, Processor};
pub use settings::{BackendChoice, EffectSettings};
