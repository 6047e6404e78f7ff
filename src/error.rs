//! Error types for the suppression pipeline and the offline harness

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The backend module failed to load or its engine could not be created.
    /// Recoverable by falling back to pass-through audio.
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// Too little audio arrived during a capture window. The take must be redone.
    #[error("insufficient capture: {captured_secs:.2}s recorded, at least {required_secs:.2}s required")]
    InsufficientCapture {
        captured_secs: f32,
        required_secs: f32,
    },

    /// A single frame failed inside a backend. Normally recovered in place and
    /// reported as an event; surfaced only by callers that opt into it.
    #[error("frame {frame_index} failed in backend '{backend}': {reason}")]
    FrameProcessingFault {
        backend: String,
        frame_index: u64,
        reason: String,
    },

    #[error("device access denied: {0}")]
    DeviceAccessDenied(String),

    #[error("capture device error: {0}")]
    Device(String),

    #[error("sample rate conversion failed: {0}")]
    Resample(String),

    #[error("invalid audio buffer: {0}")]
    InvalidBuffer(String),

    /// An offline render returned more than a frame less than its input.
    #[error("'{processor}' rendered {produced} of {expected} samples")]
    ShortRender {
        processor: String,
        produced: usize,
        expected: usize,
    },

    #[error("processor '{0}' is not active")]
    NotActive(String),

    #[error("export failed: {0}")]
    Export(#[from] hound::Error),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// True for failures the pipeline answers with pass-through audio.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, PipelineError::BackendUnavailable { .. })
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
