//! Vendor SDK backend.
//!
//! A third-party suppressor is integrated by implementing [`VendorSdk`] and
//! registering it with the loader. The SDK hands out sessions; each engine
//! owns one session and closes it exactly once.

use std::sync::Arc;

use log::{info, warn};

use crate::backend::{DenoiseEngine, FrameError, LoadError};

/// Entry point of an installed vendor SDK.
pub trait VendorSdk: Send + Sync {
    fn name(&self) -> &str;
    fn sample_rate(&self) -> u32;
    fn frame_len(&self) -> usize;
    fn latency(&self) -> usize {
        0
    }
    fn create_session(&self) -> Result<Box<dyn VendorSession>, String>;
}

/// One running SDK instance.
pub trait VendorSession: Send {
    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), String>;
    fn reset(&mut self) {}
    fn close(&mut self);
}

pub struct VendorEngine {
    sdk: Arc<dyn VendorSdk>,
    session: Option<Box<dyn VendorSession>>,
}

impl VendorEngine {
    pub fn create(sdk: Arc<dyn VendorSdk>) -> Result<Self, LoadError> {
        if sdk.sample_rate() == 0 || sdk.frame_len() == 0 {
            return Err(LoadError::CreationFailed(format!(
                "vendor SDK '{}' reports an invalid format",
                sdk.name()
            )));
        }
        let session = sdk.create_session().map_err(LoadError::CreationFailed)?;
        info!("vendor SDK '{}' session created", sdk.name());
        Ok(Self {
            sdk,
            session: Some(session),
        })
    }
}

impl DenoiseEngine for VendorEngine {
    fn name(&self) -> &str {
        self.sdk.name()
    }

    fn native_rate(&self) -> u32 {
        self.sdk.sample_rate()
    }

    fn frame_len(&self) -> usize {
        self.sdk.frame_len()
    }

    fn latency(&self) -> usize {
        self.sdk.latency()
    }

    fn process_frame(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), FrameError> {
        match self.session.as_mut() {
            Some(s) => s.process(input, output).map_err(FrameError),
            None => Err(FrameError("vendor session is closed".into())),
        }
    }

    fn reset(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.reset();
        }
    }

    fn close(&mut self) {
        match self.session.take() {
            Some(mut s) => s.close(),
            None => warn!("vendor session '{}' closed twice", self.sdk.name()),
        }
    }

    fn is_closed(&self) -> bool {
        self.session.is_none()
    }
}
