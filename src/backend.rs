//! Backend selection and the engine contract.
//!
//! Every denoising algorithm family sits behind [`DenoiseEngine`], a
//! frame-in/frame-out compute context with a fixed native rate. Which family
//! is used is a [`BackendKind`]; how it is obtained is a [`BackendLoader`], so
//! tests can substitute fakes for the built-in engines.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsp::deep_filter::DeepFilterEngine;
use crate::dsp::dtln_denoiser::DtlnEngine;
use crate::dsp::rnn_denoiser::RnnEngine;
use crate::dsp::spectral_denoiser::SpectralEngine;
use crate::dsp::vendor::{VendorEngine, VendorSdk};
use crate::error::PipelineError;

/// Denoising algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackendKind {
    PassThrough,
    SpectralStatistical,
    RecurrentNetwork,
    /// Attenuation limit in dB, `0..=100`. 0 means no reduction.
    DeepFiltering { attenuation_db: f32 },
    DualSignalTransform,
    VendorSdk,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::PassThrough => "passthrough",
            BackendKind::SpectralStatistical => "spectral",
            BackendKind::RecurrentNetwork => "rnnoise",
            BackendKind::DeepFiltering { .. } => "deep-filter",
            BackendKind::DualSignalTransform => "dtln",
            BackendKind::VendorSdk => "vendor",
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, BackendKind::PassThrough)
    }
}

/// Why an engine could not be obtained.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("backend module is not installed")]
    NotInstalled,
    #[error("engine creation failed: {0}")]
    CreationFailed(String),
}

/// A single frame could not be processed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct FrameError(pub String);

impl LoadError {
    pub fn into_pipeline_error(self, kind: BackendKind) -> PipelineError {
        PipelineError::BackendUnavailable {
            backend: kind.name().to_string(),
            reason: self.to_string(),
        }
    }
}

/// Compute context of one backend.
///
/// `process_frame` receives exactly `frame_len()` samples at `native_rate()`
/// and writes the same number. Output lags input by `latency()` samples.
pub trait DenoiseEngine: Send {
    fn name(&self) -> &str;
    fn native_rate(&self) -> u32;
    fn frame_len(&self) -> usize;
    fn latency(&self) -> usize;
    fn process_frame(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), FrameError>;
    fn reset(&mut self);
    /// Release native resources. Further frames fail.
    fn close(&mut self);
    fn is_closed(&self) -> bool;
}

/// Factory turning a [`BackendKind`] into a running engine.
pub trait BackendLoader: Send + Sync {
    fn load(&self, kind: BackendKind) -> Result<Box<dyn DenoiseEngine>, LoadError>;
}

/// Loader for the engines compiled into this crate.
#[derive(Clone, Default)]
pub struct BuiltinLoader {
    vendor: Option<Arc<dyn VendorSdk>>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vendor SDK. Without one, `BackendKind::VendorSdk` fails to load.
    pub fn with_vendor_sdk(mut self, sdk: Arc<dyn VendorSdk>) -> Self {
        self.vendor = Some(sdk);
        self
    }
}

impl BackendLoader for BuiltinLoader {
    fn load(&self, kind: BackendKind) -> Result<Box<dyn DenoiseEngine>, LoadError> {
        let engine: Box<dyn DenoiseEngine> = match kind {
            BackendKind::PassThrough => {
                return Err(LoadError::CreationFailed(
                    "pass-through has no engine".into(),
                ))
            }
            BackendKind::SpectralStatistical => Box::new(SpectralEngine::new()),
            BackendKind::RecurrentNetwork => Box::new(RnnEngine::new()),
            BackendKind::DeepFiltering { attenuation_db } => {
                Box::new(DeepFilterEngine::new(attenuation_db))
            }
            BackendKind::DualSignalTransform => Box::new(DtlnEngine::new()),
            BackendKind::VendorSdk => match &self.vendor {
                Some(sdk) => Box::new(VendorEngine::create(sdk.clone())?),
                None => {
                    warn!("vendor backend requested but no SDK is registered");
                    return Err(LoadError::NotInstalled);
                }
            },
        };
        info!(
            "loaded backend '{}' ({} Hz, frame {}, latency {})",
            engine.name(),
            engine.native_rate(),
            engine.frame_len(),
            engine.latency()
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_engines_report_contract() {
        let loader = BuiltinLoader::new();
        let spectral = loader.load(BackendKind::SpectralStatistical).unwrap();
        assert_eq!(spectral.native_rate(), 48000);
        assert_eq!(spectral.frame_len(), 480);

        let df = loader
            .load(BackendKind::DeepFiltering { attenuation_db: 20.0 })
            .unwrap();
        assert_eq!(df.frame_len(), 480);

        let dtln = loader.load(BackendKind::DualSignalTransform).unwrap();
        assert_eq!(dtln.native_rate(), 16000);
        assert_eq!(dtln.frame_len(), 512);

        let rnn = loader.load(BackendKind::RecurrentNetwork).unwrap();
        assert_eq!(rnn.frame_len(), 480);
    }

    #[test]
    fn test_vendor_without_sdk_is_not_installed() {
        let err = BuiltinLoader::new().load(BackendKind::VendorSdk).err();
        assert_eq!(err, Some(LoadError::NotInstalled));
    }

    #[test]
    fn test_load_error_names_backend() {
        let err = LoadError::NotInstalled.into_pipeline_error(BackendKind::VendorSdk);
        assert!(err.is_backend_unavailable());
        assert!(err.to_string().contains("vendor"));
    }
}
