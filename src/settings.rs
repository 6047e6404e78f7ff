//! User-facing effect settings.
//!
//! An [`EffectSettings`] value is an immutable snapshot handed to processing.
//! It is also the persistence format (JSON through serde), so every field has
//! a default and unknown or missing fields never fail a load.

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::PipelineResult;

pub const ATTENUATION_MIN_DB: f32 = 0.0;
pub const ATTENUATION_MAX_DB: f32 = 100.0;
pub const DEFAULT_ATTENUATION_DB: f32 = 20.0;
pub const DEFAULT_VAD_SENSITIVITY: f32 = 0.5;

/// Which backend is active. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    #[default]
    None,
    Spectral,
    Rnnoise,
    DeepFilter,
    Dtln,
    Vendor,
}

impl BackendChoice {
    pub fn all() -> [BackendChoice; 6] {
        [
            BackendChoice::None,
            BackendChoice::Spectral,
            BackendChoice::Rnnoise,
            BackendChoice::DeepFilter,
            BackendChoice::Dtln,
            BackendChoice::Vendor,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendChoice::None => "none",
            BackendChoice::Spectral => "spectral",
            BackendChoice::Rnnoise => "rnnoise",
            BackendChoice::DeepFilter => "deep-filter",
            BackendChoice::Dtln => "dtln",
            BackendChoice::Vendor => "vendor",
        }
    }

    /// Parse a name as written by [`BackendChoice::name`]. Case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::all().into_iter().find(|c| c.name() == lower)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub backend: BackendChoice,
    /// Deep-filtering attenuation limit, dB.
    pub attenuation_db: f32,
    pub vad_enabled: bool,
    pub vad_sensitivity: f32,
    /// Dry/wet ratio. 1.0 is fully processed.
    pub strength: f32,
    pub pre_gain: f32,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            backend: BackendChoice::None,
            attenuation_db: DEFAULT_ATTENUATION_DB,
            vad_enabled: false,
            vad_sensitivity: DEFAULT_VAD_SENSITIVITY,
            strength: 1.0,
            pre_gain: 1.0,
        }
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

impl EffectSettings {
    pub fn with_backend(mut self, backend: BackendChoice) -> Self {
        self.backend = backend;
        self
    }

    /// Copy with every numeric field clamped into its range. Non-finite values
    /// fall back to the defaults.
    pub fn sanitized(&self) -> Self {
        let d = Self::default();
        Self {
            backend: self.backend,
            attenuation_db: finite_or(self.attenuation_db, d.attenuation_db)
                .clamp(ATTENUATION_MIN_DB, ATTENUATION_MAX_DB),
            vad_enabled: self.vad_enabled,
            vad_sensitivity: finite_or(self.vad_sensitivity, d.vad_sensitivity).clamp(0.0, 1.0),
            strength: finite_or(self.strength, d.strength).clamp(0.0, 1.0),
            pre_gain: finite_or(self.pre_gain, d.pre_gain).max(0.0),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            BackendChoice::None => BackendKind::PassThrough,
            BackendChoice::Spectral => BackendKind::SpectralStatistical,
            BackendChoice::Rnnoise => BackendKind::RecurrentNetwork,
            BackendChoice::DeepFilter => BackendKind::DeepFiltering {
                attenuation_db: self.sanitized().attenuation_db,
            },
            BackendChoice::Dtln => BackendKind::DualSignalTransform,
            BackendChoice::Vendor => BackendKind::VendorSdk,
        }
    }

    /// True when going from `self` to `other` needs a new processor rather
    /// than a live gain update.
    pub fn requires_rebuild(&self, other: &EffectSettings) -> bool {
        self.backend_kind() != other.backend_kind()
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse persisted settings. The result is sanitized.
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        let parsed: EffectSettings = serde_json::from_str(json)?;
        Ok(parsed.sanitized())
    }
}
