use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::PipelineResult;
use crate::settings::{BackendChoice, EffectSettings};

// =============================================================================
// FACTORY PRESETS
// =============================================================================

/// Factory presets for common capture situations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SettingsPreset {
    #[serde(rename = "Off")]
    #[default]
    Off,
    #[serde(rename = "Light")]
    Light,
    #[serde(rename = "Balanced")]
    Balanced,
    #[serde(rename = "Aggressive")]
    Aggressive,
}

impl SettingsPreset {
    pub fn all_presets() -> [SettingsPreset; 4] {
        [
            SettingsPreset::Off,
            SettingsPreset::Light,
            SettingsPreset::Balanced,
            SettingsPreset::Aggressive,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingsPreset::Off => "Off",
            SettingsPreset::Light => "Light",
            SettingsPreset::Balanced => "Balanced",
            SettingsPreset::Aggressive => "Aggressive",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SettingsPreset::Off => "No suppression, raw microphone signal",
            SettingsPreset::Light => "Gentle statistical cleanup, keeps room tone",
            SettingsPreset::Balanced => "RNNoise at full strength for everyday calls",
            SettingsPreset::Aggressive => "Deep filtering with a high attenuation limit and a speech gate",
        }
    }

    pub fn settings(&self) -> EffectSettings {
        let base = EffectSettings::default();
        match self {
            SettingsPreset::Off => base,
            SettingsPreset::Light => EffectSettings {
                // Partial mix keeps some ambience
                backend: BackendChoice::Spectral,
                strength: 0.7,
                ..base
            },
            SettingsPreset::Balanced => EffectSettings {
                backend: BackendChoice::Rnnoise,
                ..base
            },
            SettingsPreset::Aggressive => EffectSettings {
                backend: BackendChoice::DeepFilter,
                attenuation_db: 40.0,
                vad_enabled: true,
                vad_sensitivity: 0.6,
                ..base
            },
        }
    }
}

// =============================================================================
// PRESET LIBRARY
// =============================================================================

/// Named settings snapshots: the factory presets plus any user presets loaded
/// from JSON.
#[derive(Debug, Clone)]
pub struct PresetLibrary {
    presets: HashMap<String, EffectSettings>,
}

impl PresetLibrary {
    /// Factory presets merged with user presets from `json` (a map of name to
    /// settings). This is fallible but non-fatal: malformed JSON leaves the
    /// factory presets only.
    pub fn from_json(json: &str) -> Self {
        let mut lib = Self::default();
        match serde_json::from_str::<HashMap<String, EffectSettings>>(json) {
            Ok(user) => {
                for (name, settings) in user {
                    lib.presets.insert(name, settings.sanitized());
                }
            }
            Err(e) => log::warn!("ignoring malformed user presets: {}", e),
        }
        lib
    }

    /// Read user presets from a JSON file. A missing or unreadable file is
    /// an error; bad contents fall back to the factory presets.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json))
    }

    /// Exact match first, then a case-insensitive one.
    pub fn get(&self, name: &str) -> Option<&EffectSettings> {
        self.presets.get(name).or_else(|| {
            self.presets
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn insert(&mut self, name: impl Into<String>, settings: EffectSettings) {
        self.presets.insert(name.into(), settings.sanitized());
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetLibrary {
    fn default() -> Self {
        let presets = SettingsPreset::all_presets()
            .iter()
            .map(|p| (p.name().to_string(), p.settings()))
            .collect();
        Self { presets }
    }
}
