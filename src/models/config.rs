//! Flow-matching configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audio::MelConfig;

/// Training and sampling configuration for the conditional flow-matching model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfmConfig {
    /// Noise scale of the probability path. Recognized but inert: the path is
    /// always the zero-noise optimal-transport interpolation.
    #[serde(default)]
    pub sigma: f64,

    /// Probability of dropping the audio conditioning during training
    #[serde(default = "default_audio_drop_prob")]
    pub audio_drop_prob: f64,

    /// Probability of dropping text and audio together during training
    #[serde(default = "default_cond_drop_prob")]
    pub cond_drop_prob: f64,

    /// Range of the infilling span as a fraction of the valid length
    #[serde(default = "default_frac_lengths_mask")]
    pub frac_lengths_mask: (f32, f32),

    /// Feature channels (defaults to `mel.n_mels`)
    #[serde(default)]
    pub num_channels: Option<usize>,

    /// Upper bound on generated frames
    #[serde(default = "default_max_duration")]
    pub max_duration: usize,

    /// Mel feature settings
    #[serde(default)]
    pub mel: MelConfig,
}

fn default_audio_drop_prob() -> f64 {
    0.3
}

fn default_cond_drop_prob() -> f64 {
    0.2
}

fn default_frac_lengths_mask() -> (f32, f32) {
    (0.7, 1.0)
}

fn default_max_duration() -> usize {
    4096
}

impl Default for CfmConfig {
    fn default() -> Self {
        Self {
            sigma: 0.0,
            audio_drop_prob: default_audio_drop_prob(),
            cond_drop_prob: default_cond_drop_prob(),
            frac_lengths_mask: default_frac_lengths_mask(),
            num_channels: None,
            max_duration: default_max_duration(),
            mel: MelConfig::default(),
        }
    }
}

impl CfmConfig {
    /// Load configuration from a local JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate a JSON config string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Feature channel count the model expects
    pub fn channels(&self) -> usize {
        self.num_channels.unwrap_or(self.mel.n_mels)
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        let (low, high) = self.frac_lengths_mask;
        anyhow::ensure!(
            (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high) && low <= high,
            "frac_lengths_mask must be an ordered range within [0, 1], got ({low}, {high})"
        );
        for (name, p) in [
            ("audio_drop_prob", self.audio_drop_prob),
            ("cond_drop_prob", self.cond_drop_prob),
        ] {
            anyhow::ensure!((0.0..=1.0).contains(&p), "{name} must be in [0, 1], got {p}");
        }
        anyhow::ensure!(self.max_duration > 0, "max_duration must be positive");
        anyhow::ensure!(self.channels() > 0, "num_channels must be positive");
        if self.sigma != 0.0 {
            tracing::warn!(
                "sigma = {} has no effect; the flow path is always noise-free",
                self.sigma
            );
        }
        Ok(())
    }
}
