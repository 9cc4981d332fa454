//! Tagged conditioning and text inputs.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};

use crate::models::MelFeatures;
use crate::tokenizer::CharVocab;

/// Audio conditioning, tagged by representation.
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// Raw audio, `[b, samples]`.
    Waveform(Tensor),
    /// Mel features, `[b, n, d]`.
    Features(Tensor),
}

impl AudioInput {
    pub fn device(&self) -> &Device {
        match self {
            AudioInput::Waveform(t) | AudioInput::Features(t) => t.device(),
        }
    }

    /// Resolve to F32 `[b, n, d]` features with exactly `channels` channels.
    ///
    /// Waveforms go through `mel` (`[b, d, n]`) and are transposed.
    pub fn into_features(self, mel: Option<&dyn MelFeatures>, channels: usize) -> Result<Tensor> {
        let features = match self {
            AudioInput::Features(features) => {
                anyhow::ensure!(
                    features.rank() == 3,
                    "Feature conditioning must be [b, n, d], got shape {:?}",
                    features.dims()
                );
                features
            }
            AudioInput::Waveform(waveform) => {
                let mel = mel.context("Waveform input needs a mel feature extractor")?;
                anyhow::ensure!(
                    waveform.rank() == 2,
                    "Waveform input must be [b, samples], got shape {:?}",
                    waveform.dims()
                );
                mel.mel(&waveform)?.transpose(1, 2)?.contiguous()?
            }
        };

        let got = features.dim(2)?;
        if got != channels {
            anyhow::bail!("Expected {} feature channels, got {}", channels, got);
        }
        Ok(features.to_dtype(DType::F32)?)
    }
}

impl From<Tensor> for AudioInput {
    fn from(features: Tensor) -> Self {
        AudioInput::Features(features)
    }
}

/// Text input, either as ids or as raw strings.
#[derive(Debug, Clone)]
pub enum TextInput {
    /// I64 ids `[b, nt]` padded with [`crate::tokenizer::PAD_ID`].
    Tokens(Tensor),
    /// One string per example.
    Strings(Vec<String>),
}

impl TextInput {
    /// I64 `[b, nt]` ids on `device`.
    ///
    /// Strings go through `vocab` when present, otherwise through the
    /// byte-level fallback.
    pub fn to_ids(&self, vocab: Option<&CharVocab>, device: &Device) -> Result<Tensor> {
        match self {
            TextInput::Tokens(ids) => {
                anyhow::ensure!(
                    ids.rank() == 2,
                    "Text ids must be [b, nt], got shape {:?}",
                    ids.dims()
                );
                Ok(ids.to_dtype(DType::I64)?.to_device(device)?)
            }
            TextInput::Strings(texts) => match vocab {
                Some(vocab) => vocab.encode_batch(texts, device),
                None => CharVocab::bytes_batch(texts, device),
            },
        }
    }
}

impl From<Vec<String>> for TextInput {
    fn from(texts: Vec<String>) -> Self {
        TextInput::Strings(texts)
    }
}

impl From<&[&str]> for TextInput {
    fn from(texts: &[&str]) -> Self {
        TextInput::Strings(texts.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Tensor> for TextInput {
    fn from(ids: Tensor) -> Self {
        TextInput::Tokens(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMel;

    impl MelFeatures for FixedMel {
        fn mel(&self, waveform: &Tensor) -> Result<Tensor> {
            // 4 samples per frame, 3 channels
            let (b, samples) = waveform.dims2()?;
            Ok(Tensor::ones((b, 3, samples / 4), DType::F32, waveform.device())?)
        }
        fn sample_rate(&self) -> u32 {
            16
        }
        fn hop_length(&self) -> usize {
            4
        }
        fn n_mels(&self) -> usize {
            3
        }
    }

    #[test]
    fn test_features_pass_through() {
        let x = Tensor::zeros((2, 5, 3), DType::F32, &Device::Cpu).unwrap();
        let out = AudioInput::Features(x).into_features(None, 3).unwrap();
        assert_eq!(out.dims(), &[2, 5, 3]);
    }

    #[test]
    fn test_waveform_transposed() {
        let wave = Tensor::zeros((1, 32), DType::F32, &Device::Cpu).unwrap();
        let out = AudioInput::Waveform(wave)
            .into_features(Some(&FixedMel), 3)
            .unwrap();
        assert_eq!(out.dims(), &[1, 8, 3]);
    }

    #[test]
    fn test_waveform_without_mel_fails() {
        let wave = Tensor::zeros((1, 32), DType::F32, &Device::Cpu).unwrap();
        assert!(AudioInput::Waveform(wave).into_features(None, 3).is_err());
    }

    #[test]
    fn test_channel_mismatch() {
        let x = Tensor::zeros((1, 5, 4), DType::F32, &Device::Cpu).unwrap();
        let err = AudioInput::Features(x).into_features(None, 3).unwrap_err();
        assert!(err.to_string().contains("Expected 3 feature channels, got 4"));

        let wave = Tensor::zeros((1, 32), DType::F32, &Device::Cpu).unwrap();
        let err = AudioInput::Waveform(wave)
            .into_features(Some(&FixedMel), 100)
            .unwrap_err();
        assert!(err.to_string().contains("feature channels"));
    }

    #[test]
    fn test_strings_use_byte_fallback() {
        let text = TextInput::from(&["ab", "c"][..]);
        let ids = text.to_ids(None, &Device::Cpu).unwrap();
        let rows: Vec<Vec<i64>> = ids.to_vec2().unwrap();
        assert_eq!(rows, vec![vec![97, 98], vec![99, -1]]);
    }

    #[test]
    fn test_strings_use_vocab() {
        let vocab = CharVocab::from_tokens(["a", "b"]);
        let text = TextInput::from(vec!["ba".to_string()]);
        let ids = text.to_ids(Some(&vocab), &Device::Cpu).unwrap();
        let rows: Vec<Vec<i64>> = ids.to_vec2().unwrap();
        assert_eq!(rows, vec![vec![1, 0]]);
    }
}
