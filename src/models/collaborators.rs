//! Contracts for the networks the flow-matching engine drives but does not own.
//!
//! Layouts follow the einsum convention used throughout the crate:
//! `b` batch, `n` frames, `d` feature channels, `nt` text tokens.
//!
//! Closures implement [`VelocityModel`], [`Vocoder`] and [`DurationPredictor`],
//! which keeps test doubles and adapters around foreign models cheap.

use anyhow::Result;
use candle_core::Tensor;

/// Inputs to one velocity prediction.
#[derive(Debug, Clone, Copy)]
pub struct VelocityInput<'a> {
    /// Current state, `[b, n, d]`.
    pub x: &'a Tensor,
    /// Audio conditioning, `[b, n, d]`, zero where nothing is given.
    pub cond: &'a Tensor,
    /// Text ids, `[b, nt]`, padded with [`crate::tokenizer::PAD_ID`].
    pub text: &'a Tensor,
    /// Flow time, `[b]`.
    pub time: &'a Tensor,
    /// Optional frame validity mask, `[b, n]`.
    pub mask: Option<&'a Tensor>,
    /// Ignore the audio conditioning.
    pub drop_audio_cond: bool,
    /// Ignore the text.
    pub drop_text: bool,
}

/// Sequence model predicting the flow velocity (`[b, n, d]`).
pub trait VelocityModel {
    fn predict(&self, input: &VelocityInput<'_>) -> Result<Tensor>;
}

impl<F> VelocityModel for F
where
    F: Fn(&VelocityInput<'_>) -> Result<Tensor>,
{
    fn predict(&self, input: &VelocityInput<'_>) -> Result<Tensor> {
        self(input)
    }
}

/// Waveform to mel-feature extractor.
pub trait MelFeatures {
    /// `[b, samples]` -> `[b, d, n]`.
    fn mel(&self, waveform: &Tensor) -> Result<Tensor>;
    /// Input sample rate in Hz.
    fn sample_rate(&self) -> u32;
    /// Samples per feature frame.
    fn hop_length(&self) -> usize;
    /// Number of feature channels `d`.
    fn n_mels(&self) -> usize;
}

/// Mel-feature to waveform decoder: `[b, d, n]` -> `[b, samples]`.
pub trait Vocoder {
    fn decode(&self, features: &Tensor) -> Result<Tensor>;
}

impl<F> Vocoder for F
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    fn decode(&self, features: &Tensor) -> Result<Tensor> {
        self(features)
    }
}

/// Predicts the total utterance duration in seconds, one value per example.
pub trait DurationPredictor {
    fn predict_seconds(&self, cond: &Tensor, text: &Tensor) -> Result<Vec<f64>>;
}

impl<F> DurationPredictor for F
where
    F: Fn(&Tensor, &Tensor) -> Result<Vec<f64>>,
{
    fn predict_seconds(&self, cond: &Tensor, text: &Tensor) -> Result<Vec<f64>> {
        self(cond, text)
    }
}
