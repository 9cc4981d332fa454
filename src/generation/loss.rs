//! Masked flow-matching training objective.
//!
//! One call draws an infilling span per example, a noise/time pair for the
//! flow, and the classifier-free-guidance dropout flags, then scores the
//! velocity model on the span only.

use anyhow::Result;
use candle_core::{DType, Tensor};

use super::flow::sample_flow;
use super::inputs::{AudioInput, TextInput};
use super::mask::{lens_to_mask, mask_and, mask_from_frac_lengths, Span};
use super::sampling::SamplingContext;
use crate::models::{CfmConfig, MelFeatures, VelocityInput, VelocityModel};
use crate::tokenizer::CharVocab;

/// Floor of the masked-element count in the loss denominator.
pub const LOSS_EPSILON: f64 = 1e-6;

/// Result of one training-loss evaluation.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Scalar loss.
    pub loss: Tensor,
    /// Velocity predicted by the model, `[b, n, d]`.
    pub pred: Tensor,
    /// Target velocity `x1 - x0`, `[b, n, d]`.
    pub flow: Tensor,
    /// Infilling region actually scored, `[b, n]` (U8).
    pub span_mask: Tensor,
    /// Drawn spans, before intersection with the validity mask.
    pub spans: Vec<Span>,
    pub drop_audio_cond: bool,
    pub drop_text: bool,
}

impl LossOutput {
    pub fn value(&self) -> Result<f32> {
        Ok(self.loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }
}

/// Two-stage dropout: audio with `audio_drop_prob`, then text with
/// `cond_drop_prob`; dropping text also drops audio.
///
/// Returns `(drop_audio_cond, drop_text)`.
pub fn draw_dropout(
    audio_drop_prob: f64,
    cond_drop_prob: f64,
    ctx: &mut SamplingContext,
) -> (bool, bool) {
    let drop_audio = ctx.bernoulli(audio_drop_prob);
    let drop_text = ctx.bernoulli(cond_drop_prob);
    (drop_audio || drop_text, drop_text)
}

/// `sum(mask * (pred - target)^2) / max(count(mask) * d, eps)`.
///
/// `mask` is `[b, n]` and is broadcast over the channel axis.
pub fn masked_mse(pred: &Tensor, target: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (_, _, d) = pred.dims3()?;
    let mask = mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let err = (pred - target)?.sqr()?.broadcast_mul(&mask)?;
    let count = mask.sum_all()?.to_scalar::<f32>()? as f64 * d as f64;
    Ok((err.sum_all()? / count.max(LOSS_EPSILON))?)
}

/// Composes span masking, the flow sampler and the velocity model into a
/// scalar training loss.
pub struct TrainingLossComputer<'a, M: VelocityModel + ?Sized> {
    model: &'a M,
    config: &'a CfmConfig,
    mel: Option<&'a dyn MelFeatures>,
    vocab: Option<&'a CharVocab>,
}

impl<'a, M: VelocityModel + ?Sized> TrainingLossComputer<'a, M> {
    pub fn new(model: &'a M, config: &'a CfmConfig) -> Self {
        Self {
            model,
            config,
            mel: None,
            vocab: None,
        }
    }

    /// Mel extractor used for waveform inputs.
    pub fn with_mel(mut self, mel: &'a dyn MelFeatures) -> Self {
        self.mel = Some(mel);
        self
    }

    /// Vocabulary used for string text.
    pub fn with_vocab(mut self, vocab: &'a CharVocab) -> Self {
        self.vocab = Some(vocab);
        self
    }

    /// Loss for one batch.
    ///
    /// `lens` defaults to the full sequence length for every example.
    pub fn compute(
        &self,
        inp: AudioInput,
        text: TextInput,
        lens: Option<&[usize]>,
        ctx: &mut SamplingContext,
    ) -> Result<LossOutput> {
        let _span = tracing::info_span!("train_loss").entered();

        let x1 = inp.into_features(self.mel, self.config.channels())?;
        let (batch, seq_len, _) = x1.dims3()?;
        let device = x1.device().clone();

        let text = text.to_ids(self.vocab, &device)?;
        anyhow::ensure!(
            text.dim(0)? == batch,
            "Text batch {} does not match audio batch {}",
            text.dim(0)?,
            batch
        );

        let lens = match lens {
            Some(lens) => {
                anyhow::ensure!(
                    lens.len() == batch,
                    "Expected {} lengths, got {}",
                    batch,
                    lens.len()
                );
                lens.iter().map(|&l| l.min(seq_len)).collect()
            }
            None => vec![seq_len; batch],
        };

        let valid = lens_to_mask(&lens, Some(seq_len), &device)?;
        let (span_mask, spans) = mask_from_frac_lengths(
            &lens,
            self.config.frac_lengths_mask,
            seq_len,
            ctx,
            &device,
        )?;
        let span_mask = mask_and(&span_mask, &valid)?;

        let sample = sample_flow(&x1, ctx)?;

        // Zero the target inside the span so the model has to infill it
        let keep = span_mask.to_dtype(DType::F32)?.affine(-1.0, 1.0)?.unsqueeze(2)?;
        let cond = x1.broadcast_mul(&keep)?;

        let (drop_audio_cond, drop_text) =
            draw_dropout(self.config.audio_drop_prob, self.config.cond_drop_prob, ctx);
        tracing::debug!(
            "Span lengths {:?}, drop_audio_cond={}, drop_text={}",
            spans.iter().map(|s| s.len).collect::<Vec<_>>(),
            drop_audio_cond,
            drop_text
        );

        let pred = self.model.predict(&VelocityInput {
            x: &sample.xt,
            cond: &cond,
            text: &text,
            time: &sample.time,
            mask: None,
            drop_audio_cond,
            drop_text,
        })?;

        let loss = masked_mse(&pred, &sample.flow, &span_mask)?;

        Ok(LossOutput {
            loss,
            pred,
            flow: sample.flow,
            span_mask,
            spans,
            drop_audio_cond,
            drop_text,
        })
    }
}
