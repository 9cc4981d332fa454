//! End-to-end sampling: duration resolution, guided ODE integration and
//! conditioning reinsertion.

use anyhow::{anyhow, Result};
use candle_core::{DType, Tensor};
use std::time::{Duration as WallTime, Instant};

use super::duration::{Duration, DurationResolver};
use super::guidance::GuidanceEngine;
use super::inputs::{AudioInput, TextInput};
use super::mask::{lens_to_mask, mask_and, pad_mask, pad_sequence};
use super::ode::{odeint, time_grid, OdeMethod, Trajectory};
use super::sampling::SamplingContext;
use crate::models::{DurationPredictor, MelFeatures, VelocityModel, Vocoder};
use crate::tokenizer::{text_lens, CharVocab};

/// Sampling parameters
#[derive(Debug, Clone)]
pub struct SampleOptions {
    /// Number of points in the time grid
    pub steps: usize,
    /// ODE solver
    pub method: OdeMethod,
    /// Classifier-free guidance strength (0 disables the unconditioned pass)
    pub cfg_strength: f64,
    /// Speaking rate; predicted durations are divided by it
    pub speed: f64,
    /// Sway warp coefficient for the time grid
    pub sway_sampling_coef: Option<f64>,
    /// Seed applied before every example's noise draw
    pub seed: Option<u64>,
    /// Upper bound on generated frames
    pub max_duration: usize,
    /// Overwrite the conditioning with zeros after building the step conditioning
    pub no_ref_audio: bool,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            steps: 32,
            method: OdeMethod::Euler,
            cfg_strength: 2.0,
            speed: 1.0,
            sway_sampling_coef: Some(-1.0),
            seed: None,
            max_duration: 4096,
            no_ref_audio: false,
        }
    }
}

/// Per-call sampling inputs.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    /// Reference audio
    pub cond: AudioInput,
    /// Text to speak, covering both reference and generated speech
    pub text: TextInput,
    /// Explicit output length; the duration predictor is used when absent
    pub duration: Option<Duration>,
    /// Valid conditioning frames per example (defaults to the full length)
    pub lens: Option<Vec<usize>>,
    /// `[b, n]` mask restricting which conditioning frames are kept
    pub edit_mask: Option<Tensor>,
}

impl SampleRequest {
    pub fn new(cond: impl Into<AudioInput>, text: impl Into<TextInput>) -> Self {
        Self {
            cond: cond.into(),
            text: text.into(),
            duration: None,
            lens: None,
            edit_mask: None,
        }
    }

    pub fn with_duration(mut self, duration: impl Into<Duration>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn with_lens(mut self, lens: Vec<usize>) -> Self {
        self.lens = Some(lens);
        self
    }

    pub fn with_edit_mask(mut self, edit_mask: Tensor) -> Self {
        self.edit_mask = Some(edit_mask);
        self
    }
}

/// Result of one sampling call.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    /// Final features with the conditioning reinserted, `[b, n, d]`
    pub features: Tensor,
    /// Vocoder output `[b, samples]`, when a vocoder is attached
    pub waveform: Option<Tensor>,
    /// Every integration state, starting with the initial noise
    pub trajectory: Trajectory,
    /// Resolved output length per example, in frames
    pub durations: Vec<usize>,
    /// Wall time of the whole call
    pub elapsed: WallTime,
}

impl SampleOutput {
    /// The vocoded waveform if present, otherwise the features.
    pub fn output(&self) -> &Tensor {
        self.waveform.as_ref().unwrap_or(&self.features)
    }
}

/// Generates features from partial audio and text with a velocity model.
pub struct SamplingPipeline<'a, M: VelocityModel + ?Sized> {
    model: &'a M,
    channels: usize,
    sample_rate: u32,
    hop_length: usize,
    mel: Option<&'a dyn MelFeatures>,
    vocoder: Option<&'a dyn Vocoder>,
    duration_predictor: Option<&'a dyn DurationPredictor>,
    vocab: Option<&'a CharVocab>,
}

impl<'a, M: VelocityModel + ?Sized> SamplingPipeline<'a, M> {
    /// `sample_rate` and `hop_length` convert predicted seconds into frames.
    pub fn new(model: &'a M, channels: usize, sample_rate: u32, hop_length: usize) -> Self {
        Self {
            model,
            channels,
            sample_rate,
            hop_length,
            mel: None,
            vocoder: None,
            duration_predictor: None,
            vocab: None,
        }
    }

    /// Mel extractor for waveform conditioning; also sets the frame rate.
    pub fn with_mel(mut self, mel: &'a dyn MelFeatures) -> Self {
        self.sample_rate = mel.sample_rate();
        self.hop_length = mel.hop_length();
        self.mel = Some(mel);
        self
    }

    pub fn with_vocoder(mut self, vocoder: &'a dyn Vocoder) -> Self {
        self.vocoder = Some(vocoder);
        self
    }

    pub fn with_duration_predictor(mut self, predictor: &'a dyn DurationPredictor) -> Self {
        self.duration_predictor = Some(predictor);
        self
    }

    pub fn with_vocab(mut self, vocab: &'a CharVocab) -> Self {
        self.vocab = Some(vocab);
        self
    }

    /// Run the full sampling procedure.
    ///
    /// With `options.seed` set, `ctx` is reset to that seed before each
    /// example's noise draw, so all examples start from the same noise
    /// prefix.
    pub fn sample(
        &self,
        request: SampleRequest,
        options: &SampleOptions,
        ctx: &mut SamplingContext,
    ) -> Result<SampleOutput> {
        let start = Instant::now();
        let _span = tracing::info_span!("sample").entered();
        anyhow::ensure!(options.max_duration > 0, "max_duration must be positive");

        let SampleRequest {
            cond,
            text,
            duration,
            lens,
            edit_mask,
        } = request;

        let device = cond.device().clone();
        let cond = cond.into_features(self.mel, self.channels)?;
        let (batch, cond_seq_len, _) = cond.dims3()?;

        let text = text.to_ids(self.vocab, &device)?;
        anyhow::ensure!(
            text.dim(0)? == batch,
            "Text batch {} does not match conditioning batch {}",
            text.dim(0)?,
            batch
        );

        let mut lens = match lens {
            Some(lens) => {
                anyhow::ensure!(
                    lens.len() == batch,
                    "Expected {} lengths, got {}",
                    batch,
                    lens.len()
                );
                lens
            }
            None => vec![cond_seq_len; batch],
        };
        // The text has to fit inside the generated span
        for (len, text_len) in lens.iter_mut().zip(text_lens(&text)?) {
            *len = (*len).max(text_len);
        }

        let resolver = DurationResolver::new(
            self.duration_predictor,
            self.sample_rate,
            self.hop_length,
            options.max_duration,
        );
        let durations = resolver.resolve(duration.as_ref(), &cond, &text, &lens, options.speed)?;
        let max_duration = durations.iter().copied().max().unwrap_or(0);
        tracing::debug!("Durations {:?} (max {})", durations, max_duration);

        let mut cond_mask = lens_to_mask(&lens, Some(max_duration), &device)?;
        if let Some(edit_mask) = edit_mask {
            anyhow::ensure!(
                edit_mask.dim(0)? == batch,
                "Edit mask batch {} does not match conditioning batch {}",
                edit_mask.dim(0)?,
                batch
            );
            let edit_mask = pad_mask(&edit_mask.to_device(&device)?, max_duration)?;
            cond_mask = mask_and(&cond_mask, &edit_mask)?;
        }

        let cond = if cond_seq_len < max_duration {
            cond.pad_with_zeros(1, 0, max_duration - cond_seq_len)?
        } else {
            cond.narrow(1, 0, max_duration)?
        };
        let cond_mask = cond_mask.unsqueeze(2)?.broadcast_as(cond.shape())?;

        // Held fixed across every integration step
        let step_cond = cond.broadcast_mul(&cond_mask.to_dtype(DType::F32)?)?;

        let cond = if options.no_ref_audio {
            cond.zeros_like()?
        } else {
            cond
        };

        let mask = if batch > 1 {
            Some(lens_to_mask(&durations, None, &device)?)
        } else {
            None
        };

        let mut noise = Vec::with_capacity(batch);
        for &dur in &durations {
            if let Some(seed) = options.seed {
                ctx.reset(seed);
            }
            noise.push(ctx.randn((dur, self.channels), &device)?);
        }
        let y0 = pad_sequence(&noise)?;

        let t = time_grid(options.steps, options.sway_sampling_coef);
        tracing::debug!(
            "Integrating {} steps with {} (cfg {})",
            t.len().saturating_sub(1),
            options.method,
            options.cfg_strength
        );

        let guidance = GuidanceEngine::new(self.model, options.cfg_strength);
        let velocity = |t: f64, x: &Tensor| -> Result<Tensor> {
            let time = Tensor::full(t as f32, batch, &device)?;
            let v = guidance.velocity(x, &step_cond, &text, &time, mask.as_ref())?;
            crate::sync_device(&device)?;
            Ok(v)
        };
        let trajectory = {
            let _span = tracing::info_span!("integrate").entered();
            odeint(options.method, velocity, &y0, &t)?
        };

        let sampled = trajectory
            .last()
            .ok_or_else(|| anyhow!("Integration produced no states"))?;
        let features = cond_mask.where_cond(&cond, sampled)?;

        let waveform = match self.vocoder {
            Some(vocoder) => {
                let _span = tracing::info_span!("decode").entered();
                let mel = features.transpose(1, 2)?.contiguous()?;
                Some(vocoder.decode(&mel)?)
            }
            None => None,
        };

        let elapsed = start.elapsed();
        tracing::info!("Generated speech in {:?}", elapsed);

        Ok(SampleOutput {
            features,
            waveform,
            trajectory,
            durations,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VelocityInput;
    use candle_core::Device;
    use std::cell::Cell;

    fn zero_model(input: &VelocityInput<'_>) -> Result<Tensor> {
        Ok(input.x.zeros_like()?)
    }

    #[test]
    fn test_sample_options_default() {
        let options = SampleOptions::default();
        assert_eq!(options.steps, 32);
        assert_eq!(options.method, OdeMethod::Euler);
        assert!((options.cfg_strength - 2.0).abs() < 1e-12);
        assert!((options.speed - 1.0).abs() < 1e-12);
        assert_eq!(options.sway_sampling_coef, Some(-1.0));
        assert_eq!(options.seed, None);
        assert_eq!(options.max_duration, 4096);
        assert!(!options.no_ref_audio);
    }

    #[test]
    fn test_output_shape_follows_duration() {
        let device = Device::Cpu;
        let cond = Tensor::ones((1, 3, 2), DType::F32, &device).unwrap();
        let text = Tensor::new(&[[1i64, 2, -1]], &device).unwrap();
        let pipeline = SamplingPipeline::new(&zero_model, 2, 24000, 256);
        let options = SampleOptions {
            steps: 4,
            ..Default::default()
        };
        let mut ctx = SamplingContext::new(Some(0));
        let out = pipeline
            .sample(
                SampleRequest::new(cond, text).with_duration(6),
                &options,
                &mut ctx,
            )
            .unwrap();
        assert_eq!(out.features.dims(), &[1, 6, 2]);
        assert_eq!(out.trajectory.len(), 4);
        assert_eq!(out.durations, vec![6]);
        assert!(out.waveform.is_none());
    }

    #[test]
    fn test_text_longer_than_audio_extends_lens() {
        let device = Device::Cpu;
        let cond = Tensor::ones((1, 2, 2), DType::F32, &device).unwrap();
        let text = Tensor::new(&[[1i64, 2, 3, 4, 5]], &device).unwrap();
        let pipeline = SamplingPipeline::new(&zero_model, 2, 24000, 256);
        let mut ctx = SamplingContext::new(Some(0));
        let out = pipeline
            .sample(
                SampleRequest::new(cond, text).with_duration(1),
                &SampleOptions::default(),
                &mut ctx,
            )
            .unwrap();
        // len = max(2, 5) = 5, so duration is raised to 6
        assert_eq!(out.durations, vec![6]);
    }

    #[test]
    fn test_single_example_gets_no_mask() {
        let device = Device::Cpu;
        let saw_mask = Cell::new(false);
        let model = |input: &VelocityInput<'_>| -> Result<Tensor> {
            saw_mask.set(saw_mask.get() || input.mask.is_some());
            Ok(input.x.zeros_like()?)
        };
        let cond = Tensor::ones((1, 2, 2), DType::F32, &device).unwrap();
        let text = Tensor::new(&[[1i64]], &device).unwrap();
        let pipeline = SamplingPipeline::new(&model, 2, 24000, 256);
        let mut ctx = SamplingContext::new(Some(0));
        pipeline
            .sample(
                SampleRequest::new(cond, text).with_duration(4),
                &SampleOptions::default(),
                &mut ctx,
            )
            .unwrap();
        assert!(!saw_mask.get());
    }

    #[test]
    fn test_batch_gets_duration_mask() {
        let device = Device::Cpu;
        let widths = Cell::new(0usize);
        let model = |input: &VelocityInput<'_>| -> Result<Tensor> {
            if let Some(mask) = input.mask {
                widths.set(mask.dim(1)?);
            }
            Ok(input.x.zeros_like()?)
        };
        let cond = Tensor::ones((2, 2, 2), DType::F32, &device).unwrap();
        let text = Tensor::new(&[[1i64], [2]], &device).unwrap();
        let pipeline = SamplingPipeline::new(&model, 2, 24000, 256);
        let mut ctx = SamplingContext::new(Some(0));
        let out = pipeline
            .sample(
                SampleRequest::new(cond, text).with_duration(vec![4, 7]),
                &SampleOptions::default(),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(widths.get(), 7);
        assert_eq!(out.features.dims(), &[2, 7, 2]);
    }

    #[test]
    fn test_batch_mismatch_rejected() {
        let device = Device::Cpu;
        let cond = Tensor::ones((2, 2, 2), DType::F32, &device).unwrap();
        let text = Tensor::new(&[[1i64]], &device).unwrap();
        let pipeline = SamplingPipeline::new(&zero_model, 2, 24000, 256);
        let mut ctx = SamplingContext::new(Some(0));
        let result = pipeline.sample(
            SampleRequest::new(cond, text).with_duration(4),
            &SampleOptions::default(),
            &mut ctx,
        );
        assert!(result.is_err());
    }
}
