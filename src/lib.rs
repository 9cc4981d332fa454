//! # CFM-TTS
//!
//! Conditional flow matching for text-conditioned speech generation, on top
//! of [candle](https://github.com/huggingface/candle).
//!
//! ## Features
//!
//! - **Training objective**: span-masked infilling loss with
//!   classifier-free-guidance dropout
//! - **Sampling**: guided Euler / midpoint integration over a sway-warped
//!   time grid, with reference-audio conditioning reinserted afterwards
//! - **Pluggable collaborators**: velocity model, mel extractor, vocoder and
//!   duration predictor are traits; closures implement most of them
//! - **CUDA** / **Metal** support through candle feature flags
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cfm_tts::{AudioBuffer, Cfm, CfmConfig, SampleOptions, SampleRequest, auto_device};
//! use cfm_tts::generation::AudioInput;
//!
//! let device = auto_device()?;
//! let cfm = Cfm::from_dir(my_velocity_model, "path/to/model")?
//!     .with_vocoder(Box::new(my_vocoder));
//!
//! let prompt = AudioBuffer::load("prompt.wav")?;
//! let request = SampleRequest::new(
//!     AudioInput::Waveform(prompt.to_batch(&device)?),
//!     vec!["Reference transcript, then the new sentence.".to_string()],
//! )
//! .with_duration(800);
//!
//! let out = cfm.sample(request, &SampleOptions::default())?;
//! ```
//!
//! ## Layout conventions
//!
//! Features are F32 `[b, n, d]` (batch, frames, channels), masks are U8
//! `[b, n]`, text ids are I64 `[b, nt]` padded with [`tokenizer::PAD_ID`].
//! The mel extractor and vocoder exchange channel-first `[b, d, n]` features.

pub mod audio;
pub mod generation;
pub mod models;
pub mod tokenizer;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use std::path::Path;

use audio::MelSpectrogram;
use generation::{
    AudioInput, LossOutput, SampleOptions, SampleOutput, SampleRequest, SamplingPipeline,
    TextInput, TrainingLossComputer,
};
use models::{DurationPredictor, MelFeatures, VelocityModel, Vocoder};
use tokenizer::CharVocab;

/// Re-exports for convenience
pub use audio::AudioBuffer;
pub use generation::{Duration, OdeMethod, SamplingContext, Trajectory};
pub use models::CfmConfig;

/// A velocity model bound to its configuration and optional collaborators.
///
/// The mel extractor defaults to a [`MelSpectrogram`] built from
/// `config.mel`; vocabulary, vocoder and duration predictor are absent until
/// attached.
pub struct Cfm<M: VelocityModel> {
    model: M,
    config: CfmConfig,
    mel: Box<dyn MelFeatures>,
    vocab: Option<CharVocab>,
    vocoder: Option<Box<dyn Vocoder>>,
    duration_predictor: Option<Box<dyn DurationPredictor>>,
}

impl<M: VelocityModel> Cfm<M> {
    pub fn new(model: M, config: CfmConfig) -> Result<Self> {
        config.validate()?;
        let mel = Box::new(MelSpectrogram::new(config.mel.clone()));
        Ok(Self {
            model,
            config,
            mel,
            vocab: None,
            vocoder: None,
            duration_predictor: None,
        })
    }

    /// Build from a model directory.
    ///
    /// Reads `config.json` and `vocab.txt` when present; a missing config
    /// falls back to defaults, a missing vocab to byte-level text ids.
    pub fn from_dir<P: AsRef<Path>>(model: M, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!("Loading flow-matching setup from: {}", dir.display());

        let config_path = dir.join("config.json");
        let config = if config_path.exists() {
            CfmConfig::from_file(&config_path)?
        } else {
            tracing::warn!("No config.json in {}, using defaults", dir.display());
            CfmConfig::default()
        };

        let mut cfm = Self::new(model, config)?;
        let vocab_path = dir.join("vocab.txt");
        if vocab_path.exists() {
            cfm.vocab = Some(CharVocab::from_file(&vocab_path)?);
        }
        Ok(cfm)
    }

    pub fn with_mel(mut self, mel: Box<dyn MelFeatures>) -> Self {
        self.mel = mel;
        self
    }

    pub fn with_vocab(mut self, vocab: CharVocab) -> Self {
        self.vocab = Some(vocab);
        self
    }

    pub fn with_vocoder(mut self, vocoder: Box<dyn Vocoder>) -> Self {
        self.vocoder = Some(vocoder);
        self
    }

    pub fn with_duration_predictor(mut self, predictor: Box<dyn DurationPredictor>) -> Self {
        self.duration_predictor = Some(predictor);
        self
    }

    pub fn config(&self) -> &CfmConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn vocab(&self) -> Option<&CharVocab> {
        self.vocab.as_ref()
    }

    /// Sampling options with this model's output-length ceiling.
    pub fn default_options(&self) -> SampleOptions {
        SampleOptions {
            max_duration: self.config.max_duration,
            ..Default::default()
        }
    }

    /// Masked flow-matching loss for one batch.
    pub fn train_loss(
        &self,
        inp: AudioInput,
        text: TextInput,
        lens: Option<&[usize]>,
        ctx: &mut SamplingContext,
    ) -> Result<LossOutput> {
        let mut computer =
            TrainingLossComputer::new(&self.model, &self.config).with_mel(self.mel.as_ref());
        if let Some(vocab) = &self.vocab {
            computer = computer.with_vocab(vocab);
        }
        computer.compute(inp, text, lens, ctx)
    }

    /// Generate with a fresh [`SamplingContext`] seeded from `options.seed`.
    pub fn sample(&self, request: SampleRequest, options: &SampleOptions) -> Result<SampleOutput> {
        let mut ctx = SamplingContext::new(options.seed);
        self.sample_with_context(request, options, &mut ctx)
    }

    /// Generate, drawing noise from `ctx`.
    ///
    /// Durations never exceed the configured `max_duration`, whatever the
    /// options ask for.
    pub fn sample_with_context(
        &self,
        request: SampleRequest,
        options: &SampleOptions,
        ctx: &mut SamplingContext,
    ) -> Result<SampleOutput> {
        let options = SampleOptions {
            max_duration: options.max_duration.min(self.config.max_duration),
            ..options.clone()
        };
        let mut pipeline = SamplingPipeline::new(
            &self.model,
            self.config.channels(),
            self.config.mel.sample_rate,
            self.config.mel.hop_length,
        )
        .with_mel(self.mel.as_ref());
        if let Some(vocab) = &self.vocab {
            pipeline = pipeline.with_vocab(vocab);
        }
        if let Some(vocoder) = &self.vocoder {
            pipeline = pipeline.with_vocoder(vocoder.as_ref());
        }
        if let Some(predictor) = &self.duration_predictor {
            pipeline = pipeline.with_duration_predictor(predictor.as_ref());
        }
        pipeline.sample(request, &options, ctx)
    }
}

/// Force the GPU to complete all pending work before returning.
///
/// Called after every guided velocity evaluation so that queued kernels do
/// not pile up across the integration loop. On CPU this is a no-op.
pub fn sync_device(device: &Device) -> Result<()> {
    match device {
        Device::Cpu => Ok(()),
        _ => {
            // Force a GPU-to-CPU sync by reading a scalar back
            let _: Vec<f32> = Tensor::zeros(1, DType::F32, device)?.to_vec1()?;
            Ok(())
        }
    }
}

/// Select the best available device.
///
/// Checks in order:
/// - CUDA (if compiled with `cuda` feature and GPU available)
/// - Metal (if compiled with `metal` feature and on macOS)
/// - CPU (fallback)
pub fn auto_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::cuda_if_available(0) {
            if device.is_cuda() {
                tracing::info!("Using CUDA device");
                return Ok(device);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device");
            return Ok(device);
        }
    }

    tracing::info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse a device string into a [`Device`].
///
/// Supported formats: `"auto"`, `"cpu"`, `"cuda"`, `"cuda:N"`, `"metal"`.
pub fn parse_device(device_str: &str) -> Result<Device> {
    match device_str.to_lowercase().as_str() {
        "auto" => auto_device(),
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = match s.strip_prefix("cuda:") {
                    Some(idx) => idx
                        .parse()
                        .map_err(|e| anyhow::anyhow!("invalid CUDA device index: {e}"))?,
                    None => 0,
                };
                Device::cuda_if_available(ordinal)
                    .map_err(|e| anyhow::anyhow!("failed to init CUDA device {ordinal}: {e}"))
            }
            #[cfg(not(feature = "cuda"))]
            anyhow::bail!("CUDA support not compiled in. Rebuild with: cargo build --features cuda")
        }
        "metal" => {
            #[cfg(feature = "metal")]
            {
                Device::new_metal(0)
                    .map_err(|e| anyhow::anyhow!("failed to init Metal device: {e}"))
            }
            #[cfg(not(feature = "metal"))]
            anyhow::bail!(
                "Metal support not compiled in. Rebuild with: cargo build --features metal"
            )
        }
        other => {
            anyhow::bail!("unknown device '{other}'. Supported: auto, cpu, cuda, cuda:N, metal")
        }
    }
}

/// Human-readable label for a [`Device`].
pub fn device_info(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA".to_string(),
        Device::Metal(_) => "Metal".to_string(),
    }
}
