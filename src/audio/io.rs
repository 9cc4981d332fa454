//! WAV I/O for reference prompts and vocoded output.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

/// Mono waveform with its sample rate.
///
/// Samples are 32-bit floats in the range \[-1.0, 1.0\].
///
/// # Example
///
/// ```rust,ignore
/// // Reference prompt for sampling
/// let prompt = AudioBuffer::load("prompt.wav")?;
/// let cond = AudioInput::Waveform(prompt.to_batch(&device)?);
///
/// // Vocoded output, one buffer per example
/// for (i, audio) in AudioBuffer::from_batch(&waveform, 24000)?.iter().enumerate() {
///     audio.save(format!("out_{i}.wav"))?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Mono audio samples in \[-1.0, 1.0\] range
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Create from a tensor of shape `[samples]` or `[1, samples]`
    pub fn from_tensor(tensor: &Tensor, sample_rate: u32) -> Result<Self> {
        let samples: Vec<f32> = tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?;
        Ok(Self::new(samples, sample_rate))
    }

    /// Split a `[b, samples]` waveform batch into one buffer per example
    pub fn from_batch(waveform: &Tensor, sample_rate: u32) -> Result<Vec<Self>> {
        let rows: Vec<Vec<f32>> = waveform.to_dtype(DType::F32)?.to_vec2()?;
        Ok(rows
            .into_iter()
            .map(|samples| Self::new(samples, sample_rate))
            .collect())
    }

    /// `[1, samples]` tensor, the layout the mel extractor takes
    pub fn to_batch(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.samples, (1, self.samples.len()), device)?)
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Save to WAV file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_wav(path, &self.samples, self.sample_rate)
    }

    /// Load from WAV file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_wav(path)
    }
}

/// Load a WAV file, averaging channels down to mono
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    Ok(AudioBuffer::new(mono, spec.sample_rate))
}

/// Save samples to a 16-bit mono WAV file
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;

    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        writer.write_sample(scaled)?;
    }

    writer.finalize()?;
    Ok(())
}
