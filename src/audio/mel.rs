//! Mel-spectrogram computation
//!
//! Log-magnitude mel features in the layout the flow model trains on:
//! 24 kHz audio, 1024-point FFT, hop 256, 100 HTK mel bands.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use num_complex::Complex;
use rustfft::{num_complex::Complex as FftComplex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::models::MelFeatures;

/// Floor applied before taking the log of mel magnitudes
const LOG_FLOOR: f32 = 1e-5;

/// Frequency warping used to place the mel filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelScale {
    /// `2595 * log10(1 + f / 700)`, unnormalized triangles
    #[default]
    Htk,
    /// Slaney / O'Shaughnessy, area-normalized triangles (librosa default)
    Slaney,
}

/// Configuration for mel spectrogram computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MelConfig {
    /// Sample rate of input audio
    pub sample_rate: u32,
    /// FFT window size
    pub n_fft: usize,
    /// Hop length between frames
    pub hop_length: usize,
    /// Window length (defaults to n_fft)
    pub win_length: Option<usize>,
    /// Number of mel bands
    pub n_mels: usize,
    /// Minimum frequency for mel filterbank
    pub fmin: f32,
    /// Maximum frequency for mel filterbank (defaults to sample_rate / 2)
    pub fmax: Option<f32>,
    /// Mel scale
    pub mel_scale: MelScale,
    /// Reflect-pad by `n_fft / 2` on both sides (`torch.stft(center=True)`);
    /// otherwise pad by `(n_fft - hop_length) / 2`.
    pub center: bool,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            n_fft: 1024,
            hop_length: 256,
            win_length: None,
            n_mels: 100,
            fmin: 0.0,
            fmax: None,
            mel_scale: MelScale::Htk,
            center: true,
        }
    }
}

/// Mel-spectrogram extractor
pub struct MelSpectrogram {
    config: MelConfig,
    /// Precomputed mel filterbank
    mel_basis: Vec<Vec<f32>>,
    /// Precomputed Hann window
    window: Vec<f32>,
}

impl MelSpectrogram {
    /// Create a new mel spectrogram extractor
    pub fn new(config: MelConfig) -> Self {
        let win_length = config.win_length.unwrap_or(config.n_fft);
        let fmax = config.fmax.unwrap_or(config.sample_rate as f32 / 2.0);

        let mel_basis = Self::create_mel_filterbank(
            config.sample_rate,
            config.n_fft,
            config.n_mels,
            config.fmin,
            fmax,
            config.mel_scale,
        );
        let window = Self::hann_window(win_length);

        Self {
            config,
            mel_basis,
            window,
        }
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// Log of the clamped magnitude mel spectrum, `[frames][n_mels]`.
    ///
    /// These are the features the flow model is trained on.
    pub fn compute_log_magnitude(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mag_spec: Vec<Vec<f32>> = self
            .stft(samples)
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .map(|c| (c.re * c.re + c.im * c.im + 1e-9).sqrt())
                    .collect()
            })
            .collect();

        self.apply_mel_filterbank(&mag_spec)
            .into_iter()
            .map(|frame| frame.into_iter().map(|v| v.max(LOG_FLOOR).ln()).collect())
            .collect()
    }

    /// Log-magnitude mel features as a `[n_mels, n_frames]` tensor
    pub fn compute_tensor(&self, samples: &[f32], device: &Device) -> Result<Tensor> {
        let mel = self.compute_log_magnitude(samples);
        let n_frames = mel.len();
        let n_mels = self.config.n_mels;

        let flat: Vec<f32> = mel.into_iter().flatten().collect();
        let tensor = Tensor::from_vec(flat, (n_frames, n_mels), device)?.t()?; // [n_mels, n_frames]
        Ok(tensor)
    }

    /// Number of frames produced for `n_samples` input samples.
    pub fn num_frames(&self, n_samples: usize) -> usize {
        if n_samples == 0 {
            return 0;
        }
        let padded = (n_samples + 2 * self.pad_length()).max(self.config.n_fft);
        (padded - self.config.n_fft) / self.config.hop_length + 1
    }

    fn pad_length(&self) -> usize {
        if self.config.center {
            self.config.n_fft / 2
        } else {
            self.config.n_fft.saturating_sub(self.config.hop_length) / 2
        }
    }

    /// Short-time Fourier transform
    fn stft(&self, samples: &[f32]) -> Vec<Vec<Complex<f32>>> {
        if samples.is_empty() {
            return Vec::new();
        }
        let n_fft = self.config.n_fft;
        let hop_length = self.config.hop_length;
        let win_length = self.window.len();
        let pad_length = self.pad_length();

        let mut padded = Vec::with_capacity(pad_length + samples.len() + pad_length);

        // Left reflect padding: mirror from position 1 outward
        for i in (1..=pad_length).rev() {
            let idx = if i < samples.len() {
                i
            } else {
                samples.len() - 1
            };
            padded.push(samples[idx]);
        }
        padded.extend_from_slice(samples);
        // Right reflect padding: mirror from position len-2 inward
        for i in 0..pad_length {
            let idx = if samples.len() >= 2 + i {
                samples.len() - 2 - i
            } else {
                0
            };
            padded.push(samples[idx]);
        }
        if padded.len() < n_fft {
            padded.resize(n_fft, 0.0);
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n_fft);

        // Center the window inside the FFT frame when it is shorter
        let offset = n_fft.saturating_sub(win_length) / 2;
        let n_frames = (padded.len() - n_fft) / hop_length + 1;
        let mut result = Vec::with_capacity(n_frames);

        for i in 0..n_frames {
            let start = i * hop_length;

            let mut buffer: Vec<FftComplex<f32>> = (0..n_fft)
                .map(|j| {
                    let w = j
                        .checked_sub(offset)
                        .and_then(|k| self.window.get(k))
                        .copied()
                        .unwrap_or(0.0);
                    FftComplex::new(padded[start + j] * w, 0.0)
                })
                .collect();

            fft.process(&mut buffer);

            // Positive frequencies only (n_fft/2 + 1)
            let frame: Vec<Complex<f32>> = buffer
                .iter()
                .take(n_fft / 2 + 1)
                .map(|c| Complex::new(c.re, c.im))
                .collect();

            result.push(frame);
        }

        result
    }

    /// Apply mel filterbank to a (power or magnitude) spectrogram
    fn apply_mel_filterbank(&self, spec: &[Vec<f32>]) -> Vec<Vec<f32>> {
        spec.iter()
            .map(|frame| {
                self.mel_basis
                    .iter()
                    .map(|filter| filter.iter().zip(frame.iter()).map(|(f, p)| f * p).sum())
                    .collect()
            })
            .collect()
    }

    fn hz_to_mel(f: f32, scale: MelScale) -> f32 {
        match scale {
            MelScale::Htk => 2595.0 * (1.0 + f / 700.0).log10(),
            MelScale::Slaney => {
                const F_SP: f32 = 200.0 / 3.0; // 66.667 Hz per mel below break
                const MIN_LOG_HZ: f32 = 1000.0;
                const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP; // 15.0
                const LOGSTEP: f32 = 0.068_751_74; // ln(6.4) / 27

                if f < MIN_LOG_HZ {
                    f / F_SP
                } else {
                    MIN_LOG_MEL + (f / MIN_LOG_HZ).ln() / LOGSTEP
                }
            }
        }
    }

    fn mel_to_hz(m: f32, scale: MelScale) -> f32 {
        match scale {
            MelScale::Htk => 700.0 * (10f32.powf(m / 2595.0) - 1.0),
            MelScale::Slaney => {
                const F_SP: f32 = 200.0 / 3.0;
                const MIN_LOG_HZ: f32 = 1000.0;
                const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;
                const LOGSTEP: f32 = 0.068_751_74;

                if m < MIN_LOG_MEL {
                    m * F_SP
                } else {
                    MIN_LOG_HZ * ((m - MIN_LOG_MEL) * LOGSTEP).exp()
                }
            }
        }
    }

    /// Triangular filterbank, `[n_mels][n_fft / 2 + 1]`.
    ///
    /// Slaney filters are area-normalized; HTK filters keep unit peaks.
    fn create_mel_filterbank(
        sample_rate: u32,
        n_fft: usize,
        n_mels: usize,
        fmin: f32,
        fmax: f32,
        scale: MelScale,
    ) -> Vec<Vec<f32>> {
        let n_freqs = n_fft / 2 + 1;

        let mel_min = Self::hz_to_mel(fmin, scale);
        let mel_max = Self::hz_to_mel(fmax, scale);
        let hz_points: Vec<f32> = (0..=n_mels + 1)
            .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
            .map(|m| Self::mel_to_hz(m, scale))
            .collect();

        let fft_freqs: Vec<f32> = (0..n_freqs)
            .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
            .collect();

        let mut filterbank = vec![vec![0.0f32; n_freqs]; n_mels];

        for (i, filter) in filterbank.iter_mut().enumerate() {
            let f_lower = hz_points[i];
            let f_center = hz_points[i + 1];
            let f_upper = hz_points[i + 2];

            for (j, &freq) in fft_freqs.iter().enumerate() {
                if freq >= f_lower && freq <= f_center && f_center > f_lower {
                    filter[j] = (freq - f_lower) / (f_center - f_lower);
                } else if freq > f_center && freq <= f_upper && f_upper > f_center {
                    filter[j] = (f_upper - freq) / (f_upper - f_center);
                }
            }

            if scale == MelScale::Slaney {
                let band_width = f_upper - f_lower;
                if band_width > 0.0 {
                    let enorm = 2.0 / band_width;
                    for val in filter.iter_mut() {
                        *val *= enorm;
                    }
                }
            }
        }

        filterbank
    }

    /// Create Hann window
    fn hann_window(length: usize) -> Vec<f32> {
        (0..length)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / length as f32).cos()))
            .collect()
    }
}

impl MelFeatures for MelSpectrogram {
    /// Batched log-magnitude mel features: `[b, samples]` -> `[b, n_mels, n]`.
    fn mel(&self, waveform: &Tensor) -> Result<Tensor> {
        let waveform = match waveform.rank() {
            1 => waveform.unsqueeze(0)?,
            2 => waveform.clone(),
            r => anyhow::bail!("expected a [batch, samples] waveform, got rank {r}"),
        };
        let rows: Vec<Vec<f32>> = waveform.to_dtype(DType::F32)?.to_vec2()?;
        let device = waveform.device();
        let feats = rows
            .iter()
            .map(|row| self.compute_tensor(row, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&feats, 0)?)
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn hop_length(&self) -> usize {
        self.config.hop_length
    }

    fn n_mels(&self) -> usize {
        self.config.n_mels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / 24000.0).sin())
            .collect()
    }

    #[test]
    fn test_mel_config_default() {
        let config = MelConfig::default();
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.n_fft, 1024);
        assert_eq!(config.hop_length, 256);
        assert_eq!(config.n_mels, 100);
        assert_eq!(config.mel_scale, MelScale::Htk);
        assert!(config.center);
    }

    #[test]
    fn test_mel_config_partial_json() {
        let config: MelConfig =
            serde_json::from_str(r#"{"n_mels": 80, "mel_scale": "slaney"}"#).unwrap();
        assert_eq!(config.n_mels, 80);
        assert_eq!(config.mel_scale, MelScale::Slaney);
        assert_eq!(config.n_fft, 1024);
    }

    #[test]
    fn test_hann_window() {
        let window = MelSpectrogram::hann_window(4);
        assert_eq!(window.len(), 4);
        assert!((window[0] - 0.0).abs() < 1e-6);
        assert!((window[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_htk_scale_roundtrip() {
        for hz in [0.0f32, 440.0, 1000.0, 8000.0] {
            let mel = MelSpectrogram::hz_to_mel(hz, MelScale::Htk);
            let back = MelSpectrogram::mel_to_hz(mel, MelScale::Htk);
            assert!((back - hz).abs() < 0.5, "{hz} -> {back}");
        }
    }

    #[test]
    fn test_mel_filterbank_shape() {
        let mel = MelSpectrogram::new(MelConfig::default());
        assert_eq!(mel.mel_basis.len(), 100);
        assert_eq!(mel.mel_basis[0].len(), 513); // n_fft/2 + 1 = 1024/2 + 1
    }

    #[test]
    fn test_mel_filterbank_triangular() {
        for scale in [MelScale::Htk, MelScale::Slaney] {
            let mel = MelSpectrogram::new(MelConfig {
                n_mels: 8,
                mel_scale: scale,
                ..Default::default()
            });
            for filter in &mel.mel_basis {
                assert!(filter.iter().all(|&v| v >= 0.0));
                assert!(filter.iter().any(|&v| v > 0.0));
            }
        }
    }

    #[test]
    fn test_num_frames_matches_stft() {
        let mel = MelSpectrogram::new(MelConfig::default());
        for n in [1usize, 100, 256, 24000] {
            let frames = mel.compute_log_magnitude(&vec![0.1f32; n]).len();
            assert_eq!(frames, mel.num_frames(n), "n = {n}");
        }
        // centered: one frame per hop plus one
        assert_eq!(mel.num_frames(24000), 24000 / 256 + 1);
        assert_eq!(mel.num_frames(0), 0);
    }

    #[test]
    fn test_compute_mel_silence_hits_floor() {
        let mel = MelSpectrogram::new(MelConfig::default());
        let result = mel.compute_log_magnitude(&vec![0.0f32; 4800]);
        assert!(!result.is_empty());
        assert_eq!(result[0].len(), 100);
        // sqrt(1e-9) per bin keeps silence near the floor
        for frame in &result {
            for &val in frame {
                assert!(val < -4.0);
            }
        }
    }

    #[test]
    fn test_sine_rises_above_silence() {
        let mel = MelSpectrogram::new(MelConfig::default());
        let silence = mel.compute_log_magnitude(&vec![0.0f32; 24000]);
        let tone = mel.compute_log_magnitude(&sine(440.0, 24000));
        let peak = |frames: &[Vec<f32>]| {
            frames
                .iter()
                .flat_map(|frame| frame.iter().copied())
                .fold(f32::NEG_INFINITY, f32::max)
        };
        assert!(peak(&tone) > peak(&silence) + 1.0);
    }

    #[test]
    fn test_compute_tensor_layout() {
        let mel = MelSpectrogram::new(MelConfig::default());
        let tensor = mel.compute_tensor(&vec![0.0f32; 4800], &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[100, mel.num_frames(4800)]);
    }

    #[test]
    fn test_batched_mel_features() {
        let device = Device::Cpu;
        let mel = MelSpectrogram::new(MelConfig::default());
        let mut samples = sine(440.0, 2400);
        samples.extend(sine(880.0, 2400));
        let wave = Tensor::from_vec(samples, (2, 2400), &device).unwrap();

        let feats = mel.mel(&wave).unwrap();
        assert_eq!(feats.dims(), &[2, 100, mel.num_frames(2400)]);
        assert_eq!(MelFeatures::sample_rate(&mel), 24000);
        assert_eq!(MelFeatures::hop_length(&mel), 256);
        assert_eq!(MelFeatures::n_mels(&mel), 100);
    }

    #[test]
    fn test_batched_mel_rejects_features() {
        let mel = MelSpectrogram::new(MelConfig::default());
        let feats = Tensor::zeros((1, 4, 100), DType::F32, &Device::Cpu).unwrap();
        assert!(mel.mel(&feats).is_err());
    }
}
