//! Validity masks, infilling span masks, and sequence padding.
//!
//! Masks are `U8` tensors of shape `[batch, length]` where `1` marks a
//! position that is set.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

use super::sampling::SamplingContext;

/// Build a validity mask: row `i` is set exactly on positions `< lens[i]`.
///
/// When `length` is `None` the mask is as wide as the longest length.
pub fn lens_to_mask(lens: &[usize], length: Option<usize>, device: &Device) -> Result<Tensor> {
    let length = length.unwrap_or_else(|| lens.iter().copied().max().unwrap_or(0));
    let mut data = vec![0u8; lens.len() * length];
    for (row, &len) in lens.iter().enumerate() {
        let end = len.min(length);
        data[row * length..row * length + end].fill(1);
    }
    Ok(Tensor::from_vec(data, (lens.len(), length), device)?)
}

/// Mark `[start, end)` per example in a `[batch, max_length]` mask.
pub fn mask_from_start_end(
    starts: &[usize],
    ends: &[usize],
    max_length: usize,
    device: &Device,
) -> Result<Tensor> {
    anyhow::ensure!(
        starts.len() == ends.len(),
        "start/end batch mismatch: {} vs {}",
        starts.len(),
        ends.len()
    );
    let mut data = vec![0u8; starts.len() * max_length];
    for (row, (&start, &end)) in starts.iter().zip(ends.iter()).enumerate() {
        let end = end.min(max_length);
        if start < end {
            data[row * max_length + start..row * max_length + end].fill(1);
        }
    }
    Ok(Tensor::from_vec(data, (starts.len(), max_length), device)?)
}

/// Span chosen for one example by [`mask_from_frac_lengths`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    /// Fraction of the valid length drawn for this example.
    pub frac: f32,
    /// First masked position.
    pub start: usize,
    /// Number of masked positions.
    pub len: usize,
}

/// Random contiguous infilling spans, one per example.
///
/// For each example a fraction `f` is drawn uniformly from `frac_range`, the
/// span length is `round(f * len)` and its start is drawn uniformly from
/// `[0, len - span_len]`. A zero length yields an empty span. The returned
/// mask never exceeds the example's valid length, but callers still
/// intersect it with the validity mask before use.
pub fn mask_from_frac_lengths(
    lens: &[usize],
    frac_range: (f32, f32),
    max_length: usize,
    ctx: &mut SamplingContext,
    device: &Device,
) -> Result<(Tensor, Vec<Span>)> {
    let (low, high) = frac_range;
    let mut spans = Vec::with_capacity(lens.len());
    for &len in lens {
        let frac = ctx.uniform_range(low, high);
        let span_len = ((frac * len as f32).round() as usize).min(len);
        let start = ctx.index_inclusive(len - span_len);
        spans.push(Span {
            frac,
            start,
            len: span_len,
        });
    }

    let starts: Vec<usize> = spans.iter().map(|s| s.start).collect();
    let ends: Vec<usize> = spans.iter().map(|s| s.start + s.len).collect();
    let mask = mask_from_start_end(&starts, &ends, max_length, device)?;
    Ok((mask, spans))
}

/// Elementwise AND of two `U8` masks with identical shapes.
pub fn mask_and(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(a.mul(b)?)
}

/// Resize a `[batch, n]` mask to `[batch, length]`, padding with unset positions.
pub fn pad_mask(mask: &Tensor, length: usize) -> Result<Tensor> {
    let current = mask.dim(1)?;
    let mask = mask.to_dtype(DType::U8)?;
    if current >= length {
        return Ok(mask.narrow(1, 0, length)?);
    }
    Ok(mask.pad_with_zeros(1, 0, length - current)?)
}

/// Stack `[n_i, d]` tensors into `[batch, max n_i, d]`, padding with zeros.
pub fn pad_sequence(items: &[Tensor]) -> Result<Tensor> {
    anyhow::ensure!(!items.is_empty(), "pad_sequence needs at least one tensor");
    let max_len = items
        .iter()
        .map(|t| t.dim(0))
        .collect::<candle_core::Result<Vec<_>>>()?
        .into_iter()
        .max()
        .unwrap_or(0);

    let padded = items
        .iter()
        .map(|t| {
            let len = t.dim(0)?;
            t.pad_with_zeros(0, 0, max_len - len)
        })
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(Tensor::stack(&padded, 0)?)
}

/// Number of set positions per row of a `[batch, n]` mask.
pub fn mask_counts(mask: &Tensor) -> Result<Vec<usize>> {
    let rows: Vec<Vec<u8>> = mask.to_dtype(DType::U8)?.to_vec2()?;
    Ok(rows
        .iter()
        .map(|row| row.iter().filter(|&&v| v != 0).count())
        .collect())
}
