//! Optimal-transport probability path between noise and target features.
//!
//! `x_t = (1 - t) * x0 + t * x1`, with target velocity `x1 - x0`.

use anyhow::Result;
use candle_core::{DType, Tensor};

use super::sampling::SamplingContext;

/// One draw from the flow: noise, time, interpolated state, target velocity.
#[derive(Debug, Clone)]
pub struct FlowSample {
    /// Gaussian noise `x0`, same shape as the target.
    pub x0: Tensor,
    /// Time per example, shape `[batch]`.
    pub time: Tensor,
    /// Interpolated state `x_t`.
    pub xt: Tensor,
    /// Target velocity `x1 - x0`.
    pub flow: Tensor,
}

/// Interpolate between `x0` and `x1` at per-example times `time` (`[batch]`).
///
/// Returns `(x_t, x1 - x0)`.
pub fn interpolate(x0: &Tensor, x1: &Tensor, time: &Tensor) -> Result<(Tensor, Tensor)> {
    let t = time.to_dtype(x1.dtype())?.reshape((time.dim(0)?, 1, 1))?;
    let one_minus_t = t.affine(-1.0, 1.0)?;
    let xt = (x0.broadcast_mul(&one_minus_t)? + x1.broadcast_mul(&t)?)?;
    let flow = (x1 - x0)?;
    Ok((xt, flow))
}

/// Draw noise and times for a `[batch, len, channels]` target and build the flow state.
pub fn sample_flow(x1: &Tensor, ctx: &mut SamplingContext) -> Result<FlowSample> {
    let batch = x1.dim(0)?;
    let x0 = ctx.randn(x1.shape().clone(), x1.device())?.to_dtype(x1.dtype())?;
    let times = ctx.uniform_vec(batch, 0.0, 1.0);
    let time = Tensor::from_vec(times, batch, x1.device())?.to_dtype(DType::F32)?;
    let (xt, flow) = interpolate(&x0, x1, &time)?;
    Ok(FlowSample { x0, time, xt, flow })
}
