//! Classifier-free guidance over a [`VelocityModel`].

use anyhow::Result;
use candle_core::Tensor;

use crate::models::{VelocityInput, VelocityModel};

/// Guidance strengths below this skip the unconditioned pass.
pub const GUIDANCE_EPSILON: f64 = 1e-5;

/// Combines conditioned and unconditioned velocity predictions.
///
/// `v = v_cond + (v_cond - v_uncond) * strength`
pub struct GuidanceEngine<'a, M: VelocityModel + ?Sized> {
    model: &'a M,
    strength: f64,
}

impl<'a, M: VelocityModel + ?Sized> GuidanceEngine<'a, M> {
    pub fn new(model: &'a M, strength: f64) -> Self {
        Self { model, strength }
    }

    /// Guided velocity at state `x`.
    ///
    /// Runs the model once when the strength is (near) zero, twice otherwise.
    pub fn velocity(
        &self,
        x: &Tensor,
        cond: &Tensor,
        text: &Tensor,
        time: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let input = VelocityInput {
            x,
            cond,
            text,
            time,
            mask,
            drop_audio_cond: false,
            drop_text: false,
        };
        let pred = self.model.predict(&input)?;
        if self.strength < GUIDANCE_EPSILON {
            return Ok(pred);
        }

        let null_pred = self.model.predict(&VelocityInput {
            drop_audio_cond: true,
            drop_text: true,
            ..input
        })?;
        let delta = ((&pred - &null_pred)? * self.strength)?;
        Ok((pred + delta)?)
    }
}
