//! The conditional flow-matching engine
//!
//! This module provides:
//! - Per-call random state via [`SamplingContext`]
//! - Validity and infilling span masks
//! - The optimal-transport flow path
//! - Classifier-free guidance over a velocity model
//! - Fixed-step Euler / midpoint ODE solvers with sway-warped time grids
//! - Output length resolution
//! - The masked training loss and the end-to-end sampling pipeline

pub mod duration;
pub mod flow;
pub mod guidance;
pub mod inputs;
pub mod loss;
pub mod mask;
pub mod ode;
pub mod pipeline;
mod sampling;

pub use duration::{seconds_to_frames, Duration, DurationResolver};
pub use flow::{interpolate, sample_flow, FlowSample};
pub use guidance::{GuidanceEngine, GUIDANCE_EPSILON};
pub use inputs::{AudioInput, TextInput};
pub use loss::{draw_dropout, masked_mse, LossOutput, TrainingLossComputer, LOSS_EPSILON};
pub use mask::{
    lens_to_mask, mask_and, mask_counts, mask_from_frac_lengths, mask_from_start_end, pad_mask,
    pad_sequence, Span,
};
pub use ode::{is_monotone, odeint, odeint_euler, odeint_midpoint, time_grid, OdeMethod, Trajectory};
pub use pipeline::{SampleOptions, SampleOutput, SampleRequest, SamplingPipeline};
pub use sampling::SamplingContext;
