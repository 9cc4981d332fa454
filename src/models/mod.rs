//! Model configuration and collaborator contracts
//!
//! This module contains:
//! - `config`: Flow-matching configuration ([`CfmConfig`])
//! - `collaborators`: Traits for the velocity model, mel extractor, vocoder
//!   and duration predictor

pub mod collaborators;
pub mod config;

pub use collaborators::{DurationPredictor, MelFeatures, VelocityInput, VelocityModel, Vocoder};
pub use config::CfmConfig;
