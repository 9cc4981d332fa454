//! Audio processing utilities
//!
//! This module provides:
//! - WAV file I/O for prompts and vocoded output
//! - Log-mel feature extraction (the default mel collaborator)

mod io;
mod mel;

pub use io::{load_wav, save_wav, AudioBuffer};
pub use mel::{MelConfig, MelScale, MelSpectrogram};

