//! Text tokenization for the flow-matching engine
//!
//! Text reaches the velocity model as an I64 `[b, nt]` tensor of character
//! ids, right-padded with [`PAD_ID`].

mod text;

pub use text::{pad_ids, text_lens, CharVocab, UNKNOWN_ID};

/// Padding id for text tensors
pub const PAD_ID: i64 = -1;
