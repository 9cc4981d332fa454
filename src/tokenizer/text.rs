//! Character-level text vocabulary.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::Path;

use super::PAD_ID;

/// Id assigned to characters missing from the vocabulary.
pub const UNKNOWN_ID: i64 = 0;

/// Maps characters to ids; a character's id is its line index in `vocab.txt`.
#[derive(Debug, Clone, Default)]
pub struct CharVocab {
    map: HashMap<String, i64>,
}

impl CharVocab {
    /// Build from an ordered token list; a repeated token keeps its last index
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for (i, token) in tokens.into_iter().enumerate() {
            map.insert(token.into(), i as i64);
        }
        Self { map }
    }

    /// Load a `vocab.txt`, one token per line
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocab from {}", path.display()))?;
        // Keep a trailing-space token such as " " intact; only strip line endings
        let vocab = Self::from_tokens(content.lines().map(|l| l.trim_end_matches('\r')));
        anyhow::ensure!(!vocab.is_empty(), "Vocab at {} is empty", path.display());
        tracing::debug!("Loaded vocab with {} entries", vocab.len());
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn token_to_id(&self, token: &str) -> Option<i64> {
        self.map.get(token).copied()
    }

    /// Ids for one string; unknown characters map to [`UNKNOWN_ID`]
    pub fn encode(&self, text: &str) -> Vec<i64> {
        let mut buf = [0u8; 4];
        text.chars()
            .map(|c| {
                self.map
                    .get(c.encode_utf8(&mut buf) as &str)
                    .copied()
                    .unwrap_or(UNKNOWN_ID)
            })
            .collect()
    }

    /// `[b, nt]` id tensor padded with [`PAD_ID`]
    pub fn encode_batch(&self, texts: &[String], device: &Device) -> Result<Tensor> {
        let rows: Vec<Vec<i64>> = texts.iter().map(|t| self.encode(t)).collect();
        pad_ids(&rows, device)
    }

    /// Fallback without a vocabulary: UTF-8 bytes as ids, padded with [`PAD_ID`]
    pub fn bytes_batch(texts: &[String], device: &Device) -> Result<Tensor> {
        let rows: Vec<Vec<i64>> = texts
            .iter()
            .map(|t| t.bytes().map(i64::from).collect())
            .collect();
        pad_ids(&rows, device)
    }
}

/// Right-pad id rows with [`PAD_ID`] into an I64 `[b, max_len]` tensor
pub fn pad_ids(rows: &[Vec<i64>], device: &Device) -> Result<Tensor> {
    let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(rows.len() * max_len);
    for row in rows {
        let start = flat.len();
        flat.extend_from_slice(row);
        flat.resize(start + max_len, PAD_ID);
    }
    Ok(Tensor::from_vec(flat, (rows.len(), max_len), device)?)
}

/// Number of non-pad ids per row of an I64 `[b, nt]` tensor
pub fn text_lens(text: &Tensor) -> Result<Vec<usize>> {
    let rows: Vec<Vec<i64>> = text.to_vec2()?;
    Ok(rows
        .iter()
        .map(|row| row.iter().filter(|&&id| id != PAD_ID).count())
        .collect())
}
