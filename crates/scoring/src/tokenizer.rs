//! HuggingFace tokenizer wrapper.

use std::path::Path;

use tokenizers::Tokenizer;

use crate::counter::TokenCount;

/// Bidirectional text ↔ token-id mapping backed by a `tokenizer.json`.
pub struct TextTokenizer {
    inner: Tokenizer,
}

impl TextTokenizer {
    /// Load the tokenizer from a model directory containing
    /// `tokenizer.json`.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let path = model_dir.join("tokenizer.json");
        let inner = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer from {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "Tokenizer loaded");
        Ok(Self { inner })
    }

    /// Encode a prompt, including the tokenizer's special tokens
    /// (the model was trained with a leading BOS).
    pub fn encode_prompt(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenizer encode failed: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Encode a bare name with no special tokens (used for token
    /// counting: single-token names are what the recipe grammar needs).
    pub fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("tokenizer encode failed: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token ids back to text, skipping special tokens.
    pub fn decode(&self, ids: &[u32]) -> anyhow::Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("tokenizer decode failed: {e}"))
    }
}

impl TokenCount for TextTokenizer {
    fn token_count(&self, name: &str) -> anyhow::Result<usize> {
        Ok(self.encode(name)?.len())
    }
}
