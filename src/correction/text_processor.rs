use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::errors::CorrectionError;

/// Handles text tokenization and detokenization for the seq2seq model
#[derive(Debug, Clone)]
pub struct TextProcessor {
    tokenizer: Tokenizer,
    max_input_tokens: usize,
    eos_token_id: u32,
}

impl TextProcessor {
    /// Wrap an already-loaded tokenizer; `eos_token_id` comes from the model config
    pub fn new(tokenizer: Tokenizer, max_input_tokens: usize, eos_token_id: u32) -> Self {
        Self {
            tokenizer,
            max_input_tokens: max_input_tokens.max(1),
            eos_token_id,
        }
    }

    /// Load a `tokenizer.json` from disk
    pub fn from_file(
        path: &Path,
        max_input_tokens: usize,
        eos_token_id: u32,
    ) -> Result<Self, CorrectionError> {
        if !path.exists() {
            return Err(CorrectionError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        info!("🔤 Loading tokenizer from: {}", path.display());
        let tokenizer = Tokenizer::from_file(path).map_err(|e| CorrectionError::TokenizationFailed {
            details: format!("could not parse {}: {}", path.display(), e),
        })?;

        Ok(Self::new(tokenizer, max_input_tokens, eos_token_id))
    }

    /// Tokenize a prompt, truncating to the input budget while keeping the end-of-sequence marker
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, CorrectionError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| CorrectionError::TokenizationFailed {
                details: e.to_string(),
            })?;

        let mut ids = encoding.get_ids().to_vec();
        if ids.len() > self.max_input_tokens {
            debug!(
                "✂️ Truncating prompt from {} to {} tokens",
                ids.len(),
                self.max_input_tokens
            );
            ids.truncate(self.max_input_tokens);
            if let Some(last) = ids.last_mut() {
                *last = self.eos_token_id;
            }
        }

        if ids.is_empty() {
            return Err(CorrectionError::TokenizationFailed {
                details: "prompt produced no tokens".to_string(),
            });
        }

        Ok(ids)
    }

    /// Detokenize generated ids, dropping special tokens
    pub fn decode(&self, token_ids: &[u32]) -> Result<String, CorrectionError> {
        self.tokenizer
            .decode(token_ids, true)
            .map_err(|e| CorrectionError::DecodingFailed {
                details: e.to_string(),
            })
    }
}
