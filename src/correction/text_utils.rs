use tracing::debug;

/// Placeholder substituted with the user's sentence in prompt templates
pub const SENTENCE_PLACEHOLDER: &str = "{sentence}";

/// Utilities for prompt construction and output cleanup
pub struct TextUtils;

impl TextUtils {
    /// True for the empty string and whitespace-only input
    pub fn is_blank(text: &str) -> bool {
        text.trim().is_empty()
    }

    /// Wrap a sentence in the task prompt
    pub fn build_prompt(template: &str, sentence: &str) -> String {
        if template.contains(SENTENCE_PLACEHOLDER) {
            template.replace(SENTENCE_PLACEHOLDER, sentence)
        } else {
            format!("{} {}", template.trim_end(), sentence)
        }
    }

    /// Clean up decoded model output
    pub fn post_process_text(decoded: &str) -> String {
        let cleaned = Self::normalize_text(decoded);
        if cleaned.len() != decoded.len() {
            debug!("🔧 Post-processing trimmed {} bytes", decoded.len() - cleaned.len());
        }
        cleaned
    }

    /// Trim and collapse runs of whitespace into single spaces
    pub fn normalize_text(text: &str) -> String {
        text.split_whitespace().collect::<Vec<&str>>().join(" ")
    }
}
