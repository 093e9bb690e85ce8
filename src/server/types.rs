use serde::{Deserialize, Serialize};

/// Body of every `/correct` response, tagged by `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CorrectionResponse {
    Success {
        corrected_sentence: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debug_info: Option<DebugInfo>,
    },
    Error {
        message: String,
    },
    Loading,
}

impl CorrectionResponse {
    pub fn success(corrected_sentence: impl Into<String>) -> Self {
        CorrectionResponse::Success {
            corrected_sentence: corrected_sentence.into(),
            debug_info: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CorrectionResponse::Error {
            message: message.into(),
        }
    }
}

/// Returned alongside a success when the request sets `"debug": true`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugInfo {
    pub original_sentence: String,
    pub corrected_sentence: String,
    pub model_name: String,
    pub input_text: String,
    pub model_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
