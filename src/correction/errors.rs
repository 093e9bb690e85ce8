/// Errors that can occur while loading the grammar model or running a correction
#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("Model artifact not found: {path}")]
    ModelNotFound { path: String },

    #[error("Failed to load model {model}: {details}")]
    ModelLoadFailed { model: String, details: String },

    #[error("Failed to fetch {file} for {model}: {details}")]
    ArtifactFetchFailed {
        model: String,
        file: String,
        details: String,
    },

    #[error("Model loader panicked: {details}")]
    LoaderPanicked { details: String },

    #[error("Tokenization failed: {details}")]
    TokenizationFailed { details: String },

    #[error("Inference failed: {details}")]
    InferenceFailed { details: String },

    #[error("Failed to decode model output: {details}")]
    DecodingFailed { details: String },

    #[error("IO error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl From<candle_core::Error> for CorrectionError {
    fn from(err: candle_core::Error) -> Self {
        CorrectionError::InferenceFailed {
            details: err.to_string(),
        }
    }
}

/// Render a panic payload caught with `catch_unwind` as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
