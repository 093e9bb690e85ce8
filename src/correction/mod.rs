//! Grammar correction modules
//!
//! - `errors`: structured error types for loading and inference
//! - `corrector`: background model lifecycle and the `correct` operation
//! - `model_manager`: artifact resolution (local directory or hub) and the T5 model
//! - `beam_search`: backend-independent beam-search decoding
//! - `text_processor`: tokenization and detokenization
//! - `text_utils`: prompt construction and output cleanup

pub mod beam_search;
pub mod corrector;
pub mod errors;
pub mod model_manager;
pub mod text_processor;
pub mod text_utils;

pub use corrector::{CorrectionModel, CorrectionResult, GrammarCorrector, ModelLoader, ModelState};
pub use errors::CorrectionError;
pub use model_manager::{ModelArtifacts, ModelManager, T5GrammarModel};
pub use text_processor::TextProcessor;
pub use text_utils::TextUtils;
