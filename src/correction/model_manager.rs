use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::t5;
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use tracing::{debug, info, warn};

use super::beam_search::{beam_search, BeamSearchParams, StepDecoder};
use super::corrector::{CorrectionModel, ModelLoader};
use super::errors::CorrectionError;
use super::text_processor::TextProcessor;
use super::text_utils::TextUtils;
use crate::config::Config;

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Weight formats the candle backend cannot read; skipped when provisioning.
const SKIPPED_SUFFIXES: &[&str] = &[".bin", ".h5", ".msgpack", ".ot", ".onnx", ".pt"];

/// Local paths to everything needed to build the model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifacts {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Resolves model artifacts (local directory first, then the hub) and builds the model
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_id: String,
    revision: String,
    model_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    max_input_tokens: usize,
    max_output_tokens: usize,
    num_beams: usize,
}

impl ModelManager {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_id: config.model_id.clone(),
            revision: config.revision.clone(),
            model_dir: config.model_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            max_input_tokens: config.max_input_tokens,
            max_output_tokens: config.max_output_tokens,
            num_beams: config.num_beams,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Find the artifacts, preferring a complete pre-fetched directory
    pub fn resolve_artifacts(&self) -> Result<ModelArtifacts, CorrectionError> {
        if let Some(dir) = &self.model_dir {
            match Self::local_artifacts(dir)? {
                Some(artifacts) => {
                    info!("📦 Using pre-fetched model from: {}", dir.display());
                    return Ok(artifacts);
                }
                None => warn!(
                    "⚠️ {} does not hold a complete model, falling back to the hub",
                    dir.display()
                ),
            }
        }

        self.fetch_from_hub()
    }

    /// Artifacts from a local directory, or `None` when something is missing
    pub fn local_artifacts(dir: &Path) -> Result<Option<ModelArtifacts>, CorrectionError> {
        let config = dir.join(CONFIG_FILE);
        let tokenizer = dir.join(TOKENIZER_FILE);
        if !config.is_file() || !tokenizer.is_file() {
            return Ok(None);
        }

        let single = dir.join(WEIGHTS_FILE);
        let weights = if single.is_file() {
            vec![single]
        } else {
            let index = dir.join(WEIGHTS_INDEX_FILE);
            if !index.is_file() {
                return Ok(None);
            }
            let shards: Vec<PathBuf> = weight_shards(&index)?
                .into_iter()
                .map(|shard| dir.join(shard))
                .collect();
            if shards.iter().any(|shard| !shard.is_file()) {
                return Ok(None);
            }
            shards
        };

        Ok(Some(ModelArtifacts {
            config,
            tokenizer,
            weights,
        }))
    }

    fn hub_repo(&self) -> Result<ApiRepo, CorrectionError> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(cache_dir) = &self.cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        let api = builder.build().map_err(|e| CorrectionError::ModelLoadFailed {
            model: self.model_id.clone(),
            details: format!("HuggingFace API error: {}", e),
        })?;

        Ok(api.repo(Repo::with_revision(
            self.model_id.clone(),
            RepoType::Model,
            self.revision.clone(),
        )))
    }

    fn fetch(&self, repo: &ApiRepo, file: &str) -> Result<PathBuf, CorrectionError> {
        debug!("⬇️ Fetching {} from {}", file, self.model_id);
        repo.get(file).map_err(|e| CorrectionError::ArtifactFetchFailed {
            model: self.model_id.clone(),
            file: file.to_string(),
            details: e.to_string(),
        })
    }

    fn fetch_from_hub(&self) -> Result<ModelArtifacts, CorrectionError> {
        info!("🌐 Resolving {}@{} from the hub", self.model_id, self.revision);
        let repo = self.hub_repo()?;

        let config = self.fetch(&repo, CONFIG_FILE)?;
        let tokenizer = self.fetch(&repo, TOKENIZER_FILE)?;
        let weights = match self.fetch(&repo, WEIGHTS_FILE) {
            Ok(path) => vec![path],
            Err(single_err) => {
                debug!("No single weights file ({}), trying sharded index", single_err);
                let index = self.fetch(&repo, WEIGHTS_INDEX_FILE)?;
                weight_shards(&index)?
                    .iter()
                    .map(|shard| self.fetch(&repo, shard))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(ModelArtifacts {
            config,
            tokenizer,
            weights,
        })
    }

    /// Copy every loadable file of the repository into `target_dir`.
    ///
    /// Files already present in the hub cache are not downloaded again. Returns
    /// the number of files written.
    pub fn snapshot_to(&self, target_dir: &Path) -> Result<usize, CorrectionError> {
        let repo = self.hub_repo()?;
        let info = repo.info().map_err(|e| CorrectionError::ArtifactFetchFailed {
            model: self.model_id.clone(),
            file: "repository listing".to_string(),
            details: e.to_string(),
        })?;

        fs::create_dir_all(target_dir)?;
        let mut written = 0;
        for sibling in info.siblings {
            let name = sibling.rfilename;
            if SKIPPED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
                debug!("Skipping {}", name);
                continue;
            }

            let cached = self.fetch(&repo, &name)?;
            let destination = target_dir.join(&name);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&cached, &destination)?;
            info!("📥 {}", destination.display());
            written += 1;
        }

        Ok(written)
    }

    /// Resolve artifacts and build the generation model
    pub fn load_model(&self) -> Result<T5GrammarModel, CorrectionError> {
        let artifacts = self.resolve_artifacts()?;
        T5GrammarModel::load(
            &self.model_id,
            &artifacts,
            self.max_input_tokens,
            self.max_output_tokens,
            self.num_beams,
        )
    }
}

impl ModelLoader for ModelManager {
    fn load(&self) -> Result<Arc<dyn CorrectionModel>, CorrectionError> {
        let model = self.load_model()?;
        Ok(Arc::new(model))
    }
}

/// Distinct shard file names listed in a safetensors index
pub fn weight_shards(index_path: &Path) -> Result<Vec<String>, CorrectionError> {
    let raw = fs::read_to_string(index_path)?;
    let index: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| CorrectionError::ModelLoadFailed {
            model: index_path.display().to_string(),
            details: format!("invalid weights index: {}", e),
        })?;

    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| CorrectionError::ModelLoadFailed {
            model: index_path.display().to_string(),
            details: "weights index has no weight_map".to_string(),
        })?;

    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    Ok(shards.into_iter().collect())
}

/// T5 encoder-decoder and its tokenizer, published together once loaded
pub struct T5GrammarModel {
    model: t5::T5ForConditionalGeneration,
    text: TextProcessor,
    device: Device,
    search: BeamSearchParams,
}

impl T5GrammarModel {
    pub fn load(
        model_id: &str,
        artifacts: &ModelArtifacts,
        max_input_tokens: usize,
        max_output_tokens: usize,
        num_beams: usize,
    ) -> Result<Self, CorrectionError> {
        let load_failed = |details: String| CorrectionError::ModelLoadFailed {
            model: model_id.to_string(),
            details,
        };

        let raw_config = fs::read_to_string(&artifacts.config)?;
        let mut config: t5::Config = serde_json::from_str(&raw_config)
            .map_err(|e| load_failed(format!("invalid {}: {}", CONFIG_FILE, e)))?;
        let eos_token_id = config.eos_token_id as u32;
        let text = TextProcessor::from_file(&artifacts.tokenizer, max_input_tokens, eos_token_id)?;
        // Every request decodes the full prefix on a cheap clone of the model,
        // so the clones never share a KV cache.
        config.use_cache = false;

        let device = Device::Cpu;
        info!(
            "🧠 Mapping {} weight file(s) for {}",
            artifacts.weights.len(),
            model_id
        );
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&artifacts.weights, DType::F32, &device)
        }
        .map_err(|e| load_failed(format!("could not map weights: {}", e)))?;
        let model = t5::T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| load_failed(format!("could not build T5 model: {}", e)))?;

        let decoder_start_token_id = config
            .decoder_start_token_id
            .unwrap_or(config.pad_token_id) as u32;

        Ok(Self {
            model,
            text,
            device,
            search: BeamSearchParams {
                num_beams: num_beams.max(1),
                max_new_tokens: max_output_tokens.max(1),
                decoder_start_token_id,
                eos_token_id,
                length_penalty: 1.0,
            },
        })
    }
}

impl CorrectionModel for T5GrammarModel {
    fn generate(&self, prompt: &str) -> Result<String, CorrectionError> {
        let input_ids = self.text.encode(prompt)?;
        debug!("📝 Prompt encoded into {} tokens", input_ids.len());

        let mut model = self.model.clone();
        let input = Tensor::new(input_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let encoder_output = model.encode(&input)?;

        let mut step = T5Step {
            model: &mut model,
            encoder_output: &encoder_output,
            device: &self.device,
        };
        let output_ids = beam_search(&mut step, &self.search)?;
        debug!("🤖 Generated {} tokens", output_ids.len());

        let decoded = self.text.decode(&output_ids)?;
        Ok(TextUtils::post_process_text(&decoded))
    }
}

struct T5Step<'a> {
    model: &'a mut t5::T5ForConditionalGeneration,
    encoder_output: &'a Tensor,
    device: &'a Device,
}

impl StepDecoder for T5Step<'_> {
    fn next_log_probs(&mut self, prefix: &[u32]) -> Result<Vec<f32>, CorrectionError> {
        let decoder_input = Tensor::new(prefix, self.device)?.unsqueeze(0)?;
        let logits = self
            .model
            .decode(&decoder_input, self.encoder_output)?
            .squeeze(0)?
            .to_dtype(DType::F32)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        Ok(log_probs.to_vec1::<f32>()?)
    }
}
