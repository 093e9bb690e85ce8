//! Pre-fetch the grammar model into a directory the server can load offline.
//!
//! Usage: `download-model [MODEL_ID] [TARGET_DIR]`
//!
//! Defaults come from the config file; the target directory defaults to `model`.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};

use grammar_fixer::config::Config;
use grammar_fixer::correction::ModelManager;
use grammar_fixer::init_logging;

fn main() -> anyhow::Result<()> {
    let logging = init_logging();
    let mut config = Config::load().context("loading configuration")?;
    if let Err(e) = logging.apply_level(&config.log_level) {
        warn!("{}", e);
    }

    let mut args = std::env::args().skip(1);
    if let Some(model_id) = args.next() {
        config.model_id = model_id;
    }
    let target = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("model"));

    info!("Downloading {} into {}", config.model_id, target.display());
    let manager = ModelManager::from_config(&config);
    let written = manager
        .snapshot_to(&target)
        .with_context(|| format!("downloading {}", config.model_id))?;

    ModelManager::local_artifacts(&target)?
        .with_context(|| format!("{} is missing config, tokenizer or weights", target.display()))?;

    info!("✅ {} files written to {}", written, target.display());
    info!("Set GRAMMAR_FIXER_MODEL_DIR={} to load it without the hub", target.display());
    Ok(())
}
