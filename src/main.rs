use anyhow::Context;
use tracing::{info, warn};

use grammar_fixer::config::Config;
use grammar_fixer::correction::{GrammarCorrector, ModelManager};
use grammar_fixer::{init_logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging = init_logging();
    let config = Config::load().context("loading configuration")?;
    if let Err(e) = logging.apply_level(&config.log_level) {
        warn!("{}", e);
    }

    info!("Starting grammar-fixer v{}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config.config_path.display());

    let addr = config.bind_addr()?;
    let manager = ModelManager::from_config(&config);
    let corrector = GrammarCorrector::spawn(
        config.model_id.clone(),
        config.prompt_template.clone(),
        manager,
    );

    server::serve(addr, corrector).await?;
    info!("Shut down cleanly");
    Ok(())
}
