use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::correction::text_utils::SENTENCE_PLACEHOLDER;
use crate::error::{AppError, Result};

pub const CONFIG_ENV: &str = "GRAMMAR_FIXER_CONFIG";

const CONFIG_HEADER: &str = "# grammar-fixer configuration file.\n\
# Environment overrides: GRAMMAR_FIXER_MODEL_ID, GRAMMAR_FIXER_MODEL_DIR, GRAMMAR_FIXER_BIND, PORT.\n\n";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hub identifier of the seq2seq grammar model
    pub model_id: String,
    pub revision: String,
    /// Directory with pre-fetched artifacts; used instead of the hub when complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    pub bind_address: String,
    pub prompt_template: String,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub num_beams: usize,
    pub log_level: String,
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_id: "pszemraj/flan-t5-large-grammar-synthesis".to_string(),
            revision: "main".to_string(),
            model_dir: None,
            cache_dir: None,
            bind_address: "0.0.0.0:5000".to_string(),
            prompt_template:
                "Correct the grammar and spelling in the following Spanish sentence: '{sentence}'"
                    .to_string(),
            max_input_tokens: 512,
            max_output_tokens: 512,
            num_beams: 4,
            log_level: "info".to_string(),
            config_path: Self::default_config_path(),
        }
    }
}

impl Config {
    /// `$GRAMMAR_FIXER_CONFIG`, else `$HOME/.config/grammar-fixer/config.toml`
    pub fn default_config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/grammar-fixer/config.toml")
    }

    /// Load the config file, apply environment overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::default_config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, writing out the defaults when the file does not exist yet
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config {
                config_path: path.to_path_buf(),
                ..Config::default()
            };
            if let Err(e) = config.save() {
                warn!("Could not write default config to {}: {}", path.display(), e);
            }
            return Ok(config);
        }

        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml_edit::de::from_str(&contents).map_err(|e| {
            AppError::Config(format!("invalid config file {}: {}", path.display(), e))
        })?;
        config.config_path = path.to_path_buf();
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let body = toml_edit::ser::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("could not serialize config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.config_path, format!("{}{}", CONFIG_HEADER, body))?;
        Ok(())
    }

    /// Apply overrides from a key lookup (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model_id) = lookup("GRAMMAR_FIXER_MODEL_ID") {
            self.model_id = model_id;
        }
        if let Some(model_dir) = lookup("GRAMMAR_FIXER_MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(model_dir));
        }
        if let Some(bind) = lookup("GRAMMAR_FIXER_BIND") {
            self.bind_address = bind;
        }
        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("PORT must be a port number, got '{}'", port)))?;
            let mut addr = self.bind_addr()?;
            addr.set_port(port);
            self.bind_address = addr.to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(AppError::Config("model_id must not be empty".to_string()));
        }
        if self.num_beams == 0 {
            return Err(AppError::Config("num_beams must be at least 1".to_string()));
        }
        if self.max_input_tokens == 0 || self.max_output_tokens == 0 {
            return Err(AppError::Config("token limits must be at least 1".to_string()));
        }
        if !self.prompt_template.contains(SENTENCE_PLACEHOLDER) {
            return Err(AppError::Config(format!(
                "prompt_template must contain {}",
                SENTENCE_PLACEHOLDER
            )));
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse().map_err(|_| {
            AppError::Config(format!("invalid bind_address '{}'", self.bind_address))
        })
    }
}
