//! Spanish grammar correction service backed by a seq2seq model that loads in the background.

use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::error::AppError;

pub mod client;
pub mod config;
pub mod correction;
pub mod error;
pub mod server;

/// Level used until the config file has been read
pub const STARTUP_LOG_LEVEL: &str = "info";

/// Adjusts the global log filter after startup
pub struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LoggingHandle {
    /// Switch to `level` unless `RUST_LOG` picked the filter
    pub fn apply_level(&self, level: &str) -> Result<(), AppError> {
        if self.from_env {
            return Ok(());
        }
        let filter = EnvFilter::try_new(level)
            .map_err(|e| AppError::Config(format!("invalid log_level '{}': {}", level, e)))?;
        self.filter
            .reload(filter)
            .map_err(|e| AppError::Config(format!("could not apply log_level: {}", e)))
    }
}

/// Install the fmt subscriber before anything logs; `RUST_LOG` wins over the configured level
pub fn init_logging() -> LoggingHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(STARTUP_LOG_LEVEL), false),
    };
    let (filter_layer, handle) = reload::Layer::new(filter);
    // A second call (tests, embedding) leaves the first subscriber in place.
    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().compact())
        .try_init();

    LoggingHandle {
        filter: handle,
        from_env,
    }
}
