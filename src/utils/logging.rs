//! Structured logging setup.
//!
//! Initializes a `tracing` subscriber from [`LoggingConfig`]. The
//! `CHATWIRE_LOG` environment variable overrides the configured level using
//! the usual `EnvFilter` directive syntax.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable consulted for filter directives.
pub const LOG_ENV_VAR: &str = "CHATWIRE_LOG";

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops because a global default can only be set once.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        info!(app = %config.app_name, "Logging initialized");
    }
}
