use thiserror::Error;
use tracing_subscriber::filter::{Directive, EnvFilter, ParseError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::{Config, LogFormat};

/// Modules held at `warn` unless the filter asks for `trace`.
/// These are verbose dependencies that clutter normal log output.
const FILTERED_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "tower", "axum"];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] TryInitError),
}

pub struct Logger {}

impl Logger {
    /// Installs the global tracing subscriber described by `config`.
    ///
    /// `RUST_LOG`, when set, takes precedence over `--log-filter`.
    pub fn init_logger(config: &Config) -> Result<(), LoggingError> {
        let directive = std::env::var(EnvFilter::DEFAULT_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| config.log_filter.clone());
        let filter = Self::build_filter(&directive)?;

        let registry = tracing_subscriber::registry().with(filter);
        match config.log_format {
            LogFormat::Text => registry
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .try_init()?,
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_target(true))
                .try_init()?,
        }
        Ok(())
    }

    /// Parses `directive` and quiets the noisy dependencies it does not name.
    fn build_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
        let mut filter = EnvFilter::try_new(directive)?;
        if Self::should_filter_dependencies(directive) {
            for module in FILTERED_MODULES {
                if !Self::names_module(directive, module) {
                    let quiet: Directive = format!("{}=warn", module).parse()?;
                    filter = filter.add_directive(quiet);
                }
            }
        }
        Ok(filter)
    }

    /// Returns `false` for a bare `trace` filter (show all logs), `true` otherwise.
    fn should_filter_dependencies(directive: &str) -> bool {
        !directive.trim().eq_ignore_ascii_case("trace")
    }

    fn names_module(directive: &str, module: &str) -> bool {
        directive
            .split(',')
            .filter_map(|part| part.split('=').next())
            .any(|target| target.trim() == module)
    }
}
