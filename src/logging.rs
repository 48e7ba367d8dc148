//! Tracing setup
//!
//! Structured logging through `tracing` and `tracing-subscriber`. The level comes
//! from `application.log_level`; `RUST_LOG` overrides it.
//!
//! # Example
//! ```no_run
//! use austin::config::IocConfig;
//! use austin::logging::{self, OutputFormat, TracingConfig};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IocConfig::load()?;
//! logging::init(TracingConfig::from_config(&config)?.with_format(OutputFormat::Json))?;
//! info!(prefix = %config.ioc.prefix, "IOC starting");
//! # Ok(())
//! # }
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::IocConfig;
use crate::error::{AppResult, IocError};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, coloured (for development)
    #[default]
    Pretty,
    /// One line per event, no colours
    Compact,
    /// JSON objects for log aggregation
    Json,
}

/// Level and format of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Line format
    pub format: OutputFormat,
}

impl TracingConfig {
    /// Pretty output at `level`
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::default(),
        }
    }

    /// Level from `application.log_level`
    pub fn from_config(config: &IocConfig) -> AppResult<Self> {
        let level = config.application.log_level.parse::<Level>().map_err(|_| {
            IocError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                config.application.log_level
            ))
        })?;
        Ok(Self::new(level))
    }

    /// Choose the line format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: a second call (another test, say) is a no-op.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().with_thread_names(true).with_filter(env_filter).boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(false).with_filter(env_filter).boxed(),
        OutputFormat::Json => fmt::layer().json().with_filter(env_filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("a global default trace dispatcher has already been set") => Ok(()),
        Err(e) => Err(IocError::Configuration(format!("Failed to initialize tracing: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_config() {
        let mut config = IocConfig::default();
        config.application.log_level = "WARN".into();
        let tracing = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing.level, Level::WARN);
        assert_eq!(tracing.format, OutputFormat::Pretty);

        config.application.log_level = "loud".into();
        assert!(matches!(
            TracingConfig::from_config(&config),
            Err(IocError::Configuration(_))
        ));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = TracingConfig::new(Level::ERROR).with_format(OutputFormat::Compact);
        assert!(init(config).is_ok());
        assert!(init(config).is_ok());
    }
}
