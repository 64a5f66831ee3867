//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set. Otherwise the filter is the configured level plus
//! any per-target directives, e.g. `vibe_core::socket=trace` to see frames.

use crate::config::GatewayConfig;
use tracing::Level;
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Emit one JSON object per event
    pub json: bool,
    /// Log span open and close
    pub span_events: bool,
    /// Include file and line of the call site
    pub source_location: bool,
    pub thread_names: bool,
    /// Extra filter directives applied on top of `level`
    pub directives: Vec<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            span_events: false,
            source_location: true,
            thread_names: false,
            directives: Vec::new(),
        }
    }
}

impl TracingConfig {
    /// Verbose human-readable output
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            span_events: true,
            thread_names: true,
            // hyper is noisy at debug
            directives: vec!["hyper=info".to_string()],
            ..Self::default()
        }
    }

    /// JSON output without call sites
    #[must_use]
    pub fn production() -> Self {
        Self {
            json: true,
            source_location: false,
            ..Self::default()
        }
    }

    /// Pick a preset matching the gateway's environment
    #[must_use]
    pub fn for_gateway(config: &GatewayConfig) -> Self {
        if config.log_json {
            Self::production()
        } else if config.env.is_development() {
            Self::development()
        } else {
            Self::default()
        }
    }

    /// Add a filter directive such as `vibe_gateway=trace`
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, TracingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }

        self.directives
            .iter()
            .try_fold(EnvFilter::new(self.level.to_string()), |filter, raw| {
                raw.parse::<Directive>()
                    .map(|directive| filter.add_directive(directive))
                    .map_err(|_| TracingError::InvalidDirective(raw.clone()))
            })
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = fmt::layer()
            .with_file(self.source_location)
            .with_line_number(self.source_location)
            .with_thread_names(self.thread_names)
            .with_span_events(span_events);

        if self.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    }
}

/// Install the global subscriber
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn try_init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    let filter = config.env_filter()?;

    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(filter)
        .try_init()
        .map_err(|_| TracingError::AlreadyInitialized)
}

/// Tracing initialization errors
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,

    #[error("Invalid filter directive: {0}")]
    InvalidDirective(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(pairs: &[(&str, &str)]) -> GatewayConfig {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .chain(std::iter::once(("GATEWAY_PORT".to_string(), "0".to_string())))
            .collect();
        GatewayConfig::from_lookup(|key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn test_presets() {
        let dev = TracingConfig::development();
        assert_eq!(dev.level, Level::DEBUG);
        assert!(dev.span_events);
        assert!(!dev.json);

        let prod = TracingConfig::production();
        assert_eq!(prod.level, Level::INFO);
        assert!(prod.json);
        assert!(!prod.source_location);
    }

    #[test]
    fn test_for_gateway() {
        assert!(TracingConfig::for_gateway(&gateway(&[("LOG_JSON", "true")])).json);
        assert_eq!(
            TracingConfig::for_gateway(&gateway(&[("APP_ENV", "development")])).level,
            Level::DEBUG
        );
        let staging = TracingConfig::for_gateway(&gateway(&[("APP_ENV", "staging")]));
        assert_eq!(staging.level, Level::INFO);
        assert!(!staging.json);
    }

    #[test]
    fn test_invalid_directive_is_rejected() {
        let config = TracingConfig::default().with_directive("vibe_core=loud");
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                config.env_filter(),
                Err(TracingError::InvalidDirective(_))
            ));
        }
    }

    #[test]
    fn test_second_init_is_reported() {
        let first = try_init_tracing(&TracingConfig::development());
        let second = try_init_tracing(&TracingConfig::default());
        assert!(first.is_err() || second.is_err());
    }
}
