//! Structured debug logging system

use markerlink_core::{MarkerLinkError, MarkerLinkResult};
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` says nothing about MarkerLink
pub const DEFAULT_DIRECTIVE: &str = "markerlink=info";

/// Debug logger for structured logging
#[derive(Debug, Clone)]
pub struct DebugLogger {
    directive: String,
    with_target: bool,
}

impl DebugLogger {
    /// Create new debug logger
    pub fn new() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.to_string(),
            with_target: true,
        }
    }

    /// Override the fallback directive, e.g. `markerlink=debug`
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    /// Hide module targets in log lines
    pub fn without_target(mut self) -> Self {
        self.with_target = false;
        self
    }

    /// Filter built from `RUST_LOG` plus the fallback directive
    pub fn filter(&self) -> MarkerLinkResult<EnvFilter> {
        let directive = self
            .directive
            .parse()
            .map_err(|e| MarkerLinkError::InvalidConfiguration {
                field: "log_directive".to_string(),
                reason: format!("{}", e),
            })?;
        Ok(EnvFilter::from_default_env().add_directive(directive))
    }

    /// Install this logger as the global subscriber
    pub fn install(&self) -> MarkerLinkResult<()> {
        tracing_subscriber::fmt()
            .with_env_filter(self.filter()?)
            .with_target(self.with_target)
            .try_init()
            .map_err(|e| MarkerLinkError::InvalidConfiguration {
                field: "logging".to_string(),
                reason: e.to_string(),
            })
    }

    /// Initialize logging system with the default settings
    pub fn init_logging() -> MarkerLinkResult<()> {
        Self::new().install()
    }
}

impl Default for DebugLogger {
    fn default() -> Self {
        Self::new()
    }
}
