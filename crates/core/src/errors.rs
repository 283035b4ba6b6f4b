//! Error types

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} for {symbol} not defined")]
    Missing { symbol: String, field: &'static str },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub fn missing(symbol: impl Into<String>, field: &'static str) -> Self {
        Self::Missing {
            symbol: symbol.into(),
            field,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Errors raised while deriving the feed of a single symbol.
///
/// None of these abort a derivation cycle; the symbol is skipped.
#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("No market route found for {base}:{quote}")]
    InsufficientData { base: String, quote: String },

    #[error("{0} is not a synthetic asset")]
    NotSynthetic(String),

    #[error("No ticker for market {base}:{quote}")]
    MissingTicker { base: String, quote: String },

    #[error("Invalid {what} price {value}")]
    InvalidPrice { what: &'static str, value: f64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Controller state error: {0}")]
    ControllerState(String),
}

impl DeriveError {
    pub fn insufficient(base: &str, quote: &str) -> Self {
        Self::InsufficientData {
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }

    /// True when the symbol merely had no data this cycle
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::InsufficientData { .. } | Self::NotSynthetic(_))
    }
}

/// Source collaborator errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source {source_name} failed: {reason}")]
    Fetch { source_name: String, reason: String },

    #[error("Cache error for {source_name}: {reason}")]
    Cache { source_name: String, reason: String },
}

/// Result type aliases
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DeriveResult<T> = Result<T, DeriveError>;
