use thiserror::Error;

/// Error type for sampler operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid walker, parameter or temperature configuration.
    ///
    /// Raised before any sampling takes place.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An argument outside its valid domain, such as chop bounds that would leave
    /// no steps or a temperature selector used in ensemble mode.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A likelihood oracle rejected a parameter vector as physically invalid.
    ///
    /// The sampler recovers from this locally by treating the vector as having
    /// zero likelihood.
    #[error("Model evaluation failed: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to render trace figure: {0}")]
    Plot(String),
}

impl From<bincode::Error> for Error {
    fn from(value: bincode::Error) -> Self {
        Error::Serialization(value.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(value: toml::de::Error) -> Self {
        Error::Serialization(value.to_string())
    }
}

/// Convenience type for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal signal that the walkers barely moved during a run.
///
/// Emitted when every cold-chain walker's acceptance fraction for the run falls
/// below the configured threshold. The chain is kept as-is.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "All {n_walkers} walkers accepted fewer than {threshold} of their proposals \
     (maximum acceptance fraction {max_acceptance:.4}); proposals may be degenerate"
)]
pub struct ConvergenceWarning {
    pub n_walkers: usize,
    pub threshold: f64,
    pub max_acceptance: f64,
}
