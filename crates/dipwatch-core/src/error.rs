use thiserror::Error;

#[derive(Error, Debug)]
pub enum DipwatchError {
    /// Network/vendor failure; the affected symbol is skipped this cycle.
    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    /// Fewer bars than an indicator or the alert cycle needs.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// KV or rule store temporarily down; callers degrade, never crash.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed rule, threshold, or engine configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}
