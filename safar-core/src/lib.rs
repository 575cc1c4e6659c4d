pub mod plan;
pub mod repository;

/// Error taxonomy shared by the engine and the stores. Computation
/// fallbacks (no matching policy, no priced route) are not errors; they
/// resolve to zero at the call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
