use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Input the engine refuses to act on. Every variant is recoverable by the
/// caller: reject the request or substitute a default.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("quality must be between 0 and 5, got {0}")]
    InvalidQuality(i32),

    #[error("unknown achievement criteria '{0}'")]
    UnknownCriteria(String),

    #[error("invalid engine configuration: {0}")]
    Config(String),
}
