use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("statistics timeout")]
    Timeout,
    #[error("scene exhausted")]
    Exhausted,
    #[error("invalid scene: {0}")]
    InvalidScene(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
