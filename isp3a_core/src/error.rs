use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("sensor timing descriptor not set")]
    MissingSensorTiming,
    #[error("invalid sensor timing: {0}")]
    InvalidTiming(&'static str),
    #[error("scratch allocation failed for {cells} cells")]
    AllocationFailure { cells: usize },
    #[error("estimation engine produced no output")]
    NullEngineOutput,
    #[error("estimation engine failed: {0}")]
    Engine(String),
    #[error("statistics source error: {0}")]
    Source(String),
    #[error("timeout waiting for statistics")]
    Timeout,
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing exposure engine")]
    MissingExposureEngine,
    #[error("missing white balance engine")]
    MissingWhiteBalanceEngine,
    #[error("missing focus engine")]
    MissingFocusEngine,
    #[error("engine registered for the wrong domain: {0}")]
    WrongDomain(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
