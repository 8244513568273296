use thiserror::Error;

use crate::model::WaveNetError;

#[derive(Error, Debug)]
pub enum AsrError {
    #[error("Model error: {0}")]
    Model(#[from] WaveNetError),

    #[error("Symbol error: {0}")]
    Symbol(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Tensor data error: {0}")]
    TensorData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<burn::config::ConfigError> for AsrError {
    fn from(err: burn::config::ConfigError) -> Self {
        AsrError::Config(err.to_string())
    }
}

impl From<burn::record::RecorderError> for AsrError {
    fn from(err: burn::record::RecorderError) -> Self {
        AsrError::Checkpoint(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AsrError>;
