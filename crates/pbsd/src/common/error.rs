use thiserror::Error;

use crate::common::error::PbsError::GenericError;

#[derive(Debug, Error)]
pub enum PbsError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Attribute store error: {0}")]
    AttrError(#[from] attrdb::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<anyhow::Error> for PbsError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<toml::de::Error> for PbsError {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigError(error.to_string())
    }
}

impl From<serde_json::Error> for PbsError {
    fn from(error: serde_json::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<String> for PbsError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}
