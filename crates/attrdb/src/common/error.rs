use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum AttrError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Cannot decode attribute {attr}={value:?}: {reason}")]
    DecodeError {
        attr: String,
        value: String,
        reason: String,
    },
    #[error("Cannot encode attribute {attr}: {reason}")]
    EncodeError { attr: String, reason: String },
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Invalid journal: {0}")]
    InvalidJournal(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl AttrError {
    pub fn decode(attr: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::DecodeError {
            attr: attr.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for AttrError {
    fn from(e: bincode::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<String> for AttrError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for AttrError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
