use thiserror::Error;

use crate::codec::CodecError;

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while storing, deriving or reconciling media
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No free filename for '{base}' after {attempts} attempts")]
    AllocationExhausted { base: String, attempts: u32 },

    #[error("Invalid variant spec: {message}")]
    InvalidVariantSpec { message: String },

    #[error("Image codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage transport error on disk '{disk}': {source}")]
    StorageTransport {
        disk: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unknown disk: {name}")]
    UnknownDisk { name: String },

    #[error("Invalid image slot '{slot}': {message}")]
    InvalidSlot { slot: String, message: String },

    #[error("Image uploads are disabled")]
    UploadsDisabled,

    #[error("Upload log not found: {id}")]
    LogNotFound { id: String },

    #[error("Entity not found: {id}")]
    EntityNotFound { id: String },

    #[error("Persistence error: {source}")]
    Persistence {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl MediaError {
    /// Create a storage transport error for the named disk
    pub fn transport<D, E>(disk: D, error: E) -> Self
    where
        D: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StorageTransport {
            disk: disk.into(),
            source: Box::new(error),
        }
    }

    /// Create a storage transport error from a plain message
    pub fn transport_msg<D: Into<String>, S: Into<String>>(disk: D, message: S) -> Self {
        let message: String = message.into();
        Self::StorageTransport {
            disk: disk.into(),
            source: message.into(),
        }
    }

    /// Create an invalid variant spec error
    pub fn invalid_spec<S: Into<String>>(message: S) -> Self {
        Self::InvalidVariantSpec {
            message: message.into(),
        }
    }

    /// Create an invalid slot error
    pub fn invalid_slot<K: Into<String>, S: Into<String>>(slot: K, message: S) -> Self {
        Self::InvalidSlot {
            slot: slot.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error from any error type
    pub fn persistence<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Persistence {
            source: Box::new(error),
        }
    }

    /// Create a persistence error from a plain message, e.g. a row that does not decode
    pub fn persistence_msg<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        Self::Persistence {
            source: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a log not found error
    pub fn log_not_found<S: Into<String>>(id: S) -> Self {
        Self::LogNotFound { id: id.into() }
    }

    /// Create an entity not found error
    pub fn entity_not_found<S: Into<String>>(id: S) -> Self {
        Self::EntityNotFound { id: id.into() }
    }

    /// True when the backend could not be reached. Callers may retry these.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::StorageTransport { .. })
    }
}
