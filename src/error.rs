//! Error types for the storage, manifest and cipher layers.
//!
//! Nothing here retries. Every failure goes back to the immediate caller, which maps it
//! to a response through [`StoreError::http_status`] and friends and logs it.

use std::fmt;

/// Failures of the segment and key stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed or missing input. Caller's fault, not retryable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No record for the given key.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record (e.g. "key record").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A unique record already exists for the given key.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: String, id: String },

    /// No backing connection is registered for the resolved store name.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Opening a backing connection failed.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The backing store rejected a statement.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            StoreError::InvalidArgument(_) => 400,
            StoreError::NotFound { .. } => 404,
            StoreError::AlreadyExists { .. } => 409,
            StoreError::StoreUnavailable(_) => 503,
            StoreError::Connect(_) => 503,
            StoreError::Database(_) => 500,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        StoreError::InvalidArgument(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        StoreError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        StoreError::AlreadyExists {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Cryptographic contract violations of the transport cipher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("Invalid key length: {0} bytes (expected 16, 24 or 32)")]
    KeyLengthInvalid(usize),

    #[error("Invalid {mode} IV length: {actual} bytes (expected {expected})")]
    IvLengthInvalid {
        mode: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Ciphertext is empty")]
    EmptyCiphertext,

    /// CBC ciphertext that is not a whole number of blocks.
    #[error("Ciphertext length {0} is not a multiple of the block size")]
    CiphertextLength(usize),

    #[error("Invalid padding")]
    PaddingInvalid,

    /// GCM tag verification failed. No plaintext is returned.
    #[error("Authentication failed")]
    AuthenticationFailed,
}

impl CipherError {
    pub fn http_status(&self) -> u16 {
        match self {
            CipherError::KeyLengthInvalid(_) | CipherError::IvLengthInvalid { .. } => 500,
            _ => 400,
        }
    }
}

/// Unmet manifest preconditions.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("No segments for video {0}")]
    NoSegments(String),

    #[error("No key record for video {0}")]
    KeyNotFound(String),

    /// The key record exists but its key or IV is empty.
    #[error("Key record for video {0} is incomplete")]
    KeyIncomplete(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ManifestError {
    pub fn http_status(&self) -> u16 {
        match self {
            ManifestError::NoSegments(_) | ManifestError::KeyNotFound(_) => 404,
            ManifestError::KeyIncomplete(_) => 500,
            ManifestError::Store(e) => e.http_status(),
        }
    }
}
