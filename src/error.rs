/// Unified error handling for Recipe Chef
///
/// Every adapter, store and protocol call either succeeds or fails with exactly
/// one of these kinds. Using `thiserror`, we derive the Error trait and keep
/// the backend's own message intact so it can be shown to the user verbatim.

use thiserror::Error;

/// Main error type for all Recipe Chef operations
#[derive(Error, Debug)]
pub enum ChefError {
    /// No signed-in session; raised before any network call is attempted
    #[error("Not authenticated")]
    Authentication,

    /// Chat or transcription backend rejected the request or failed
    #[error("{0}")]
    Upstream(String),

    /// Backend answered with success but without the expected field
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The finalize reply could not be read as a recipe object
    #[error("Recipe extraction failed: {0}")]
    ExtractionFailed(String),

    /// Persistence backend rejected the operation
    #[error("{0}")]
    Store(String),

    /// User input rejected before anything was sent or stored
    #[error("{0}")]
    Validation(String),

    /// Configuration and settings errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secrets management errors (keyring access, API key storage)
    #[error("Secrets error: {0}")]
    Secrets(String),

    /// File I/O errors (audio clips, database directory)
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Helper trait to convert external error types to ChefError
pub trait IntoChefError<T> {
    fn map_chef_err<F>(self, f: F) -> Result<T, ChefError>
    where
        F: FnOnce(String) -> ChefError;
}

impl<T, E: std::fmt::Display> IntoChefError<T> for Result<T, E> {
    fn map_chef_err<F>(self, f: F) -> Result<T, ChefError>
    where
        F: FnOnce(String) -> ChefError,
    {
        self.map_err(|e| f(e.to_string()))
    }
}

/// Implement Serialize for ChefError so it can be sent to a front end
impl serde::Serialize for ChefError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
