//! Error types for the teapot service.

use thiserror::Error;

/// Main error type for teapot operations.
#[derive(Error, Debug)]
pub enum TeapotError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for teapot operations.
pub type Result<T> = std::result::Result<T, TeapotError>;
