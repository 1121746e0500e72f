//! Error types for Lorebase

use thiserror::Error;

/// Result type alias using Lorebase's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lorebase error types
///
/// The first five variants are the domain taxonomy the transport layer maps
/// onto protocol status codes. Everything else is infrastructure and folds
/// into one of those kinds through [`Error::kind`].
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors (E001-E099)
    #[error("{0} not found")]
    NotFound(String),

    // Uniqueness errors (E100-E199)
    #[error("{0} already exists")]
    AlreadyExists(String),

    // Input errors (E200-E299)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // State errors (E300-E399)
    #[error("Operation prohibited: {0}")]
    Prohibition(String),

    // Collaborator errors (E400-E499)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Prohibition,
    Unavailable,
    Internal,
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}'", what, id))
    }

    pub fn already_exists(what: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        Self::AlreadyExists(format!("{} '{}'", what, id))
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E001",
            Self::AlreadyExists(_) => "E100",
            Self::InvalidArgument(_) => "E200",
            Self::Prohibition(_) => "E300",
            Self::Unavailable(_) => "E400",
            Self::DatabaseError(_) => "E401",
            Self::Serialization(_) => "E500",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Classify this error into the domain taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Prohibition(_) => ErrorKind::Prohibition,
            Self::Unavailable(_) | Self::DatabaseError(_) | Self::Io(_) => ErrorKind::Unavailable,
            Self::Serialization(_) | Self::ConfigError(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }
}

/// True when a sqlx error is a UNIQUE / PRIMARY KEY constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// True when a sqlx error is a FOREIGN KEY constraint violation
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_foreign_key_violation(),
        _ => false,
    }
}
