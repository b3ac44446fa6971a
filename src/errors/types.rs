//! # Error Types
//!
//! Error types for the certplane certificate authority using `thiserror`.
//!
//! Every error maps onto a stable [`ErrorKind`] so that callers (the CRL and
//! revoke endpoints, the ACME problem mapper) can branch on the category
//! without matching on variants, and so that storage or crypto failures are
//! never leaked verbatim to clients.

use std::fmt;

use super::tls::TlsError;

/// Custom result type for certplane operations
pub type Result<T> = std::result::Result<T, CertplaneError>;

/// Machine-readable error category shared by every surface of the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedRequest,
    Unauthorized,
    Forbidden,
    AccountDoesNotExist,
    NotFound,
    AlreadyRevoked,
    ReplayedToken,
    ConstraintViolation,
    NotImplemented,
    InternalServerError,
}

impl ErrorKind {
    /// HTTP status code associated with this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::MalformedRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::AccountDoesNotExist => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyRevoked => 400,
            ErrorKind::ReplayedToken => 401,
            ErrorKind::ConstraintViolation => 403,
            ErrorKind::NotImplemented => 501,
            ErrorKind::InternalServerError => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::AccountDoesNotExist => "account_does_not_exist",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyRevoked => "already_revoked",
            ErrorKind::ReplayedToken => "replayed_token",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::InternalServerError => "internal_server_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the certplane authority
#[derive(thiserror::Error, Debug)]
pub enum CertplaneError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors of stored records
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Request-shape validation errors
    #[error("Malformed request: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The credential does not map to the resource being acted on
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The caller is known but not allowed to perform the operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// No ACME account exists for the presented key
    #[error("Account does not exist: {message}")]
    AccountDoesNotExist { message: String },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound {
        resource_type: String,
        id: String,
    },

    /// The serial already has a revocation record
    #[error("Certificate with serial number {serial} is already revoked")]
    AlreadyRevoked { serial: String },

    /// A one-time token was presented a second time
    #[error("Token already used: {token_id}")]
    ReplayedToken { token_id: String },

    /// A signing constraint rejected the request
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// Feature disabled in this deployment
    #[error("Not implemented: {message}")]
    NotImplemented { message: String },

    /// Cryptographic failure not attributable to the caller
    #[error("Crypto error: {message}")]
    Crypto {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// TLS listener configuration errors
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CertplaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation (malformed request) error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn account_does_not_exist<S: Into<String>>(message: S) -> Self {
        Self::AccountDoesNotExist { message: message.into() }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    pub fn already_revoked<S: Into<String>>(serial: S) -> Self {
        Self::AlreadyRevoked { serial: serial.into() }
    }

    pub fn replayed_token<S: Into<String>>(token_id: S) -> Self {
        Self::ReplayedToken { token_id: token_id.into() }
    }

    pub fn constraint<S: Into<String>>(message: S) -> Self {
        Self::ConstraintViolation { message: message.into() }
    }

    pub fn not_implemented<S: Into<String>>(message: S) -> Self {
        Self::NotImplemented { message: message.into() }
    }

    pub fn crypto<S: Into<String>>(message: S) -> Self {
        Self::Crypto { message: message.into(), source: None }
    }

    pub fn crypto_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Crypto { message: message.into(), source: Some(source) }
    }

    /// Create an internal server error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    pub fn internal_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(source) }
    }

    /// Error category used for protocol-level branching.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CertplaneError::Validation { .. } => ErrorKind::MalformedRequest,
            CertplaneError::Unauthorized { .. } => ErrorKind::Unauthorized,
            CertplaneError::Forbidden { .. } => ErrorKind::Forbidden,
            CertplaneError::AccountDoesNotExist { .. } => ErrorKind::AccountDoesNotExist,
            CertplaneError::NotFound { .. } => ErrorKind::NotFound,
            CertplaneError::AlreadyRevoked { .. } => ErrorKind::AlreadyRevoked,
            CertplaneError::ReplayedToken { .. } => ErrorKind::ReplayedToken,
            CertplaneError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            CertplaneError::NotImplemented { .. } => ErrorKind::NotImplemented,
            CertplaneError::Config { .. }
            | CertplaneError::Database { .. }
            | CertplaneError::Io { .. }
            | CertplaneError::Serialization { .. }
            | CertplaneError::Crypto { .. }
            | CertplaneError::Tls(_)
            | CertplaneError::Internal { .. } => ErrorKind::InternalServerError,
        }
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Message safe to show to a client. Internal failures are reduced to a
    /// generic sentence; the full chain is only logged.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::InternalServerError => {
                "The certificate authority encountered an internal error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Replays and double revocations are security events and never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CertplaneError::Database { .. } | CertplaneError::Io { .. })
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for CertplaneError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<std::io::Error> for CertplaneError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for CertplaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for CertplaneError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<rcgen::Error> for CertplaneError {
    fn from(error: rcgen::Error) -> Self {
        Self::crypto_with_source("Certificate generation failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for CertplaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}
