//! Error types for inbox-panels.

/// Top-level error type for panel count requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("Panel {panel:?} cannot be compiled: {source}")]
    Compile {
        panel: String,
        #[source]
        source: CompileError,
    },

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Coarse classification used by the HTTP layer.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. } | Self::Compile { .. } => ErrorClass::BadRequest,
            Self::Auth(AuthError::NotAuthenticated) => ErrorClass::Unauthenticated,
            Self::Auth(AuthError::SessionExpired { .. }) => ErrorClass::SessionExpired,
            Self::Auth(AuthError::TokenEndpoint { .. }) => ErrorClass::Upstream,
            Self::Backend(e) if e.is_auth() => ErrorClass::SessionExpired,
            Self::Backend(_) => ErrorClass::Upstream,
            Self::Config(_) => ErrorClass::Internal,
        }
    }
}

/// How a failure is presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    Unauthenticated,
    SessionExpired,
    Upstream,
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthenticated => "unauthenticated",
            Self::SessionExpired => "session_expired",
            Self::Upstream => "upstream_error",
            Self::Internal => "internal_error",
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// A rule pattern that has no translation into the search grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("empty pattern for field {field}")]
    EmptyPattern { field: String },

    #[error("unsupported pattern {pattern:?} for field {field}: {reason}")]
    UnsupportedPattern {
        field: String,
        pattern: String,
        reason: String,
    },
}

/// Credential minting/refresh errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No mail credentials are configured")]
    NotAuthenticated,

    #[error("Session expired: {reason}")]
    SessionExpired { reason: String },

    #[error("Token endpoint failed: {reason}")]
    TokenEndpoint { reason: String },
}

/// Mail backend errors.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend rejected credentials ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Backend request failed: {reason}")]
    Request { reason: String },

    #[error("Invalid backend response: {reason}")]
    InvalidResponse { reason: String },
}

impl BackendError {
    /// Build the error for a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 401 || status == 403 {
            Self::Unauthorized { status, message }
        } else {
            Self::Status { status, message }
        }
    }

    /// Whether the backend refused the credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request {
            reason: e.to_string(),
        }
    }
}
