// Error handling module
// Defines the authentication error taxonomy and process exit codes

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::auth::GrantKind;

/// Errors produced while acquiring, refreshing or using a credential
#[derive(Error, Debug)]
pub enum AuthError {
    /// The user has not yet granted consent for this integration/subject pair.
    /// Recoverable by opening `consent_url` and retrying.
    #[error("Consent required, grant access at: {consent_url}")]
    ConsentRequired { consent_url: String },

    /// Non-success response from the authorization or resource server
    #[error("Authorization server error: {status} - {body}")]
    AuthServer { status: u16, body: String },

    /// Network or protocol failure before a response was received
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response arrived but is missing required fields
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Key file, id list or other local input could not be read
    #[error("Failed to read {}: {source}", path.display())]
    LocalResource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Private key could not be parsed or the assertion could not be signed
    #[error("Invalid signing key: {0}")]
    SigningKey(#[from] jsonwebtoken::errors::Error),

    /// Nobody completed the browser login in time
    #[error("Timed out after {0:?} waiting for authorization callback")]
    CallbackTimeout(Duration),

    /// Loopback listener could not be started or stopped unexpectedly
    #[error("Callback listener error: {0}")]
    Listener(String),

    /// Refresh requested for a credential that has no refresh token
    #[error("No refresh token available for {0:?} credential")]
    RefreshUnavailable(GrantKind),

    /// A token was requested before any grant succeeded
    #[error("No credential has been acquired yet")]
    NoCredential,

    /// A previous grant failed; this run cannot continue
    #[error("Authentication session has failed, start a new run")]
    SessionFailed,

    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Process exit status for this error at the top-level boundary
    pub fn exit_code(&self) -> i32 {
        match self {
            // Consent hand-off is a successful terminal state for a run
            AuthError::ConsentRequired { .. } => 0,
            AuthError::Config(_) => 2,
            _ => 1,
        }
    }

    pub fn is_consent_required(&self) -> bool {
        matches!(self, AuthError::ConsentRequired { .. })
    }
}

/// Result type alias for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;
