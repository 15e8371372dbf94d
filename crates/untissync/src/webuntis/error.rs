//! Error types for the WebUntis client.

use thiserror::Error;

/// JSON-RPC error code WebUntis returns for bad credentials.
pub const BAD_CREDENTIALS_CODE: i64 = -8504;

/// JSON-RPC error code WebUntis returns when the session is missing or expired.
pub const NOT_AUTHENTICATED_CODE: i64 = -8520;

/// Errors that can occur while talking to a WebUntis installation.
#[derive(Debug, Error, Clone)]
pub enum WebUntisError {
    /// Network/HTTP request failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// Login was rejected by the server
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The session is no longer valid
    #[error("Session expired or missing")]
    SessionExpired,

    /// The server answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Server returned something we could not interpret
    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// URL parsing/construction failed
    #[error("URL error: {message}")]
    UrlError { message: String },
}

impl WebUntisError {
    /// Maps a JSON-RPC error object to the matching variant.
    pub fn from_rpc(code: i64, message: String) -> Self {
        match code {
            BAD_CREDENTIALS_CODE => WebUntisError::Authentication { message },
            NOT_AUTHENTICATED_CODE => WebUntisError::SessionExpired,
            _ => WebUntisError::Rpc { code, message },
        }
    }
}

impl From<reqwest::Error> for WebUntisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            WebUntisError::UnexpectedResponse {
                message: err.to_string(),
            }
        } else {
            WebUntisError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<url::ParseError> for WebUntisError {
    fn from(err: url::ParseError) -> Self {
        WebUntisError::UrlError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for WebUntisError {
    fn from(err: serde_json::Error) -> Self {
        WebUntisError::UnexpectedResponse {
            message: err.to_string(),
        }
    }
}
