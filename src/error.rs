//! Error taxonomy shared by the token lifecycle and the gateway pipeline.

/// Failures surfaced by the core operations.
///
/// Every variant carries owned strings so the type is `Clone`: a single
/// refresh outcome is handed to every caller that joined the in-flight
/// request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Missing or malformed user input. Shown to the user verbatim.
    #[error("{0}")]
    Validation(String),

    /// The interactive authorization step produced no redirect.
    #[error("Authentication flow was cancelled or failed")]
    AuthFlowCancelled,

    /// The redirect came back without a `code` parameter.
    #[error("Authorization code not found in redirect URL")]
    AuthorizationMissing,

    /// Network failure or non-2xx HTTP status.
    #[error("Network request failed: {0}")]
    Transport(String),

    /// The gateway envelope carried a non-success `result_code`.
    #[error("{message}")]
    Api { code: String, message: String },

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// A platform call was requested without a usable access token.
    #[error("Not authenticated. Run 'isolar-cli login' first.")]
    NotAuthenticated,

    /// A logout or a newer sign-in happened while this request was in flight.
    #[error("Request superseded by a later sign-in or logout")]
    Superseded,

    /// The envelope reported success but `result_data` did not decode.
    #[error("Malformed gateway response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
