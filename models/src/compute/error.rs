use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the compute and container API clients.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to build HTTP client: '{}'", source))]
    HttpClientCreate { source: reqwest::Error },

    #[snafu(display("Request to '{}' failed: '{}'", url, source))]
    Transport { url: String, source: reqwest::Error },

    #[snafu(display(
        "Compute API responded to '{}' with an error status code {}: '{}'",
        url,
        status_code,
        response
    ))]
    ErrorResponse {
        url: String,
        status_code: reqwest::StatusCode,
        response: String,
    },

    /// The label fingerprint sent with a label mutation no longer matches the instance.
    #[snafu(display(
        "Label fingerprint rejected by '{}', the instance was modified concurrently: '{}'",
        url,
        response
    ))]
    FingerprintConflict { url: String, response: String },

    #[snafu(display("Unable to deserialize response from '{}': '{}'", url, source))]
    Deserialize { url: String, source: reqwest::Error },

    #[snafu(display("Unable to serialize request body: '{}'", source))]
    SerializeRequest { source: serde_json::Error },

    #[snafu(display("Unable to fetch access token from '{}': '{}'", url, source))]
    AccessToken { url: String, source: reqwest::Error },

    #[snafu(display(
        "Token endpoint '{}' responded with an error status code {}: '{}'",
        url,
        status_code,
        response
    ))]
    AccessTokenResponse {
        url: String,
        status_code: reqwest::StatusCode,
        response: String,
    },

    #[snafu(display("Unable to obtain service account token: '{}'", source))]
    ServiceAccountToken { source: gcp_auth::Error },

    #[snafu(display("Unable to read service account key '{}': '{}'", path.display(), source))]
    ReadCredentials {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse service account key '{}': '{}'", path.display(), source))]
    ParseCredentials {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display(
        "Invalid service account type in '{}': '{}'",
        path.display(),
        credential_type
    ))]
    InvalidCredentialType {
        path: PathBuf,
        credential_type: String,
    },
}

impl Error {
    /// Whether a read request failing with this error is worth repeating.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::AccessToken { .. }
            | Self::ServiceAccountToken { .. } => true,
            Self::ErrorResponse { status_code, .. } => {
                status_code.is_server_error()
                    || *status_code == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
