use super::error::{self, Result};
use crate::constants::{ACCESS_TOKEN_ENV_VAR, CLOUD_PLATFORM_SCOPE, METADATA_TOKEN_ENDPOINT};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde::Deserialize;
use snafu::{ensure, ResultExt};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{event, instrument, Level};

const SERVICE_ACCOUNT_TYPE: &str = "service_account";

// Cached tokens are refreshed this long before the metadata server says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(rename = "type")]
    credential_type: String,
    project_id: String,
}

/// Extracts the project ID from a service account key file.
pub fn project_id_from_key_file(path: &Path) -> Result<String> {
    let data = fs::read(path).context(error::ReadCredentialsSnafu { path })?;
    let credentials: CredentialFile =
        serde_json::from_slice(&data).context(error::ParseCredentialsSnafu { path })?;

    ensure!(
        credentials.credential_type == SERVICE_ACCOUNT_TYPE,
        error::InvalidCredentialTypeSnafu {
            path,
            credential_type: credentials.credential_type,
        }
    );

    Ok(credentials.project_id)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// An access token together with the time it should be refreshed.
#[derive(Debug, Clone)]
pub struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Supplies OAuth bearer tokens for compute and container API requests.
pub enum AccessTokenSource {
    /// A fixed token, typically minted outside of spotter.
    Static(String),
    /// Tokens minted for a service account by signing with its key file. `gcp_auth` caches them
    /// until they expire.
    ServiceAccountKey(CustomServiceAccount),
    /// Tokens minted by the GCE metadata server for the node's service account.
    MetadataServer {
        endpoint: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl fmt::Debug for AccessTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static"),
            Self::ServiceAccountKey(_) => f.write_str("ServiceAccountKey"),
            Self::MetadataServer { endpoint, .. } => f
                .debug_struct("MetadataServer")
                .field("endpoint", endpoint)
                .finish(),
        }
    }
}

impl AccessTokenSource {
    /// Authenticates as the service account in `path`.
    ///
    /// A token in `GOOGLE_OAUTH_ACCESS_TOKEN` takes precedence. A key file that cannot be loaded
    /// falls back to the metadata server.
    pub fn from_key_file(path: &Path) -> Self {
        if let Some(token) = static_token_from_env() {
            return Self::Static(token);
        }

        match CustomServiceAccount::from_file(path) {
            Ok(service_account) => Self::ServiceAccountKey(service_account),
            Err(err) => {
                event!(
                    Level::WARN,
                    path = %path.display(),
                    error = %err,
                    "Unable to load service account key, using metadata server credentials."
                );
                Self::metadata_server(METADATA_TOKEN_ENDPOINT)
            }
        }
    }

    pub fn metadata_server<S: Into<String>>(endpoint: S) -> Self {
        Self::MetadataServer {
            endpoint: endpoint.into(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid access token, minting a new one when the cached token is about to expire.
    #[instrument(skip(self, http_client), err)]
    pub async fn token(&self, http_client: &reqwest::Client) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccountKey(service_account) => {
                let token = service_account
                    .token(&[CLOUD_PLATFORM_SCOPE])
                    .await
                    .context(error::ServiceAccountTokenSnafu)?;
                Ok(token.as_str().to_string())
            }
            Self::MetadataServer { endpoint, cached } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(token.access_token.clone());
                    }
                }

                let token = fetch_metadata_token(http_client, endpoint).await?;
                let access_token = token.access_token.clone();
                *cached = Some(token);
                Ok(access_token)
            }
        }
    }
}

fn static_token_from_env() -> Option<String> {
    env::var(ACCESS_TOKEN_ENV_VAR)
        .ok()
        .filter(|token| !token.is_empty())
}

async fn fetch_metadata_token(http_client: &reqwest::Client, url: &str) -> Result<CachedToken> {
    event!(Level::DEBUG, "Refreshing access token from metadata server.");

    let response = http_client
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .context(error::AccessTokenSnafu { url })?;

    let status_code = response.status();
    if !status_code.is_success() {
        let response = response.text().await.unwrap_or_default();
        return error::AccessTokenResponseSnafu {
            url,
            status_code,
            response,
        }
        .fail();
    }

    let token: TokenResponse = response
        .json()
        .await
        .context(error::AccessTokenSnafu { url })?;

    let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
    Ok(CachedToken {
        access_token: token.access_token,
        refresh_at: Instant::now() + lifetime,
    })
}
