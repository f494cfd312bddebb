//! Identity credentials and the process-wide credential cache.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use boardsync_core::{Error, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Resource the credential is scoped to.
pub const VAULT_RESOURCE: &str = "https://vault.azure.net";

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Credentials this close to expiry are replaced before use.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Opaque bearer token issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A token with no known expiry.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True once `now` is within the refresh margin of the expiry.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at - Duration::seconds(REFRESH_MARGIN_SECS) <= now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of identity credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Acquire a fresh credential. Failures surface as `Error::Auth`.
    async fn acquire_credential(&self) -> Result<Credential>;
}

/// Fixed token, for local development against a real secret store.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn acquire_credential(&self) -> Result<Credential> {
        Ok(self.credential.clone())
    }
}

#[derive(Clone)]
enum TokenEndpoint {
    /// Hosting platform identity endpoint with its shared header secret.
    AppService { url: String, header: String },
    /// Instance metadata service.
    Imds { url: String },
}

impl fmt::Debug for TokenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenEndpoint::AppService { url, .. } => {
                f.debug_struct("AppService").field("url", url).finish_non_exhaustive()
            }
            TokenEndpoint::Imds { url } => f.debug_struct("Imds").field("url", url).finish(),
        }
    }
}

/// Managed identity of the hosting platform.
#[derive(Debug, Clone)]
pub struct ManagedIdentityProvider {
    client: Client,
    endpoint: TokenEndpoint,
    client_id: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Unix seconds; the identity endpoints send it as a string.
    #[serde(default)]
    expires_on: Option<Seconds>,
    #[serde(default)]
    expires_in: Option<Seconds>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Int(i64),
    Text(String),
}

impl Seconds {
    fn get(&self) -> Option<i64> {
        match self {
            Seconds::Int(n) => Some(*n),
            Seconds::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl TokenResponse {
    fn expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(at) = self.expires_on.as_ref().and_then(Seconds::get) {
            return Utc.timestamp_opt(at, 0).single();
        }
        self.expires_in
            .as_ref()
            .and_then(Seconds::get)
            .map(|secs| now + Duration::seconds(secs))
    }
}

impl ManagedIdentityProvider {
    /// Use the platform identity endpoint.
    pub fn app_service(url: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: TokenEndpoint::AppService {
                url: url.into(),
                header: header.into(),
            },
            client_id: None,
        }
    }

    /// Use the instance metadata service.
    pub fn imds() -> Self {
        Self::imds_at(IMDS_TOKEN_URL)
    }

    pub fn imds_at(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: TokenEndpoint::Imds { url: url.into() },
            client_id: None,
        }
    }

    /// Select a user-assigned identity.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for ManagedIdentityProvider {
    async fn acquire_credential(&self) -> Result<Credential> {
        let mut query = vec![("resource", VAULT_RESOURCE.to_string())];
        let (url, request) = match &self.endpoint {
            TokenEndpoint::AppService { url, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION.to_string()));
                (url, self.client.get(url).header("X-IDENTITY-HEADER", header))
            }
            TokenEndpoint::Imds { url } => {
                query.push(("api-version", IMDS_API_VERSION.to_string()));
                (url, self.client.get(url).header("Metadata", "true"))
            }
        };
        if let Some(id) = &self.client_id {
            query.push(("client_id", id.clone()));
        }

        debug!("Requesting managed identity token from {}", url);
        let response = request
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("identity endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "identity endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("malformed identity token response: {}", e)))?;
        Ok(match token.expiry(Utc::now()) {
            Some(at) => Credential::with_expiry(token.access_token, at),
            None => Credential::new(token.access_token),
        })
    }
}

/// Choose an identity provider from the process environment.
///
/// `AZURE_ACCESS_TOKEN` wins, then the platform identity endpoint
/// (`IDENTITY_ENDPOINT` + `IDENTITY_HEADER`), then the metadata service.
/// `AZURE_CLIENT_ID` selects a user-assigned identity.
pub fn identity_from_env() -> Arc<dyn IdentityProvider> {
    if let Ok(token) = std::env::var("AZURE_ACCESS_TOKEN") {
        info!("Using static access token from AZURE_ACCESS_TOKEN");
        return Arc::new(StaticTokenProvider::new(token));
    }

    let provider = match (
        std::env::var("IDENTITY_ENDPOINT"),
        std::env::var("IDENTITY_HEADER"),
    ) {
        (Ok(url), Ok(header)) => ManagedIdentityProvider::app_service(url, header),
        _ => ManagedIdentityProvider::imds(),
    };
    let provider = match std::env::var("AZURE_CLIENT_ID") {
        Ok(id) => provider.with_client_id(id),
        Err(_) => provider,
    };
    Arc::new(provider)
}

/// Lazily acquired, process-wide identity credential.
///
/// The first caller pays for acquisition; concurrent first callers wait on
/// the same acquisition. The credential is reused until it comes within
/// five minutes of its expiry, then re-acquired under the same guard.
/// A failed acquisition is not cached, so the next caller tries again.
pub struct CredentialCache {
    provider: Arc<dyn IdentityProvider>,
    current: RwLock<Option<Credential>>,
    acquire: Mutex<()>,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
            acquire: Mutex::new(()),
        }
    }

    fn usable(&self) -> Option<Credential> {
        self.current
            .read()
            .as_ref()
            .filter(|c| !c.needs_refresh(Utc::now()))
            .cloned()
    }

    /// Return a usable credential, acquiring a new one on first use or
    /// when the cached one is about to expire.
    pub async fn get(&self) -> Result<Credential> {
        if let Some(credential) = self.usable() {
            return Ok(credential);
        }

        let _guard = self.acquire.lock().await;
        if let Some(credential) = self.usable() {
            return Ok(credential);
        }

        let refreshing = self.current.read().is_some();
        match self.provider.acquire_credential().await {
            Ok(credential) => {
                if refreshing {
                    info!("Identity credential refreshed");
                } else {
                    info!("Identity credential acquired successfully");
                }
                *self.current.write() = Some(credential.clone());
                Ok(credential)
            }
            Err(e) => {
                error!("Failed to acquire identity credential: {}", e);
                Err(e)
            }
        }
    }

    /// True while a credential is cached and not due for refresh.
    pub fn is_acquired(&self) -> bool {
        self.usable().is_some()
    }
}
