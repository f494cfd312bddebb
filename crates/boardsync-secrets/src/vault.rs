//! Secret-store client.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use boardsync_core::{Error, Result};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::credential::Credential;

const KEYVAULT_API_VERSION: &str = "7.4";

/// A named secret value. Never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Store of named secrets, authorised by an identity credential.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch `name`. Missing secrets are `Error::NotFound`; every other
    /// failure is `Error::Auth`.
    async fn get_secret(&self, name: &str, credential: &Credential) -> Result<Secret>;
}

/// Key vault REST client.
#[derive(Debug, Clone)]
pub struct KeyVaultClient {
    client: Client,
    vault_url: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

impl KeyVaultClient {
    pub fn new(vault_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            vault_url: vault_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    async fn get_secret(&self, name: &str, credential: &Credential) -> Result<Secret> {
        let url = format!("{}/secrets/{}", self.vault_url, name);
        debug!("Fetching secret '{}' from {}", name, self.vault_url);

        let response = self
            .client
            .get(&url)
            .query(&[("api-version", KEYVAULT_API_VERSION)])
            .bearer_auth(credential.token())
            .send()
            .await
            .map_err(|e| Error::Auth(format!("secret store unreachable: {}", e)))?;

        match response.status() {
            s if s.is_success() => {
                let bundle: SecretBundle = response.json().await.map_err(|e| {
                    Error::Auth(format!("malformed secret '{}' response: {}", name, e))
                })?;
                Ok(Secret {
                    name: name.to_string(),
                    value: bundle.value,
                })
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("secret '{}'", name))),
            status => Err(Error::Auth(format!(
                "secret store returned {} for '{}'",
                status, name
            ))),
        }
    }
}

/// In-memory secret store for local runs and tests.
///
/// Values may be replaced at any time to simulate rotation. A name listed
/// with [`MemorySecretStore::deny`] answers with `Error::Auth`.
#[derive(Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, String>>,
    denied: RwLock<Vec<String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(name.into(), value.into());
    }

    pub fn deny(&self, name: impl Into<String>) {
        self.denied.write().push(name.into());
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, name: &str, _credential: &Credential) -> Result<Secret> {
        if self.denied.read().iter().any(|d| d == name) {
            return Err(Error::Auth(format!("access to secret '{}' denied", name)));
        }
        self.values
            .read()
            .get(name)
            .map(|value| Secret {
                name: name.to_string(),
                value: value.clone(),
            })
            .ok_or_else(|| Error::NotFound(format!("secret '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn vault() -> String {
        let app = Router::new().route(
            "/secrets/{name}",
            get(|Path(name): Path<String>, headers: HeaderMap| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer good-token");
                match (authorized, name.as_str()) {
                    (false, _) => Err(StatusCode::FORBIDDEN),
                    (true, "uat-username-secret") => {
                        Ok(Json(serde_json::json!({"value": "api-user", "id": "x"})))
                    }
                    (true, _) => Err(StatusCode::NOT_FOUND),
                }
            }),
        );
        serve(app).await
    }

    #[tokio::test]
    async fn test_get_secret() {
        let client = KeyVaultClient::new(format!("{}/", vault().await));
        let secret = client
            .get_secret("uat-username-secret", &Credential::new("good-token"))
            .await
            .unwrap();
        assert_eq!(secret.name, "uat-username-secret");
        assert_eq!(secret.value, "api-user");
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let client = KeyVaultClient::new(vault().await);
        let err = client
            .get_secret("uat-nothing-secret", &Credential::new("good-token"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_error() {
        let client = KeyVaultClient::new(vault().await);
        let err = client
            .get_secret("uat-username-secret", &Credential::new("stale"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_memory_store_denial() {
        let store = MemorySecretStore::new().with_secret("uat-pwd-secret", "pw");
        let credential = Credential::new("t");
        assert_eq!(store.get_secret("uat-pwd-secret", &credential).await.unwrap().value, "pw");

        store.deny("uat-pwd-secret");
        let err = store.get_secret("uat-pwd-secret", &credential).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret {
            name: "uat-pwd-secret".into(),
            value: "hunter2".into(),
        };
        let shown = format!("{secret:?}");
        assert!(shown.contains("uat-pwd-secret"));
        assert!(!shown.contains("hunter2"));
    }
}
