//! SecretProvider: named secrets behind the shared identity credential.

use std::sync::Arc;

use boardsync_core::{Environment, Result};
use tracing::{error, info};

use crate::credential::CredentialCache;
use crate::vault::SecretStore;

/// Resolves named secrets using the process-wide identity credential.
#[derive(Clone)]
pub struct SecretProvider {
    credentials: Arc<CredentialCache>,
    store: Arc<dyn SecretStore>,
}

impl SecretProvider {
    pub fn new(credentials: Arc<CredentialCache>, store: Arc<dyn SecretStore>) -> Self {
        Self { credentials, store }
    }

    /// Fetch a secret value. Always hits the store.
    pub async fn get_secret(&self, name: &str) -> Result<String> {
        let credential = self.credentials.get().await?;
        match self.store.get_secret(name, &credential).await {
            Ok(secret) => {
                info!("Secret '{}' retrieved successfully", name);
                Ok(secret.value)
            }
            Err(e) => {
                error!(kind = e.kind(), "Failed to retrieve secret '{}': {}", name, e);
                Err(e)
            }
        }
    }

    pub async fn username(&self, env: &Environment) -> Result<String> {
        self.get_secret(&env.secret_name("username")).await
    }

    pub async fn password(&self, env: &Environment) -> Result<String> {
        self.get_secret(&env.secret_name("pwd")).await
    }

    /// Base URI of the remote API.
    pub async fn base_uri(&self, env: &Environment) -> Result<String> {
        self.get_secret(&env.secret_name("url")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use boardsync_core::Error;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;

    use crate::credential::{Credential, IdentityProvider, StaticTokenProvider};
    use crate::vault::Secret;

    #[derive(Default)]
    struct RotatingStore {
        values: Mutex<HashMap<String, String>>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SecretStore for RotatingStore {
        async fn get_secret(&self, name: &str, _credential: &Credential) -> Result<Secret> {
            self.requests.lock().push(name.to_string());
            self.values
                .lock()
                .get(name)
                .map(|value| Secret {
                    name: name.to_string(),
                    value: value.clone(),
                })
                .ok_or_else(|| Error::NotFound(format!("secret '{name}'")))
        }
    }

    struct NoIdentity;

    /// Issues `token-0` close to expiry, later tokens valid for a day.
    #[derive(Default)]
    struct ShortLivedFirst {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl IdentityProvider for ShortLivedFirst {
        async fn acquire_credential(&self) -> Result<Credential> {
            let n = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls - 1
            };
            let lifetime = if n == 0 { Duration::seconds(30) } else { Duration::hours(24) };
            Ok(Credential::with_expiry(format!("token-{n}"), Utc::now() + lifetime))
        }
    }

    /// Rejects `token-0` the way an expired bearer token is rejected.
    struct ExpiryCheckingStore;

    #[async_trait]
    impl SecretStore for ExpiryCheckingStore {
        async fn get_secret(&self, name: &str, credential: &Credential) -> Result<Secret> {
            if credential.token() == "token-0" {
                return Err(Error::Auth("401 token expired".into()));
            }
            Ok(Secret {
                name: name.to_string(),
                value: "v".into(),
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for NoIdentity {
        async fn acquire_credential(&self) -> Result<Credential> {
            Err(Error::Auth("no managed identity".into()))
        }
    }

    fn provider_with(store: Arc<RotatingStore>) -> SecretProvider {
        let cache = Arc::new(CredentialCache::new(Arc::new(StaticTokenProvider::new("t"))));
        SecretProvider::new(cache, store)
    }

    #[tokio::test]
    async fn test_secrets_fetched_fresh() {
        let store = Arc::new(RotatingStore::default());
        store.values.lock().insert("uat-pwd-secret".into(), "old".into());
        let provider = provider_with(store.clone());
        let env = Environment::new("uat");

        assert_eq!(provider.password(&env).await.unwrap(), "old");
        store.values.lock().insert("uat-pwd-secret".into(), "rotated".into());
        assert_eq!(provider.password(&env).await.unwrap(), "rotated");
        assert_eq!(store.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_environment_qualified_names() {
        let store = Arc::new(RotatingStore::default());
        {
            let mut values = store.values.lock();
            values.insert("prod-username-secret".into(), "u".into());
            values.insert("prod-url-secret".into(), "https://api".into());
        }
        let provider = provider_with(store.clone());
        let env = Environment::new("prod");

        assert_eq!(provider.username(&env).await.unwrap(), "u");
        assert_eq!(provider.base_uri(&env).await.unwrap(), "https://api");
        assert!(matches!(provider.password(&env).await, Err(Error::NotFound(_))));
        assert_eq!(
            *store.requests.lock(),
            vec!["prod-username-secret", "prod-url-secret", "prod-pwd-secret"]
        );
    }

    #[tokio::test]
    async fn test_expiring_credential_recovers_across_calls() {
        let identity = Arc::new(ShortLivedFirst::default());
        let cache = Arc::new(CredentialCache::new(identity.clone()));
        let provider = SecretProvider::new(cache, Arc::new(ExpiryCheckingStore));

        assert!(matches!(provider.get_secret("uat-url-secret").await, Err(Error::Auth(_))));
        assert_eq!(provider.get_secret("uat-url-secret").await.unwrap(), "v");
        assert_eq!(provider.get_secret("uat-url-secret").await.unwrap(), "v");
        assert_eq!(*identity.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_identity_failure_is_auth_error() {
        let store = Arc::new(RotatingStore::default());
        let cache = Arc::new(CredentialCache::new(Arc::new(NoIdentity)));
        let provider = SecretProvider::new(cache, store.clone());

        let err = provider.get_secret("uat-pwd-secret").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(store.requests.lock().is_empty());
    }
}
