//! Identity credential cache and secret-store access.
//!
//! The identity credential is acquired once per process and reused until it
//! nears expiry; named secrets are fetched fresh on every request because they
//! may rotate independently of the credential.

pub mod credential;
pub mod provider;
pub mod vault;

pub use credential::{
    identity_from_env, Credential, CredentialCache, IdentityProvider, ManagedIdentityProvider,
    StaticTokenProvider,
};
pub use provider::SecretProvider;
pub use vault::{KeyVaultClient, MemorySecretStore, Secret, SecretStore};
