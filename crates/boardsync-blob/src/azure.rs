//! Blob service backend (Put Blob over REST).
//!
//! Requests are authorised either with a SharedKey signature computed from
//! the account key, or with a shared access signature appended to the URL.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use boardsync_core::{Error, Result, StorageDescriptor};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::{Client, StatusCode, Url};
use sha2::Sha256;
use tracing::debug;

use crate::store::{content_type_for, ObjectStore};

type HmacSha256 = Hmac<Sha256>;

const SERVICE_VERSION: &str = "2021-08-06";

#[derive(Clone)]
enum BlobAuth {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
}

/// Blob service client with create-only puts (`If-None-Match: *`).
#[derive(Clone)]
pub struct AzureBlobStore {
    client: Client,
    endpoint: Url,
    auth: BlobAuth,
}

impl fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl AzureBlobStore {
    pub fn from_descriptor(descriptor: &StorageDescriptor) -> Result<Self> {
        match descriptor {
            StorageDescriptor::SharedKey {
                blob_endpoint,
                account,
                account_key,
            } => {
                let key = STANDARD
                    .decode(account_key)
                    .map_err(|e| Error::Config(format!("AccountKey is not base64: {}", e)))?;
                Self::build(
                    blob_endpoint,
                    BlobAuth::SharedKey {
                        account: account.clone(),
                        key,
                    },
                )
            }
            StorageDescriptor::Sas { blob_endpoint, sas } => {
                Self::build(blob_endpoint, BlobAuth::Sas(sas.clone()))
            }
            StorageDescriptor::Local { .. } => Err(Error::Config(
                "local storage descriptor is not a blob service".into(),
            )),
        }
    }

    fn build(endpoint: &str, auth: BlobAuth) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid BlobEndpoint {}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid BlobEndpoint {}", endpoint)));
        }
        Ok(Self {
            client: Client::new(),
            endpoint,
            auth,
        })
    }

    fn blob_url(&self, container: &str, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(container).extend(key.split('/'));
        }
        url
    }
}

/// SharedKey string-to-sign for a create-only Put Blob.
fn string_to_sign(account: &str, url: &Url, content_length: usize, content_type: &str, date: &str) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
    // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
    // If-Unmodified-Since, Range, canonical x-ms-* headers, resource.
    format!(
        "PUT\n\n\n{length}\n\n{content_type}\n\n\n\n*\n\n\n\
         x-ms-blob-type:BlockBlob\nx-ms-date:{date}\nx-ms-version:{SERVICE_VERSION}\n\
         /{account}{path}",
        path = url.path()
    )
}

fn sign(key: &[u8], payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Storage(format!("invalid signing key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn put_object(&self, container: &str, key: &str, body: Bytes) -> Result<()> {
        let mut url = self.blob_url(container, key);
        let content_type = content_type_for(key);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let authorization = match &self.auth {
            BlobAuth::SharedKey {
                account,
                key: signing_key,
            } => {
                let to_sign = string_to_sign(account, &url, body.len(), content_type, &date);
                Some(format!("SharedKey {}:{}", account, sign(signing_key, &to_sign)?))
            }
            BlobAuth::Sas(sas) => {
                url.set_query(Some(sas.as_str()));
                None
            }
        };

        let mut request = self
            .client
            .put(url.clone())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-date", &date)
            .header("x-ms-version", SERVICE_VERSION)
            .header(CONTENT_TYPE, content_type)
            .header(IF_NONE_MATCH, "*");
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }

        let size = body.len();
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("put {}/{} failed: {}", container, key, e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("Put {} bytes to {}/{}", size, container, key);
            return Ok(());
        }

        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let target = format!("{}/{}", container, key);
        Err(match status {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Error::StorageConflict(format!("{} already exists ({})", target, code))
            }
            StatusCode::NOT_FOUND => {
                Error::StorageNotFound(format!("{} not found ({})", target, code))
            }
            _ => Error::Storage(format!("put {} returned HTTP {} ({})", target, status.as_u16(), code)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::put;
    use axum::Router;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Fake blob service: `taken.json` exists, container `missing` does not.
    fn blob_service() -> Router {
        Router::new().route(
            "/acct/{container}/{*key}",
            put(|Path((container, key)): Path<(String, String)>, headers: HeaderMap| async move {
                let auth_ok = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("SharedKey acct:"));
                let if_none_match = headers.get("if-none-match").and_then(|v| v.to_str().ok());
                if !auth_ok || if_none_match != Some("*") {
                    return (StatusCode::FORBIDDEN, [("x-ms-error-code", "AuthenticationFailed")])
                        .into_response();
                }
                if container == "missing" {
                    return (StatusCode::NOT_FOUND, [("x-ms-error-code", "ContainerNotFound")])
                        .into_response();
                }
                if key == "taken.json" {
                    return (StatusCode::CONFLICT, [("x-ms-error-code", "BlobAlreadyExists")])
                        .into_response();
                }
                StatusCode::CREATED.into_response()
            }),
        )
    }

    async fn store() -> AzureBlobStore {
        let base = serve(blob_service()).await;
        AzureBlobStore::from_descriptor(&StorageDescriptor::SharedKey {
            blob_endpoint: format!("{base}/acct"),
            account: "acct".into(),
            account_key: STANDARD.encode(b"0123456789abcdef"),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_created() {
        let store = store().await;
        store
            .put_object("blob-container", "api-observability-logs/log_1.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_classifies_failures() {
        let store = store().await;
        let err = store
            .put_object("blob-container", "taken.json", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageConflict(msg) if msg.contains("BlobAlreadyExists")));

        let err = store
            .put_object("missing", "a.json", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn test_unreachable_is_storage_error() {
        let store = AzureBlobStore::from_descriptor(&StorageDescriptor::Sas {
            blob_endpoint: "http://127.0.0.1:1".into(),
            sas: "sv=2022&sig=x".into(),
        })
        .unwrap();
        let err = store
            .put_object("c", "a.json", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_blob_url_encodes_key_segments() {
        let store = AzureBlobStore::from_descriptor(&StorageDescriptor::Sas {
            blob_endpoint: "https://acct.blob.core.windows.net/".into(),
            sas: "sv=1".into(),
        })
        .unwrap();
        let url = store.blob_url("blob-container", "api-observability-logs/log 1.json");
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/blob-container/api-observability-logs/log%201.json"
        );
    }

    #[test]
    fn test_string_to_sign_layout() {
        let url = Url::parse("http://127.0.0.1:10000/devstoreaccount1/c/k.json").unwrap();
        let s = string_to_sign("devstoreaccount1", &url, 2, "application/json", "Mon, 01 Jan 2024 00:00:00 GMT");
        let lines: Vec<&str> = s.split('\n').collect();
        assert_eq!(lines[0], "PUT");
        assert_eq!(lines[3], "2");
        assert_eq!(lines[5], "application/json");
        assert_eq!(lines[9], "*");
        assert_eq!(lines[12], "x-ms-blob-type:BlockBlob");
        assert_eq!(lines.last().copied(), Some("/devstoreaccount1/devstoreaccount1/c/k.json"));

        let signature = sign(b"key", &s).unwrap();
        assert_eq!(STANDARD.decode(signature).unwrap().len(), 32);
    }

    #[test]
    fn test_rejects_bad_account_key() {
        let err = AzureBlobStore::from_descriptor(&StorageDescriptor::SharedKey {
            blob_endpoint: "https://acct.blob.core.windows.net".into(),
            account: "acct".into(),
            account_key: "not base64!".into(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
