//! ApiSession: authenticate, then pull the board display.
//!
//! Every call is a single attempt. Errors are logged here with the URL
//! involved and returned unchanged to the caller.

use std::fmt;

use boardsync_core::{Environment, Error, Result};
use boardsync_secrets::SecretProvider;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, Url};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::board::BoardTarget;

/// Authenticated handle to the remote API, valid for one invocation.
#[derive(Clone)]
pub struct Session {
    base_uri: Url,
    cookie: Option<String>,
}

impl Session {
    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    pub fn has_cookie(&self) -> bool {
        self.cookie.is_some()
    }

    /// Build `{base_uri}/{segments...}`, percent-encoding each segment.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        join_segments(&self.base_uri, segments)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base_uri", &self.base_uri.as_str())
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Serialize)]
struct AuthBody<'a> {
    username: &'a str,
    password: &'a str,
    position: &'a str,
    incident: &'a str,
}

/// Client for one environment of the incident board API.
#[derive(Clone)]
pub struct ApiSession {
    client: Client,
    secrets: SecretProvider,
    environment: Environment,
    target: BoardTarget,
}

impl ApiSession {
    /// Redirects are not followed: the session cookie is read from the
    /// login response itself, so a redirected login is reported as rejected.
    pub fn new(secrets: SecretProvider, environment: Environment) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        let target = BoardTarget::for_environment(&environment);
        Ok(Self {
            client,
            secrets,
            environment,
            target,
        })
    }

    pub fn target(&self) -> &BoardTarget {
        &self.target
    }

    /// Log in with the environment's credentials and return the session.
    pub async fn authenticate(&self) -> Result<Session> {
        let base = self.secrets.base_uri(&self.environment).await?;
        let base_uri = parse_base_uri(&base)?;
        let username = self.secrets.username(&self.environment).await?;
        let password = self.secrets.password(&self.environment).await?;

        let body = AuthBody {
            username: &username,
            password: &password,
            position: &self.target.position,
            incident: &self.target.incident,
        };
        let auth_url = join_segments(&base_uri, &["sessions"]);
        debug!(
            "Sending authentication request to {} as {} (position={}, incident={})",
            auth_url, username, body.position, body.incident
        );

        let response = match self
            .client
            .post(auth_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Authentication request failed for {}: {}", auth_url, e);
                return Err(Error::Auth(format!("authentication request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!("Authentication rejected by {}: HTTP {}", auth_url, status);
            return Err(Error::Auth(format!(
                "authentication rejected with HTTP {}",
                status.as_u16()
            )));
        }

        let cookie = session_cookie(&response);
        info!("Successfully authenticated to incident board API");
        Ok(Session { base_uri, cookie })
    }

    /// Fetch the board display as decoded JSON (array or object).
    pub async fn pull_data(&self, session: &Session) -> Result<serde_json::Value> {
        let url = session.endpoint(&[
            "board",
            &self.target.board,
            "display",
            &self.target.display,
        ]);
        info!("Starting data pull from {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(cookie) = &session.cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Error during data pull from {}: {}", url, e);
                return Err(Error::Transport(format!("data pull from {} failed: {}", url, e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!("Data pull from {} returned HTTP {}", url, status);
            return Err(Error::Fetch {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                error!("Error reading data pull body from {}: {}", url, e);
                return Err(Error::Transport(format!("reading body from {} failed: {}", url, e)));
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!("Pulled {} bytes from {}", bytes.len(), url);
                Ok(value)
            }
            Err(e) => {
                error!("Invalid JSON in response from {}: {}", url, e);
                Err(Error::Decode(format!("invalid JSON from {}: {}", url, e)))
            }
        }
    }
}

fn parse_base_uri(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Auth(format!("base URI secret is not a valid URL: {}", e)))?;
    if url.cannot_be_a_base() {
        return Err(Error::Auth(format!("base URI cannot carry a path: {}", url)));
    }
    Ok(url)
}

fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Collapse `Set-Cookie` headers into a single `Cookie` request value.
fn session_cookie(response: &Response) -> Option<String> {
    let pairs: Vec<&str> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
