use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{url} returned {status}")]
    Status { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("no credentials configured")]
    NoCredentials,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

/// A `username:token` pair used for basic auth.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    pub username: String,
    pub token: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Parse a comma-separated list of `username:token` pairs.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ServiceError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for Credential {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, token)) if !user.is_empty() && !token.is_empty() => {
                Ok(Self::new(user, token))
            }
            _ => Err(ServiceError::InvalidCredential(
                s.split(':').next().unwrap_or_default().to_string(),
            )),
        }
    }
}

// Keep tokens out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A GET request against a remote collaborator.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub auth: Option<Credential>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            auth: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn auth(mut self, credential: Option<Credential>) -> Self {
        self.auth = credential;
        self
    }

    /// URL with the query string appended, in insertion order.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}?{}", self.url, query.join("&"))
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_slice(&self.body).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    /// The body decoded as `T`, or `ServiceError::Status` for a non-success
    /// response.
    pub fn into_json<T: DeserializeOwned>(self, url: &str) -> Result<T, ServiceError> {
        if !self.is_success() {
            return Err(ServiceError::Status {
                status: self.status,
                url: url.to_string(),
            });
        }
        self.json()
    }
}

/// The narrow seam every remote call goes through.
///
/// `HttpTransport` talks to the network; `MockTransport` serves canned
/// responses in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &Request) -> Result<Response, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_list_parses_pairs() {
        let creds = Credential::parse_list("alice:t1, bob:t2,").unwrap();
        assert_eq!(creds, vec![Credential::new("alice", "t1"), Credential::new("bob", "t2")]);
    }

    #[test]
    fn credential_rejects_missing_token_without_leaking_it() {
        let err = "alice".parse::<Credential>().unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredential(ref u) if u == "alice"));
        assert!(!format!("{:?}", Credential::new("alice", "secret")).contains("secret"));
    }

    #[test]
    fn full_url_keeps_query_order() {
        let req = Request::get("https://api.github.com/repos/a/b/pulls/1/commits")
            .query("per_page", 100)
            .query("page", 2);
        assert_eq!(
            req.full_url(),
            "https://api.github.com/repos/a/b/pulls/1/commits?per_page=100&page=2"
        );
    }

    #[test]
    fn into_json_maps_failures_to_status() {
        let err = Response::new(404, "{}")
            .into_json::<serde_json::Value>("u")
            .unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 404, .. }));
        let value: serde_json::Value = Response::new(200, r#"{"a":1}"#).into_json("u").unwrap();
        assert_eq!(value["a"], 1);
    }
}
