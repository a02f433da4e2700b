use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use crate::{Request, Response, ServiceError, Transport};

const USER_AGENT: &str = concat!("tracklink/", env!("CARGO_PKG_VERSION"));

/// `Transport` over a shared reqwest client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Transport(format!("build client: {e}")))?;
        Ok(Self { client })
    }

    fn with_auth(&self, builder: RequestBuilder, request: &Request) -> RequestBuilder {
        match &request.auth {
            Some(cred) => builder.basic_auth(&cred.username, Some(&cred.token)),
            None => builder,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &Request) -> Result<Response, ServiceError> {
        let builder = self.client.get(&request.url).query(&request.query);
        let resp = self
            .with_auth(builder, request)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(format!("{}: {e}", request.url)))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ServiceError::Transport(format!("read body: {e}")))?;
        Ok(Response { status, body })
    }
}
