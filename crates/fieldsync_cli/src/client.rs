//! `reqwest` implementation of the engine's HTTP client.

use async_trait::async_trait;
use fieldsync_engine::{ConnectError, HttpClient, HttpResponse, RootConfig};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Proxy, RequestBuilder};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client authenticating with the root's credentials.
pub struct ReqwestClient {
    client: Client,
    user: Option<String>,
    pass: Option<String>,
}

impl ReqwestClient {
    /// Builds a client for one root, honouring its proxy settings.
    pub fn new(root: &RootConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = &root.proxy {
            builder = builder.proxy(Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))?);
        }
        Ok(Self {
            client: builder.build()?,
            user: root.user.clone(),
            pass: root.pass.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.pass.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<HttpResponse, ConnectError> {
        let response = self
            .authorize(request)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(connect_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(connect_error)?;
        debug!(status, bytes = body.len(), "response received");
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, ConnectError> {
        self.send(self.client.get(url)).await
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, ConnectError> {
        self.send(
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body),
        )
        .await
    }
}

fn connect_error(e: reqwest::Error) -> ConnectError {
    let detail = e.to_string();
    if e.is_timeout() {
        ConnectError::TimedOut(detail)
    } else if e.is_connect() {
        let lower = detail.to_lowercase();
        if lower.contains("dns") || lower.contains("resolve") {
            ConnectError::NotFound(detail)
        } else {
            ConnectError::Refused(detail)
        }
    } else {
        ConnectError::Other(detail)
    }
}
