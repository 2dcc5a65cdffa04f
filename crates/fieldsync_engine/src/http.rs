//! HTTP remote table service.
//!
//! Talks to the instance's JSON web service. The actual HTTP client is
//! abstracted via a trait so different implementations (reqwest, hyper, a
//! canned test client) can be plugged in.
//!
//! Requests look like:
//!
//! ```text
//! GET  /sys_script.do?JSONv2=&sysparm_record_count=1&sysparm_action=getRecords
//!      &displayvalue=true&sysparm_query=name%3Dfoo%5Esys_class_name%3Dsys_script
//! POST /sys_script.do?JSONv2=&sysparm_record_count=1&sysparm_action=update
//!      &displayvalue=true&sysparm_sys_id=0a1b...        body: {"script": "..."}
//! ```

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteTable;
use async_trait::async_trait;
use fieldsync_protocol::{FieldPayload, RecordQuery, RecordSelector, RemoteIdentity, RemoteRecord};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a 200 response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// Why a request never got a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The connection was refused.
    Refused(String),
    /// The host name did not resolve.
    NotFound(String),
    /// The request timed out.
    TimedOut(String),
    /// Anything else.
    Other(String),
}

impl ConnectError {
    fn help(&self) -> (&'static str, &str) {
        match self {
            ConnectError::Refused(d) => ("Missing internet connection or connection was refused!", d.as_str()),
            ConnectError::NotFound(d) => ("No connection available (do we have internet?)", d.as_str()),
            ConnectError::TimedOut(d) => ("Connection timed out. Internet down?", d.as_str()),
            ConnectError::Other(d) => ("Request failed. Check the internet connection.", d.as_str()),
        }
    }
}

/// HTTP client abstraction.
///
/// Implementations own authentication, proxies and timeouts.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    async fn get(&self, url: &str) -> Result<HttpResponse, ConnectError>;

    /// Sends a POST request with a JSON body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, ConnectError>;
}

/// Remote table service over the instance's JSON web service.
pub struct HttpTableService<C: HttpClient> {
    /// Base URL of the instance (e.g., "https://dev.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTableService<C> {
    /// Creates a service.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Builds the request URL for an action on the query's table.
    pub fn request_url(&self, query: &RecordQuery, action: &str, max_rows: u32) -> SyncResult<Url> {
        let mut url = Url::parse(&format!("{}/{}.do", self.base_url, query.table))
            .map_err(|e| SyncError::Config(format!("invalid instance url {}: {e}", self.base_url)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("JSONv2", "")
                .append_pair("sysparm_record_count", &max_rows.to_string())
                .append_pair("sysparm_action", action)
                .append_pair("displayvalue", "true");
            match &query.selector {
                RecordSelector::Id(id) => {
                    pairs.append_pair("sysparm_sys_id", id);
                }
                RecordSelector::Key { field, value } if action == "getRecords" => {
                    // Keeps extended tables restricted to the queried one.
                    let filter = format!("{field}={value}^sys_class_name={}", query.table);
                    pairs.append_pair("sysparm_query", &filter);
                }
                RecordSelector::Key { field, value } => {
                    pairs.append_pair("sysparm_query", &format!("{field}={value}"));
                }
            }
        }
        Ok(url)
    }

    fn check(&self, result: Result<HttpResponse, ConnectError>) -> SyncResult<Vec<RemoteRecord>> {
        let outcome = result
            .map_err(|e| {
                let (help, details) = e.help();
                warn!(%help, %details, "request failed");
                SyncError::transport_retryable(format!("{help}\ndetails: {details}"))
            })
            .and_then(parse_response);
        match &outcome {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        outcome
    }
}

#[async_trait]
impl<C: HttpClient> RemoteTable for HttpTableService<C> {
    async fn fetch(&self, query: &RecordQuery, max_rows: u32) -> SyncResult<Vec<RemoteRecord>> {
        let url = self.request_url(query, "getRecords", max_rows.max(1))?;
        debug!(%url, "fetching records");
        let response = self.client.get(url.as_str()).await;
        self.check(response)
    }

    async fn update(&self, query: &RecordQuery, payload: &FieldPayload) -> SyncResult<()> {
        let url = self.request_url(query, "update", 1)?;
        let body = serde_json::to_vec(payload)?;
        debug!(%url, "updating record");
        let response = self.client.post(url.as_str(), body).await;
        self.check(response).map(|_| ())
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Translates a response into records or an error.
pub fn parse_response(response: HttpResponse) -> SyncResult<Vec<RemoteRecord>> {
    if response.status != 200 {
        let mut message = format!("{} - {}", response.status, reason(response.status));
        let help = match response.status {
            401 => Some("Check credentials."),
            302 => Some("Verify JSON Web Service plugin is activated."),
            _ => None,
        };
        if let Some(help) = help {
            message.push_str(" - ");
            message.push_str(help);
        }
        return Err(if response.status >= 500 {
            SyncError::transport_retryable(message)
        } else {
            SyncError::transport_fatal(message)
        });
    }

    let value: Value = serde_json::from_slice(&response.body)
        .map_err(|e| SyncError::Protocol(format!("response is not JSON: {e}")))?;
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error.as_str().map_or_else(|| error.to_string(), str::to_string);
        return Err(SyncError::RemoteRejected(message));
    }
    let records = value
        .get("records")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::Protocol(format!("response missing \"records\" key: {value}")))?;

    Ok(records
        .iter()
        .filter_map(Value::as_object)
        .map(|object| {
            let fields: BTreeMap<String, String> = object
                .iter()
                .filter_map(|(name, value)| scalar(value).map(|v| (name.clone(), v)))
                .collect();
            let identity = RemoteIdentity {
                record_id: fields.get("sys_id").cloned(),
                updated_at: fields.get("sys_updated_on").cloned(),
                updated_by: fields.get("sys_updated_by").cloned(),
            };
            RemoteRecord { identity, fields }
        })
        .collect())
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<Result<HttpResponse, ConnectError>>>,
        seen: Mutex<Vec<(String, Option<Vec<u8>>)>>,
    }

    impl TestClient {
        fn respond(&self, response: Result<HttpResponse, ConnectError>) {
            *self.response.lock() = Some(response);
        }

        fn next(&self) -> Result<HttpResponse, ConnectError> {
            self.response
                .lock()
                .clone()
                .unwrap_or_else(|| Err(ConnectError::Other("no response set".into())))
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, ConnectError> {
            self.seen.lock().push((url.to_string(), None));
            self.next()
        }

        async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, ConnectError> {
            self.seen.lock().push((url.to_string(), Some(body)));
            self.next()
        }
    }

    const RECORDS: &str = r#"{"records":[{"sys_id":"0a1b","name":"foo","script":"gs.log(1);","active":true,"order":100,"sys_updated_on":"2024-03-01 10:00:00","sys_updated_by":"admin","vars":[]}]}"#;

    #[tokio::test]
    async fn fetch_by_key() {
        let service = HttpTableService::new("https://dev.example.com/", TestClient::default());
        let client = service.client();
        client.respond(Ok(HttpResponse::ok(RECORDS)));

        let query = RecordQuery::by_key("sys_script", "script", "name", "foo");
        let rows = service.fetch(&query, 1).await.unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.field("script"), Some("gs.log(1);"));
        assert_eq!(row.field("active"), Some("true"));
        assert_eq!(row.field("order"), Some("100"));
        assert_eq!(row.field("vars"), None);
        assert_eq!(row.identity.record_id.as_deref(), Some("0a1b"));
        assert_eq!(row.identity.updated_by.as_deref(), Some("admin"));

        let (url, body) = client.seen.lock()[0].clone();
        assert!(body.is_none());
        assert_eq!(
            url,
            "https://dev.example.com/sys_script.do?JSONv2=&sysparm_record_count=1\
             &sysparm_action=getRecords&displayvalue=true\
             &sysparm_query=name%3Dfoo%5Esys_class_name%3Dsys_script"
        );
    }

    #[tokio::test]
    async fn update_by_id_posts_payload() {
        let service = HttpTableService::new("https://dev.example.com", TestClient::default());
        let client = service.client();
        client.respond(Ok(HttpResponse::ok(RECORDS)));

        let query = RecordQuery::by_id("sys_script", "script", "0a1b");
        let payload = FieldPayload::from([("script".to_string(), "gs.log(2);".to_string())]);
        service.update(&query, &payload).await.unwrap();

        let (url, body) = client.seen.lock()[0].clone();
        assert!(url.ends_with("sysparm_action=update&displayvalue=true&sysparm_sys_id=0a1b"));
        let body: Value = serde_json::from_slice(&body.unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"script": "gs.log(2);"}));
    }

    #[test]
    fn status_errors_carry_help() {
        let err = parse_response(HttpResponse {
            status: 401,
            body: Vec::new(),
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "transport error: 401 - Unauthorized - Check credentials."
        );
        assert!(!err.is_retryable());

        let err = parse_response(HttpResponse {
            status: 302,
            body: Vec::new(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("JSON Web Service plugin"));

        let err = parse_response(HttpResponse {
            status: 503,
            body: Vec::new(),
        })
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn body_errors() {
        let err = parse_response(HttpResponse::ok(r#"{"error":"json object is null"}"#)).unwrap_err();
        assert!(matches!(err, SyncError::RemoteRejected(ref m) if m == "json object is null"));

        let err = parse_response(HttpResponse::ok(r#"{"result":[]}"#)).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));

        let err = parse_response(HttpResponse::ok("<html>")).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));

        assert!(parse_response(HttpResponse::ok(r#"{"records":[]}"#))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn connection_failures_are_retryable() {
        let service = HttpTableService::new("https://dev.example.com", TestClient::default());
        let client = service.client();
        client.respond(Err(ConnectError::Refused("ECONNREFUSED".into())));

        let query = RecordQuery::by_id("sys_script", "script", "0a1b");
        let err = service.fetch(&query, 1).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection was refused"));
        assert!(service.last_error().is_some());

        client.respond(Ok(HttpResponse::ok(RECORDS)));
        service.fetch(&query, 1).await.unwrap();
        assert!(service.last_error().is_none());
    }
}
