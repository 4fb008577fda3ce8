use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::HmisError;

pub const API_PATH: &str = "api/";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP basic credentials. The password never shows up in `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"XXXXXX")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', 'XXXXXX')", self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Text(String),
    Flag(bool),
}

impl QueryValue {
    pub fn as_param(&self) -> String {
        match self {
            QueryValue::Text(value) => value.clone(),
            QueryValue::Flag(value) => value.to_string(),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Text(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Flag(value)
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        QueryValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum PostResponse {
    Json(Value),
    Raw { status: u16, body: String },
}

/// Read access to the remote metadata service. Paths are relative to the
/// instance base URL, e.g. `api/organisationUnits.json`.
pub trait MetadataApi: Send + Sync {
    fn server_url(&self) -> &str;

    fn get(&self, path: &str, query: &[(&str, QueryValue)]) -> Result<Value, HmisError>;

    fn post(
        &self,
        path: &str,
        query: &[(&str, QueryValue)],
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<PostResponse, HmisError>;
}

impl<T: MetadataApi + ?Sized> MetadataApi for &T {
    fn server_url(&self) -> &str {
        (**self).server_url()
    }

    fn get(&self, path: &str, query: &[(&str, QueryValue)]) -> Result<Value, HmisError> {
        (**self).get(path, query)
    }

    fn post(
        &self,
        path: &str,
        query: &[(&str, QueryValue)],
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<PostResponse, HmisError> {
        (**self).post(path, query, headers, body)
    }
}

/// Blocking client sharing one connection pool across every request of the
/// process.
#[derive(Clone)]
pub struct Dhis2HttpClient {
    client: Client,
    base_url: Url,
    server_url: String,
    credentials: Credentials,
}

impl Dhis2HttpClient {
    pub fn new(
        server_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, HmisError> {
        let base_url = normalize_base_url(server_url)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hmis-metadata/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HmisError::Config(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HmisError::Connection {
                url: server_url.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url,
            server_url: server_url.to_string(),
            credentials,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn resource_url(&self, path: &str) -> Result<Url, HmisError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| HmisError::Config(format!("invalid resource path {path}: {err}")))
    }

    fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response, HmisError> {
        let response = request
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .map_err(|err| HmisError::Connection {
                url: url.to_string(),
                message: describe_send_error(&err),
            })?;
        handle_status(response, url)
    }
}

impl fmt::Debug for Dhis2HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dhis2HttpClient({}, {})", self.server_url, self.credentials)
    }
}

impl MetadataApi for Dhis2HttpClient {
    fn server_url(&self) -> &str {
        &self.server_url
    }

    fn get(&self, path: &str, query: &[(&str, QueryValue)]) -> Result<Value, HmisError> {
        let url = self.resource_url(path)?;
        debug!(%url, "GET");
        let response = self.send(&url, self.client.get(url.clone()).query(&query_pairs(query)))?;
        let body = response.text().map_err(|err| HmisError::Connection {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        parse_json_body(&body, url.as_str())
    }

    fn post(
        &self,
        path: &str,
        query: &[(&str, QueryValue)],
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<PostResponse, HmisError> {
        let url = self.resource_url(path)?;
        debug!(%url, "POST");
        let mut request = self.client.post(url.clone()).query(&query_pairs(query));
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| HmisError::Config(err.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|err| HmisError::Config(err.to_string()))?;
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = self.send(&url, request)?;
        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("json"))
            .unwrap_or(false);
        let text = response.text().map_err(|err| HmisError::Connection {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        if is_json {
            return parse_json_body(&text, url.as_str()).map(PostResponse::Json);
        }
        Ok(PostResponse::Raw { status, body: text })
    }
}

fn handle_status(response: Response, url: &Url) -> Result<Response, HmisError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .unwrap_or_else(|_| "DHIS2 request failed".to_string());
    Err(HmisError::Transport {
        status,
        url: url.to_string(),
        body,
    })
}

fn describe_send_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn normalize_base_url(server_url: &str) -> Result<Url, HmisError> {
    let trimmed = server_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|err| HmisError::Config(format!("invalid server url {server_url}: {err}")))
}

fn query_pairs(query: &[(&str, QueryValue)]) -> Vec<(String, String)> {
    query
        .iter()
        .map(|(key, value)| (key.to_string(), value.as_param()))
        .collect()
}

static HEX_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\x([a-zA-Z0-9]{2})").expect("static regex"));

/// Rewrites `\xNN` escapes, which some servers emit inside names, into
/// JSON `\u00NN` escapes.
pub fn repair_escapes(text: &str) -> String {
    HEX_ESCAPE.replace_all(text, r"\u00$1").into_owned()
}

pub fn parse_json_body(body: &str, url: &str) -> Result<Value, HmisError> {
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            let repaired = repair_escapes(body);
            if repaired == body {
                return Err(HmisError::Payload {
                    url: url.to_string(),
                    message: first.to_string(),
                });
            }
            debug!(%url, "retrying JSON parse after repairing \\x escapes");
            serde_json::from_str(&repaired).map_err(|err| HmisError::Payload {
                url: url.to_string(),
                message: err.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use assert_matches::assert_matches;

    use super::*;

    /// Answers the first request on a local port with `response`.
    fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = stream;
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{address}/")
    }

    fn client(server_url: &str) -> Dhis2HttpClient {
        Dhis2HttpClient::new(
            server_url,
            Credentials::new("admin", "district"),
            DEFAULT_TIMEOUT,
        )
        .unwrap()
    }

    #[test]
    fn resource_url_keeps_instance_context_path() {
        let client = client("https://hmis.example.org/hmis");
        let url = client.resource_url("api/organisationUnits.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://hmis.example.org/hmis/api/organisationUnits.json"
        );

        let url = client.resource_url("/api/dataSets.json").unwrap();
        assert_eq!(url.as_str(), "https://hmis.example.org/hmis/api/dataSets.json");
    }

    #[test]
    fn invalid_server_url_is_config_error() {
        let err = Dhis2HttpClient::new("not a url", Credentials::new("a", "b"), DEFAULT_TIMEOUT)
            .unwrap_err();
        assert_matches!(err, HmisError::Config(_));
    }

    #[test]
    fn credentials_are_redacted() {
        let client = client("https://play.dhis2.org/2.31.8/");
        let rendered = format!("{client:?} {:?}", client.credentials());
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("district"));
    }

    #[test]
    fn query_values_render_as_params() {
        let pairs = query_pairs(&[("fields", "id,name".into()), ("paging", false.into())]);
        assert_eq!(
            pairs,
            vec![
                ("fields".to_string(), "id,name".to_string()),
                ("paging".to_string(), "false".to_string())
            ]
        );
    }

    #[test]
    fn repairs_hex_escapes() {
        let body = r#"{"name": "Caf\xe9"}"#;
        let value = parse_json_body(body, "http://x").unwrap();
        assert_eq!(value["name"], "Café");
    }

    #[test]
    fn unparseable_body_is_payload_error() {
        let err = parse_json_body("<html>", "http://x").unwrap_err();
        assert_matches!(err, HmisError::Payload { .. });
        assert!(err.is_transport());
    }

    #[test]
    fn error_status_is_transport_error_with_body() {
        let body = "maintenance in progress";
        let server_url = serve_once(format!(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        let err = client(&server_url)
            .get("api/organisationUnits.json", &[("paging", false.into())])
            .unwrap_err();
        assert_matches!(
            err,
            HmisError::Transport { status: 503, ref url, ref body }
                if url.ends_with("api/organisationUnits.json")
                    && body == "maintenance in progress"
        );
        assert!(err.is_transport());
    }

    #[test]
    fn refused_connection_is_connection_error() {
        let address = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let err = client(&format!("http://{address}/"))
            .get("api/dataSets.json", &[])
            .unwrap_err();
        assert_matches!(err, HmisError::Connection { .. });
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(5));
        });
        let client = Dhis2HttpClient::new(
            &format!("http://{address}/"),
            Credentials::new("admin", "district"),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client.get("api/dataElements.json", &[]).unwrap_err();
        assert_matches!(err, HmisError::Connection { ref message, .. } if message.contains("timed out"));
    }
}
