use crate::{RemoteError, USER_AGENT};
use std::io::Read;
use std::time::Duration;
use url::Url;

/// A fully-read HTTP response. Non-2xx statuses are returned, not raised,
/// so callers can inspect auth challenges.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_digest: Option<String>,
    pub www_authenticate: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map a failed status to the matching error.
    pub fn into_error(self, url: &str) -> RemoteError {
        match self.status {
            404 => RemoteError::NotFound(url.to_owned()),
            401 | 403 => RemoteError::Unauthorized(format!("HTTP {} for {url}", self.status)),
            code => RemoteError::Http(format!("HTTP {code} for {url}")),
        }
    }

    /// Body of a successful response, or the status error.
    pub fn into_body(self, url: &str) -> Result<Vec<u8>, RemoteError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(self.into_error(url))
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(self, url: &str) -> Result<T, RemoteError> {
        let body = self.into_body(url)?;
        serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Serialization(format!("invalid JSON from {url}: {e}")))
    }
}

/// Blocking HTTP client with a per-request deadline.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, RemoteError> {
        tracing::debug!("GET {url}");
        let mut req = self.agent.get(url).header("User-Agent", USER_AGENT);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let resp = match req.call() {
            Ok(r) => r,
            Err(ureq::Error::Timeout(_)) => return Err(RemoteError::Timeout(url.to_owned())),
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => return Err(RemoteError::Http(format!("{url}: {e}"))),
        };

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let status = resp.status().as_u16();
        let content_type = header("content-type");
        let content_digest = header("docker-content-digest");
        let www_authenticate = header("www-authenticate");

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                RemoteError::Timeout(url.to_owned())
            } else {
                RemoteError::Http(format!("{url}: {e}"))
            }
        })?;

        Ok(HttpResponse {
            status,
            content_type,
            content_digest,
            www_authenticate,
            body,
        })
    }
}

pub fn parse_url(raw: &str) -> Result<Url, RemoteError> {
    Url::parse(raw).map_err(|e| RemoteError::Config(format!("invalid URL {raw}: {e}")))
}

/// `base` with `segments` appended, each percent-encoded as one path
/// segment, so a `/` inside a segment is sent as `%2F`.
pub fn join_segments<'s>(
    base: &str,
    segments: impl IntoIterator<Item = &'s str>,
) -> Result<Url, RemoteError> {
    let mut url = parse_url(base)?;
    url.path_segments_mut()
        .map_err(|()| RemoteError::Config(format!("URL cannot take a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
