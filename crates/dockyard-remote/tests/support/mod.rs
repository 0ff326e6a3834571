//! In-process HTTP server serving canned responses, for exercising the real
//! clients against something that speaks HTTP.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Response, Server, StatusCode};

#[derive(Clone)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Canned {
    pub fn json(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_owned(), "application/json".to_owned())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn text(body: &str) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn manifest(media_type: &str, body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_owned(), media_type.to_owned())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub url: String,
    pub authorization: Option<String>,
    pub private_token: Option<String>,
}

pub struct MockServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Captured>>>,
    _server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl MockServer {
    /// Serve `routes` keyed by path (query ignored). When `bearer` is set,
    /// every `/v2/` path demands that token and answers a challenge
    /// pointing at `/token`, which hands it out.
    pub fn start(routes: HashMap<String, Canned>, bearer: Option<&str>) -> Self {
        Self::start_with(|_| routes, bearer)
    }

    /// Like [`MockServer::start`], for routes whose bodies embed the
    /// server's own URL.
    pub fn start_with(
        build: impl FnOnce(&str) -> HashMap<String, Canned>,
        bearer: Option<&str>,
    ) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("failed to bind mock server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");
        let routes = build(&url);

        let requests = Arc::new(Mutex::new(Vec::new()));
        let srv = Arc::clone(&server);
        let reqs = Arc::clone(&requests);
        let bearer = bearer.map(str::to_owned);
        let realm = format!("{url}/token");
        let handle = std::thread::spawn(move || {
            for req in srv.incoming_requests() {
                let header = |name: &'static str| {
                    req.headers()
                        .iter()
                        .find(|h| h.field.equiv(name))
                        .map(|h| h.value.as_str().to_owned())
                };
                let captured = Captured {
                    url: req.url().to_owned(),
                    authorization: header("Authorization"),
                    private_token: header("PRIVATE-TOKEN"),
                };
                reqs.lock().unwrap().push(captured.clone());

                let path = captured.url.split('?').next().unwrap_or("").to_owned();
                if let Some(token) = &bearer {
                    if path == "/token" {
                        let body = format!(r#"{{"token":"{token}"}}"#);
                        let _ = req.respond(Response::from_string(body));
                        continue;
                    }
                    let expected = format!("Bearer {token}");
                    if path.starts_with("/v2/")
                        && captured.authorization.as_deref() != Some(expected.as_str())
                    {
                        let challenge = format!(r#"Bearer realm="{realm}",service="mock""#);
                        let resp = Response::from_string("unauthorized")
                            .with_status_code(StatusCode(401))
                            .with_header(
                                Header::from_bytes("WWW-Authenticate", challenge.as_bytes())
                                    .unwrap(),
                            );
                        let _ = req.respond(resp);
                        continue;
                    }
                }

                match routes.get(&path) {
                    Some(canned) => {
                        let mut resp = Response::from_data(canned.body.clone())
                            .with_status_code(StatusCode(canned.status));
                        for (k, v) in &canned.headers {
                            resp = resp
                                .with_header(Header::from_bytes(k.as_bytes(), v.as_bytes()).unwrap());
                        }
                        let _ = req.respond(resp);
                    }
                    None => {
                        let _ = req.respond(
                            Response::from_string("not found").with_status_code(StatusCode(404)),
                        );
                    }
                }
            }
        });

        Self {
            url,
            requests,
            _server: server,
            _handle: handle,
        }
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path_prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.starts_with(path_prefix))
            .count()
    }
}

pub fn routes(pairs: Vec<(&str, Canned)>) -> HashMap<String, Canned> {
    pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}
