//! Container registry clients.
//!
//! [`DistributionClient`] speaks the Docker Distribution v2 API (Docker Hub,
//! GHCR, Amazon ECR public and any compliant host), including the bearer
//! token challenge. [`QuayClient`] uses Quay's own REST API for tag lookup.

use crate::config::{RegistryFlavor, RegistryOverride, RegistrySettings};
use crate::http::{join_segments, parse_url, HttpClient, HttpResponse};
use crate::manifest::{
    body_digest, config_digest, image_digest, index_digests, index_summary, layers_size,
    parse_manifest, Manifest, MANIFEST_ACCEPT,
};
use crate::RemoteError;
use base64::Engine as _;
use dockyard_schema::{Digest, ImageDigest, ImageSpec};
use oci_spec::image::{ImageConfiguration, ImageManifest};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Resolves image tags and digests on one registry host.
pub trait RegistryClient: Send + Sync {
    /// One digest per platform for a multi-arch tag, otherwise exactly one.
    fn resolve_tag(&self, repository: &str, tag: &str) -> Result<Vec<ImageDigest>, RemoteError>;

    /// The single image a digest pins.
    fn resolve_digest(&self, repository: &str, digest: &Digest)
        -> Result<ImageDigest, RemoteError>;

    /// Resolve a parsed spec by digest when it has one, else by its tag.
    fn resolve(&self, spec: &ImageSpec) -> Result<Vec<ImageDigest>, RemoteError> {
        match &spec.digest {
            Some(digest) => Ok(vec![self.resolve_digest(&spec.repository, digest)?]),
            None => self.resolve_tag(&spec.repository, spec.effective_tag()),
        }
    }
}

/// A `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Parse a bearer challenge. Returns `None` for other schemes.
pub fn parse_www_authenticate(header: &str) -> Option<BearerChallenge> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    let mut rest = params.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            let end = after.find(',').unwrap_or(after.len());
            (&after[..end], &after[end..])
        };
        match key {
            "realm" => realm = Some(value.to_owned()),
            "service" => service = Some(value.to_owned()),
            "scope" => scope = Some(value.to_owned()),
            _ => {}
        }
        rest = remaining.trim_start_matches(',').trim();
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
        scope,
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Docker Distribution v2 client for one registry host.
pub struct DistributionClient {
    base_url: String,
    http: HttpClient,
    credentials: RegistryOverride,
    /// Bearer tokens by repository.
    tokens: Mutex<HashMap<String, String>>,
}

impl DistributionClient {
    pub fn new(base_url: &str, credentials: RegistryOverride, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http: HttpClient::new(timeout),
            credentials,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(host: &str, settings: &RegistrySettings) -> Self {
        Self::new(
            &settings.base_url(host),
            settings.override_for(host).cloned().unwrap_or_default(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn basic_auth(&self) -> Option<String> {
        let user = self.credentials.username.as_deref()?;
        let pass = self.credentials.password.as_deref().unwrap_or("");
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        Some(format!("Basic {encoded}"))
    }

    fn cached_token(&self, repository: &str) -> Option<String> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository)
            .cloned()
    }

    fn authorization(&self, repository: &str) -> Option<String> {
        if let Some(token) = &self.credentials.token {
            return Some(format!("Bearer {token}"));
        }
        if let Some(token) = self.cached_token(repository) {
            return Some(format!("Bearer {token}"));
        }
        self.basic_auth()
    }

    fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        repository: &str,
    ) -> Result<String, RemoteError> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{repository}:pull"));
        let mut url = parse_url(&challenge.realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", &scope);
        }
        let url = url.as_str();

        debug!("requesting registry token for {repository}");
        let basic = self.basic_auth();
        let headers: Vec<(&str, &str)> = basic
            .as_deref()
            .map(|b| vec![("Authorization", b)])
            .unwrap_or_default();
        let body: TokenResponse = self.http.get(url, &headers)?.json(url)?;
        let token = body
            .token
            .filter(|t| !t.is_empty())
            .or(body.access_token)
            .ok_or_else(|| RemoteError::Unauthorized(format!("no token in response from {url}")))?;

        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repository.to_owned(), token.clone());
        Ok(token)
    }

    /// GET a registry path, answering one bearer challenge if needed.
    fn get(&self, path: &str, repository: &str, accept: &str) -> Result<HttpResponse, RemoteError> {
        let url = format!("{}{path}", self.base_url);
        let auth = self.authorization(repository);
        let mut headers = vec![("Accept", accept)];
        if let Some(auth) = auth.as_deref() {
            headers.push(("Authorization", auth));
        }
        let resp = self.http.get(&url, &headers)?;
        if resp.status != 401 || self.credentials.token.is_some() {
            return Ok(resp);
        }

        let Some(challenge) = resp.www_authenticate.as_deref().and_then(parse_www_authenticate)
        else {
            return Ok(resp);
        };
        let token = self.fetch_token(&challenge, repository)?;
        let bearer = format!("Bearer {token}");
        self.http
            .get(&url, &[("Accept", accept), ("Authorization", &bearer)])
    }

    fn get_manifest(&self, repository: &str, reference: &str) -> Result<HttpResponse, RemoteError> {
        let path = format!("/v2/{repository}/manifests/{reference}");
        let resp = self.get(&path, repository, MANIFEST_ACCEPT)?;
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(resp.into_error(&format!("{}{path}", self.base_url)))
        }
    }

    /// Platform of a single-arch image, read from its config blob.
    pub fn image_config(
        &self,
        repository: &str,
        config_digest: &str,
    ) -> Result<ImageConfiguration, RemoteError> {
        let path = format!("/v2/{repository}/blobs/{config_digest}");
        let url = format!("{}{path}", self.base_url);
        self.get(&path, repository, "application/json")?.json(&url)
    }

    /// Build the single-image digest, looking its platform up in the config
    /// blob. A config that cannot be read leaves the platform `unknown`.
    pub(crate) fn single_image(
        &self,
        repository: &str,
        digest: &str,
        manifest: &ImageManifest,
    ) -> ImageDigest {
        let config = match self.image_config(repository, &config_digest(manifest)) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("cannot read image config of {repository}@{digest}: {e}");
                None
            }
        };
        image_digest(digest, layers_size(manifest), config.as_ref())
    }
}

impl RegistryClient for DistributionClient {
    fn resolve_tag(&self, repository: &str, tag: &str) -> Result<Vec<ImageDigest>, RemoteError> {
        let resp = self.get_manifest(repository, tag)?;
        let digest = resp
            .content_digest
            .clone()
            .unwrap_or_else(|| body_digest(&resp.body));
        match parse_manifest(&resp.body, resp.content_type.as_deref())? {
            Manifest::Index(index) => {
                let digests = index_digests(&index);
                debug!("{repository}:{tag} is an index of {} platforms", digests.len());
                Ok(digests)
            }
            Manifest::Image(manifest) => Ok(vec![self.single_image(repository, &digest, &manifest)]),
        }
    }

    fn resolve_digest(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<ImageDigest, RemoteError> {
        let resp = self.get_manifest(repository, digest)?;
        match parse_manifest(&resp.body, resp.content_type.as_deref())? {
            Manifest::Index(index) => Ok(index_summary(
                digest,
                resp.body.len() as u64,
                &index,
            )),
            Manifest::Image(manifest) => Ok(self.single_image(repository, digest, &manifest)),
        }
    }
}

#[derive(Deserialize)]
struct QuayTagList {
    #[serde(default)]
    tags: Vec<QuayTag>,
}

#[derive(Deserialize)]
struct QuayTag {
    name: String,
    manifest_digest: String,
    #[serde(default)]
    is_manifest_list: bool,
}

#[derive(Deserialize)]
struct QuayManifest {
    digest: String,
    #[serde(default)]
    is_manifest_list: bool,
    manifest_data: String,
}

/// Quay client: tags come from Quay's REST API, platforms of single-arch
/// images from the v2 config blob.
pub struct QuayClient {
    base_url: String,
    http: HttpClient,
    v2: DistributionClient,
}

impl QuayClient {
    pub fn new(base_url: &str, credentials: RegistryOverride, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http: HttpClient::new(timeout),
            v2: DistributionClient::new(base_url, credentials, timeout),
        }
    }

    pub fn from_settings(host: &str, settings: &RegistrySettings) -> Self {
        Self::new(
            &settings.base_url(host),
            settings.override_for(host).cloned().unwrap_or_default(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// `/api/v1/repository/<repository>/<tail...>` on this host.
    fn repository_url(&self, repository: &str, tail: &[&str]) -> Result<url::Url, RemoteError> {
        join_segments(
            &self.base_url,
            ["api", "v1", "repository"]
                .into_iter()
                .chain(repository.split('/'))
                .chain(tail.iter().copied()),
        )
    }

    fn api_get<T: serde::de::DeserializeOwned>(&self, url: &url::Url) -> Result<T, RemoteError> {
        let bearer = self.v2.credentials.token.as_ref().map(|t| format!("Bearer {t}"));
        let mut headers = vec![("Accept", "application/json")];
        if let Some(b) = bearer.as_deref() {
            headers.push(("Authorization", b));
        }
        self.http.get(url.as_str(), &headers)?.json(url.as_str())
    }

    fn manifest(&self, repository: &str, digest: &str) -> Result<QuayManifest, RemoteError> {
        self.api_get(&self.repository_url(repository, &["manifest", digest])?)
    }

    fn expand(&self, repository: &str, manifest: &QuayManifest) -> Result<Vec<ImageDigest>, RemoteError> {
        match parse_manifest(manifest.manifest_data.as_bytes(), None)? {
            Manifest::Index(index) => Ok(index_digests(&index)),
            Manifest::Image(image) => Ok(vec![self.v2.single_image(
                repository,
                &manifest.digest,
                &image,
            )]),
        }
    }
}

impl RegistryClient for QuayClient {
    fn resolve_tag(&self, repository: &str, tag: &str) -> Result<Vec<ImageDigest>, RemoteError> {
        let mut url = self.repository_url(repository, &["tag", ""])?;
        url.query_pairs_mut()
            .append_pair("specificTag", tag)
            .append_pair("onlyActiveTags", "true");
        let list: QuayTagList = self.api_get(&url)?;
        let Some(found) = list.tags.into_iter().find(|t| t.name == tag) else {
            return Err(RemoteError::NotFound(format!("quay tag {repository}:{tag}")));
        };
        debug!(
            "quay {repository}:{tag} -> {} (list: {})",
            found.manifest_digest, found.is_manifest_list
        );
        let manifest = self.manifest(repository, &found.manifest_digest)?;
        self.expand(repository, &manifest)
    }

    fn resolve_digest(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<ImageDigest, RemoteError> {
        let manifest = self.manifest(repository, digest)?;
        if manifest.is_manifest_list {
            let Manifest::Index(index) = parse_manifest(manifest.manifest_data.as_bytes(), None)?
            else {
                return Err(RemoteError::UnsupportedManifest(format!(
                    "{repository}@{digest} flagged as list but is not an index"
                )));
            };
            return Ok(index_summary(
                digest,
                manifest.manifest_data.len() as u64,
                &index,
            ));
        }
        self.expand(repository, &manifest)?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("{repository}@{digest}")))
    }
}

/// Build the client matching a host's registry flavor.
pub fn select_registry_client(host: &str, settings: &RegistrySettings) -> Arc<dyn RegistryClient> {
    match settings.flavor(host) {
        RegistryFlavor::Quay => Arc::new(QuayClient::from_settings(host, settings)),
        RegistryFlavor::Distribution => Arc::new(DistributionClient::from_settings(host, settings)),
    }
}

/// Host-keyed registry clients, built on first use. Explicitly registered
/// clients take precedence.
pub struct RegistryClients {
    settings: RegistrySettings,
    clients: Mutex<HashMap<String, Arc<dyn RegistryClient>>>,
}

impl RegistryClients {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, host: &str, client: Arc<dyn RegistryClient>) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_owned(), client);
    }

    pub fn client_for(&self, host: &str) -> Arc<dyn RegistryClient> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            clients
                .entry(host.to_owned())
                .or_insert_with(|| select_registry_client(host, &self.settings)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_docker_hub_challenge() {
        let c = parse_www_authenticate(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/ubuntu:pull""#,
        )
        .unwrap();
        assert_eq!(c.realm, "https://auth.docker.io/token");
        assert_eq!(c.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(c.scope.as_deref(), Some("repository:library/ubuntu:pull"));
    }

    #[test]
    fn parse_challenge_without_scope() {
        let c = parse_www_authenticate(r#"bearer realm="https://ghcr.io/token", service="ghcr.io""#)
            .unwrap();
        assert_eq!(c.realm, "https://ghcr.io/token");
        assert_eq!(c.service.as_deref(), Some("ghcr.io"));
        assert!(c.scope.is_none());
    }

    #[test]
    fn basic_challenge_is_not_bearer() {
        assert!(parse_www_authenticate(r#"Basic realm="x""#).is_none());
        assert!(parse_www_authenticate("Bearer service=\"x\"").is_none());
    }

    #[test]
    fn basic_credentials_are_encoded() {
        let client = DistributionClient::new(
            "http://127.0.0.1:1",
            RegistryOverride {
                username: Some("user".to_owned()),
                password: Some("pass".to_owned()),
                ..RegistryOverride::default()
            },
            Duration::from_secs(1),
        );
        assert_eq!(client.authorization("r").as_deref(), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn static_token_wins_over_basic() {
        let client = DistributionClient::new(
            "http://127.0.0.1:1/",
            RegistryOverride {
                username: Some("user".to_owned()),
                token: Some("tok".to_owned()),
                ..RegistryOverride::default()
            },
            Duration::from_secs(1),
        );
        assert_eq!(client.base_url(), "http://127.0.0.1:1");
        assert_eq!(client.authorization("r").as_deref(), Some("Bearer tok"));
    }

    struct Fixed;

    impl RegistryClient for Fixed {
        fn resolve_tag(&self, _: &str, _: &str) -> Result<Vec<ImageDigest>, RemoteError> {
            Ok(Vec::new())
        }
        fn resolve_digest(&self, _: &str, d: &Digest) -> Result<ImageDigest, RemoteError> {
            Err(RemoteError::NotFound(d.to_string()))
        }
    }

    #[test]
    fn registered_client_is_returned() {
        let clients = RegistryClients::new(RegistrySettings::default());
        clients.register("quay.io", Arc::new(Fixed));
        let c = clients.client_for("quay.io");
        assert!(c
            .resolve_digest("x", &Digest::new("sha256:1"))
            .unwrap_err()
            .is_not_found());
        assert!(c.resolve_tag("x", "1").unwrap().is_empty());
    }

    #[test]
    fn default_resolve_dispatches_on_digest() {
        let spec = ImageSpec::parse("quay.io/x/y@sha256:abc").unwrap();
        assert!(Fixed.resolve(&spec).is_err());
        let spec = ImageSpec::parse("quay.io/x/y:1.0").unwrap();
        assert!(Fixed.resolve(&spec).unwrap().is_empty());
    }
}
