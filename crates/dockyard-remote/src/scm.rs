//! Source-control provider access: descriptor downloads and reference listing.

use crate::config::{ProviderEndpoint, ScmConfig};
use crate::http::{join_segments, HttpClient};
use crate::RemoteError;
use dockyard_schema::{Provider, ReferenceKind, SourceLocator};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const PAGE_SIZE: usize = 100;
/// Upper bound on pages walked per listing.
pub const MAX_PAGES: usize = 50;

/// A branch or tag as it exists upstream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RemoteReference {
    pub name: String,
    pub kind: ReferenceKind,
}

impl RemoteReference {
    pub fn branch(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: ReferenceKind::Branch,
        }
    }

    pub fn tag(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: ReferenceKind::Tag,
        }
    }
}

pub trait SourceControl: Send + Sync {
    /// Contents of `path` (relative to the repository root) at `reference`.
    /// A missing file is [`RemoteError::NotFound`].
    fn fetch_file(
        &self,
        source: &SourceLocator,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, RemoteError>;

    /// Contents of an absolute HTTP(S) import.
    fn fetch_http(&self, url: &str) -> Result<Vec<u8>, RemoteError>;

    /// Every branch and tag of the repository.
    fn list_references(&self, source: &SourceLocator) -> Result<Vec<RemoteReference>, RemoteError>;
}

#[derive(Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Deserialize)]
struct BitbucketPage {
    #[serde(default)]
    values: Vec<NamedRef>,
    #[serde(default)]
    next: Option<String>,
}

/// Segments of a repository path or a slash-separated reference.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/').split('/')
}

/// [`SourceControl`] over the GitHub, GitLab and Bitbucket REST APIs.
pub struct HttpSourceControl {
    config: ScmConfig,
    http: HttpClient,
}

impl HttpSourceControl {
    pub fn new(config: ScmConfig) -> Self {
        let http = HttpClient::new(Duration::from_secs(config.timeout_secs));
        Self { config, http }
    }

    fn endpoint(&self, provider: Provider) -> &ProviderEndpoint {
        match provider {
            Provider::GitHub => &self.config.github,
            Provider::GitLab => &self.config.gitlab,
            Provider::Bitbucket => &self.config.bitbucket,
        }
    }

    fn auth_header(provider: Provider, endpoint: &ProviderEndpoint) -> Option<(&'static str, String)> {
        let token = endpoint.token.as_deref()?;
        Some(match provider {
            Provider::GitLab => ("PRIVATE-TOKEN", token.to_owned()),
            Provider::GitHub | Provider::Bitbucket => ("Authorization", format!("Bearer {token}")),
        })
    }

    fn get(&self, provider: Provider, url: &Url) -> Result<Vec<u8>, RemoteError> {
        let url = url.as_str();
        let auth = Self::auth_header(provider, self.endpoint(provider));
        let headers: Vec<(&str, &str)> = auth
            .as_ref()
            .map(|(k, v)| vec![(*k, v.as_str())])
            .unwrap_or_default();
        self.http.get(url, &headers)?.into_body(url)
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        provider: Provider,
        url: &Url,
    ) -> Result<T, RemoteError> {
        let body = self.get(provider, url)?;
        serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Serialization(format!("invalid JSON from {url}: {e}")))
    }

    /// Walk `?per_page=&page=` pagination until a short page.
    fn paged_names(&self, provider: Provider, base: &Url) -> Result<Vec<String>, RemoteError> {
        let mut names = Vec::new();
        for page in 1..=MAX_PAGES {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());
            let batch: Vec<NamedRef> = self.get_json(provider, &url)?;
            let len = batch.len();
            names.extend(batch.into_iter().map(|r| r.name));
            if len < PAGE_SIZE {
                return Ok(names);
            }
        }
        warn!("listing {base} stopped after {MAX_PAGES} pages; later references are left out");
        Ok(names)
    }

    fn bitbucket_names(&self, first: Url) -> Result<Vec<String>, RemoteError> {
        let mut names = Vec::new();
        let mut next = Some(first.clone());
        let mut pages = 0;
        while let Some(url) = next.take() {
            if pages == MAX_PAGES {
                warn!("listing {first} stopped after {MAX_PAGES} pages; later references are left out");
                break;
            }
            pages += 1;
            let page: BitbucketPage = self.get_json(Provider::Bitbucket, &url)?;
            names.extend(page.values.into_iter().map(|r| r.name));
            next = page.next.as_deref().map(Url::parse).transpose().map_err(|e| {
                RemoteError::Serialization(format!("invalid next page link from {url}: {e}"))
            })?;
        }
        Ok(names)
    }

    fn file_url(&self, source: &SourceLocator, reference: &str, path: &str) -> Result<Url, RemoteError> {
        let endpoint = self.endpoint(source.provider);
        match source.provider {
            Provider::GitHub => {
                let raw = endpoint.raw_url.as_deref().unwrap_or(&endpoint.api_url);
                join_segments(
                    raw,
                    [source.organization.as_str(), source.repository.as_str()]
                        .into_iter()
                        .chain(segments(reference))
                        .chain(segments(path)),
                )
            }
            Provider::GitLab => {
                let repo_path = source.repo_path();
                let mut url = join_segments(
                    &endpoint.api_url,
                    [
                        "projects",
                        repo_path.as_str(),
                        "repository",
                        "files",
                        path.trim_start_matches('/'),
                        "raw",
                    ],
                )?;
                url.query_pairs_mut().append_pair("ref", reference);
                Ok(url)
            }
            Provider::Bitbucket => join_segments(
                &endpoint.api_url,
                [
                    "repositories",
                    source.organization.as_str(),
                    source.repository.as_str(),
                    "src",
                    reference,
                ]
                .into_iter()
                .chain(segments(path)),
            ),
        }
    }
}

impl SourceControl for HttpSourceControl {
    fn fetch_file(
        &self,
        source: &SourceLocator,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        let url = self.file_url(source, reference, path)?;
        debug!("fetching {path} at {reference} from {}", source.display_path());
        self.get(source.provider, &url)
    }

    fn fetch_http(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RemoteError::Config(format!("not an HTTP URL: {url}")));
        }
        self.http.get(url, &[])?.into_body(url)
    }

    fn list_references(&self, source: &SourceLocator) -> Result<Vec<RemoteReference>, RemoteError> {
        let endpoint = self.endpoint(source.provider);
        let api = endpoint.api_url.as_str();
        let org = source.organization.as_str();
        let repo = source.repository.as_str();
        let (branches, tags) = match source.provider {
            Provider::GitHub => (
                self.paged_names(source.provider, &join_segments(api, ["repos", org, repo, "branches"])?)?,
                self.paged_names(source.provider, &join_segments(api, ["repos", org, repo, "tags"])?)?,
            ),
            Provider::GitLab => {
                let repo_path = source.repo_path();
                let listing = |kind: &str| join_segments(api, ["projects", repo_path.as_str(), "repository", kind]);
                (
                    self.paged_names(source.provider, &listing("branches")?)?,
                    self.paged_names(source.provider, &listing("tags")?)?,
                )
            }
            Provider::Bitbucket => {
                let listing = |kind: &str| {
                    join_segments(api, ["repositories", org, repo, "refs", kind]).map(|mut url| {
                        url.query_pairs_mut().append_pair("pagelen", &PAGE_SIZE.to_string());
                        url
                    })
                };
                (
                    self.bitbucket_names(listing("branches")?)?,
                    self.bitbucket_names(listing("tags")?)?,
                )
            }
        };

        let mut refs: Vec<RemoteReference> = branches
            .iter()
            .map(|b| RemoteReference::branch(b))
            .chain(tags.iter().map(|t| RemoteReference::tag(t)))
            .collect();
        refs.sort();
        refs.dedup_by(|a, b| a.name == b.name);
        debug!(
            "{} has {} references upstream",
            source.display_path(),
            refs.len()
        );
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(provider: Provider) -> SourceLocator {
        SourceLocator::parse(provider, "org/repo").unwrap()
    }

    #[test]
    fn github_raw_url() {
        let scm = HttpSourceControl::new(ScmConfig::default());
        assert_eq!(
            scm.file_url(&locator(Provider::GitHub), "feature/x", "/wf/main.cwl")
                .unwrap()
                .as_str(),
            "https://raw.githubusercontent.com/org/repo/feature/x/wf/main.cwl"
        );
    }

    #[test]
    fn gitlab_file_url_encodes_project_and_path() {
        let scm = HttpSourceControl::new(ScmConfig::default());
        assert_eq!(
            scm.file_url(&locator(Provider::GitLab), "v1.0", "wf/main.wdl")
                .unwrap()
                .as_str(),
            "https://gitlab.com/api/v4/projects/org%2Frepo/repository/files/wf%2Fmain.wdl/raw?ref=v1.0"
        );
    }

    #[test]
    fn bitbucket_src_url() {
        let scm = HttpSourceControl::new(ScmConfig::default());
        assert_eq!(
            scm.file_url(&locator(Provider::Bitbucket), "main", "main.nf")
                .unwrap()
                .as_str(),
            "https://api.bitbucket.org/2.0/repositories/org/repo/src/main/main.nf"
        );
    }

    #[test]
    fn gitlab_uses_private_token_header() {
        let ep = ProviderEndpoint::new("https://gitlab.example").with_token("t");
        assert_eq!(
            HttpSourceControl::auth_header(Provider::GitLab, &ep),
            Some(("PRIVATE-TOKEN", "t".to_owned()))
        );
        assert_eq!(
            HttpSourceControl::auth_header(Provider::GitHub, &ep),
            Some(("Authorization", "Bearer t".to_owned()))
        );
        assert!(HttpSourceControl::auth_header(
            Provider::GitHub,
            &ProviderEndpoint::new("https://api.github.com")
        )
        .is_none());
    }

    #[test]
    fn fetch_http_rejects_other_schemes() {
        let scm = HttpSourceControl::new(ScmConfig::default());
        assert!(matches!(
            scm.fetch_http("file:///etc/passwd"),
            Err(RemoteError::Config(_))
        ));
    }
}
