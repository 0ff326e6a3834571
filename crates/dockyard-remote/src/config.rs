use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// API location and credentials of one source-control provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub api_url: String,
    /// Separate host for raw file downloads (GitHub only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            raw_url: None,
            token: None,
        }
    }

    #[must_use]
    pub fn with_raw_url(mut self, raw_url: &str) -> Self {
        self.raw_url = Some(raw_url.trim_end_matches('/').to_owned());
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_owned());
        self
    }
}

fn default_github() -> ProviderEndpoint {
    ProviderEndpoint::new("https://api.github.com")
        .with_raw_url("https://raw.githubusercontent.com")
}

fn default_gitlab() -> ProviderEndpoint {
    ProviderEndpoint::new("https://gitlab.com/api/v4")
}

fn default_bitbucket() -> ProviderEndpoint {
    ProviderEndpoint::new("https://api.bitbucket.org/2.0")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmConfig {
    #[serde(default = "default_github")]
    pub github: ProviderEndpoint,
    #[serde(default = "default_gitlab")]
    pub gitlab: ProviderEndpoint,
    #[serde(default = "default_bitbucket")]
    pub bitbucket: ProviderEndpoint,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            github: default_github(),
            gitlab: default_gitlab(),
            bitbucket: default_bitbucket(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// API family spoken by a registry host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryFlavor {
    Distribution,
    Quay,
}

/// Per-host registry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOverride {
    /// Base URL replacing `https://<host>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<RegistryFlavor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Pre-issued bearer token; skips the token challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub overrides: BTreeMap<String, RegistryOverride>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            overrides: BTreeMap::new(),
        }
    }
}

impl RegistrySettings {
    pub fn override_for(&self, host: &str) -> Option<&RegistryOverride> {
        self.overrides.get(host)
    }

    /// Base URL for a registry host, honouring overrides.
    pub fn base_url(&self, host: &str) -> String {
        if let Some(url) = self.override_for(host).and_then(|o| o.url.as_deref()) {
            return url.trim_end_matches('/').to_owned();
        }
        match host {
            "docker.io" => "https://registry-1.docker.io".to_owned(),
            other => format!("https://{other}"),
        }
    }

    pub fn flavor(&self, host: &str) -> RegistryFlavor {
        if let Some(flavor) = self.override_for(host).and_then(|o| o.flavor) {
            return flavor;
        }
        if host == "quay.io" {
            RegistryFlavor::Quay
        } else {
            RegistryFlavor::Distribution
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scm_defaults_point_at_public_hosts() {
        let cfg = ScmConfig::default();
        assert_eq!(cfg.github.api_url, "https://api.github.com");
        assert_eq!(
            cfg.github.raw_url.as_deref(),
            Some("https://raw.githubusercontent.com")
        );
        assert_eq!(cfg.timeout_secs, 30);
    }

    #[test]
    fn provider_endpoint_strips_trailing_slash() {
        let ep = ProviderEndpoint::new("https://git.example.com/api/v4/").with_token("t");
        assert_eq!(ep.api_url, "https://git.example.com/api/v4");
        assert_eq!(ep.token.as_deref(), Some("t"));
    }

    #[test]
    fn registry_base_url_and_flavor() {
        let mut settings = RegistrySettings::default();
        assert_eq!(settings.base_url("docker.io"), "https://registry-1.docker.io");
        assert_eq!(settings.base_url("ghcr.io"), "https://ghcr.io");
        assert_eq!(settings.flavor("quay.io"), RegistryFlavor::Quay);
        assert_eq!(settings.flavor("public.ecr.aws"), RegistryFlavor::Distribution);

        settings.overrides.insert(
            "registry.local".to_owned(),
            RegistryOverride {
                url: Some("http://127.0.0.1:5000/".to_owned()),
                flavor: Some(RegistryFlavor::Quay),
                ..RegistryOverride::default()
            },
        );
        assert_eq!(settings.base_url("registry.local"), "http://127.0.0.1:5000");
        assert_eq!(settings.flavor("registry.local"), RegistryFlavor::Quay);
    }

    #[test]
    fn settings_parse_from_toml() {
        let settings: RegistrySettings = toml::from_str(
            r#"
            timeout_secs = 5
            [overrides."ghcr.io"]
            token = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(settings.timeout_secs, 5);
        assert_eq!(
            settings.override_for("ghcr.io").unwrap().token.as_deref(),
            Some("abc")
        );
    }
}
