//! Registry clients against an in-process mock registry.

mod support;

use dockyard_remote::manifest::{MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_INDEX};
use dockyard_remote::{
    DistributionClient, QuayClient, RegistryClient, RegistryClients, RegistryFlavor,
    RegistryOverride, RegistrySettings,
};
use dockyard_schema::{Digest, ImageSpec};
use std::time::Duration;
use support::{routes, Canned, MockServer};

const INDEX: &str = r#"{
    "schemaVersion": 2,
    "mediaType": "application/vnd.oci.image.index.v1+json",
    "manifests": [
        {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:amd", "size": 500, "platform": {"os": "linux", "architecture": "amd64"}},
        {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:arm", "size": 501, "platform": {"os": "linux", "architecture": "arm64", "variant": "v8"}},
        {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:att", "size": 90, "platform": {"os": "unknown", "architecture": "unknown"}}
    ]
}"#;

const SINGLE: &str = r#"{
    "schemaVersion": 2,
    "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
    "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "digest": "sha256:cfg", "size": 20},
    "layers": [{"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:l1", "size": 1000}, {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "digest": "sha256:l2", "size": 24}]
}"#;

const CONFIG: &str = r#"{"os": "linux", "architecture": "amd64", "rootfs": {"type": "layers", "diff_ids": []}}"#;

fn client(server: &MockServer) -> DistributionClient {
    DistributionClient::new(
        &server.url,
        RegistryOverride::default(),
        Duration::from_secs(5),
    )
}

#[test]
fn multi_arch_tag_yields_one_digest_per_platform() {
    let server = MockServer::start(
        routes(vec![(
            "/v2/lib/tool/manifests/1.0",
            Canned::manifest(MEDIA_TYPE_OCI_INDEX, INDEX),
        )]),
        None,
    );
    let digests = client(&server).resolve_tag("lib/tool", "1.0").unwrap();
    assert_eq!(digests.len(), 2);
    assert_eq!(digests[0].digest, "sha256:amd");
    assert_eq!(digests[1].platform(), "linux/arm64/v8");
}

#[test]
fn single_arch_tag_reads_platform_from_config() {
    let server = MockServer::start(
        routes(vec![
            (
                "/v2/lib/tool/manifests/2.0",
                Canned::manifest(MEDIA_TYPE_DOCKER_MANIFEST, SINGLE)
                    .with_header("Docker-Content-Digest", "sha256:single"),
            ),
            ("/v2/lib/tool/blobs/sha256:cfg", Canned::json(CONFIG)),
        ]),
        None,
    );
    let digests = client(&server).resolve_tag("lib/tool", "2.0").unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].digest, "sha256:single");
    assert_eq!(digests[0].size, 1024);
    assert_eq!(digests[0].platform(), "linux/amd64");
}

#[test]
fn missing_content_digest_header_falls_back_to_body_hash() {
    let server = MockServer::start(
        routes(vec![
            (
                "/v2/lib/tool/manifests/3.0",
                Canned::manifest(MEDIA_TYPE_DOCKER_MANIFEST, SINGLE),
            ),
            ("/v2/lib/tool/blobs/sha256:cfg", Canned::json(CONFIG)),
        ]),
        None,
    );
    let digests = client(&server).resolve_tag("lib/tool", "3.0").unwrap();
    assert_eq!(
        digests[0].digest,
        dockyard_remote::manifest::body_digest(SINGLE.as_bytes())
    );
}

#[test]
fn unreadable_config_leaves_platform_unknown() {
    let server = MockServer::start(
        routes(vec![(
            "/v2/lib/tool/manifests/4.0",
            Canned::manifest(MEDIA_TYPE_DOCKER_MANIFEST, SINGLE),
        )]),
        None,
    );
    let digests = client(&server).resolve_tag("lib/tool", "4.0").unwrap();
    assert_eq!(digests[0].os, "unknown");
    assert_eq!(digests[0].architecture, "unknown");
}

#[test]
fn digest_pinning_an_index_yields_exactly_one() {
    let server = MockServer::start(
        routes(vec![(
            "/v2/lib/tool/manifests/sha256:idx",
            Canned::manifest(MEDIA_TYPE_OCI_INDEX, INDEX),
        )]),
        None,
    );
    let spec = ImageSpec::parse("registry.test/lib/tool@sha256:idx").unwrap();
    let digests = client(&server).resolve(&spec).unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].digest, "sha256:idx");
    assert_eq!(digests[0].architecture, "amd64,arm64/v8");
}

#[test]
fn unknown_tag_is_not_found() {
    let server = MockServer::start(routes(vec![]), None);
    let err = client(&server).resolve_tag("lib/tool", "nope").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn bearer_challenge_is_answered_and_token_cached() {
    let server = MockServer::start(
        routes(vec![(
            "/v2/lib/tool/manifests/1.0",
            Canned::manifest(MEDIA_TYPE_OCI_INDEX, INDEX),
        )]),
        Some("s3cret"),
    );
    let client = client(&server);
    assert_eq!(client.resolve_tag("lib/tool", "1.0").unwrap().len(), 2);
    assert_eq!(client.resolve_tag("lib/tool", "1.0").unwrap().len(), 2);

    assert_eq!(server.count("/token"), 1);
    let token_req = server
        .requests()
        .into_iter()
        .find(|r| r.url.starts_with("/token"))
        .unwrap();
    assert!(token_req.url.contains("service=mock"));
    assert!(token_req
        .url
        .contains("scope=repository%3Alib%2Ftool%3Apull"));
    let last = server.requests().pop().unwrap();
    assert_eq!(last.authorization.as_deref(), Some("Bearer s3cret"));
}

#[test]
fn wrong_static_token_is_unauthorized() {
    let server = MockServer::start(routes(vec![]), Some("s3cret"));
    let client = DistributionClient::new(
        &server.url,
        RegistryOverride {
            token: Some("wrong".to_owned()),
            ..RegistryOverride::default()
        },
        Duration::from_secs(5),
    );
    let err = client.resolve_tag("lib/tool", "1.0").unwrap_err();
    assert!(matches!(err, dockyard_remote::RemoteError::Unauthorized(_)));
    assert_eq!(server.count("/token"), 0);
}

fn quay_manifest(digest: &str, is_list: bool, data: &str) -> String {
    serde_json::json!({
        "digest": digest,
        "is_manifest_list": is_list,
        "manifest_data": data,
    })
    .to_string()
}

#[test]
fn quay_multi_arch_tag() {
    let server = MockServer::start(
        routes(vec![
            (
                "/api/v1/repository/org/tool/tag/",
                Canned::json(
                    r#"{"tags": [{"name": "1.0", "manifest_digest": "sha256:list", "is_manifest_list": true}]}"#,
                ),
            ),
            (
                "/api/v1/repository/org/tool/manifest/sha256:list",
                Canned::json(&quay_manifest("sha256:list", true, INDEX)),
            ),
        ]),
        None,
    );
    let quay = QuayClient::new(&server.url, RegistryOverride::default(), Duration::from_secs(5));
    let digests = quay.resolve_tag("org/tool", "1.0").unwrap();
    assert_eq!(digests.len(), 2);

    let tag_req = server
        .requests()
        .into_iter()
        .find(|r| r.url.contains("/tag/"))
        .unwrap();
    assert!(tag_req.url.contains("specificTag=1.0"));
    assert!(tag_req.url.contains("onlyActiveTags=true"));
}

#[test]
fn quay_single_tag_and_digest_each_yield_one_image() {
    let server = MockServer::start(
        routes(vec![
            (
                "/api/v1/repository/org/tool/tag/",
                Canned::json(
                    r#"{"tags": [{"name": "2.0", "manifest_digest": "sha256:one", "is_manifest_list": false}]}"#,
                ),
            ),
            (
                "/api/v1/repository/org/tool/manifest/sha256:one",
                Canned::json(&quay_manifest("sha256:one", false, SINGLE)),
            ),
            ("/v2/org/tool/blobs/sha256:cfg", Canned::json(CONFIG)),
        ]),
        None,
    );
    let quay = QuayClient::new(&server.url, RegistryOverride::default(), Duration::from_secs(5));

    let by_tag = quay.resolve_tag("org/tool", "2.0").unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].digest, "sha256:one");
    assert_eq!(by_tag[0].platform(), "linux/amd64");

    let by_digest = quay
        .resolve_digest("org/tool", &Digest::new("sha256:one"))
        .unwrap();
    assert_eq!(by_digest, by_tag[0]);
}

#[test]
fn quay_missing_tag_is_not_found() {
    let server = MockServer::start(
        routes(vec![(
            "/api/v1/repository/org/tool/tag/",
            Canned::json(r#"{"tags": []}"#),
        )]),
        None,
    );
    let quay = QuayClient::new(&server.url, RegistryOverride::default(), Duration::from_secs(5));
    assert!(quay.resolve_tag("org/tool", "9.9").unwrap_err().is_not_found());
}

#[test]
fn clients_follow_host_overrides() {
    let server = MockServer::start(
        routes(vec![(
            "/api/v1/repository/org/tool/tag/",
            Canned::json(r#"{"tags": []}"#),
        )]),
        None,
    );
    let mut settings = RegistrySettings::default();
    settings.overrides.insert(
        "quay.test".to_owned(),
        RegistryOverride {
            url: Some(server.url.clone()),
            flavor: Some(RegistryFlavor::Quay),
            ..RegistryOverride::default()
        },
    );
    let clients = RegistryClients::new(settings);
    let quay = clients.client_for("quay.test");
    assert!(quay.resolve_tag("org/tool", "1").unwrap_err().is_not_found());
    assert_eq!(server.count("/api/v1/repository/org/tool/tag/"), 1);
}
