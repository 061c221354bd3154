use std::collections::BTreeSet;

use aliri::{
    jwa,
    jwk::KeyId,
    jwt::{self, BasicClaims},
    Jwk,
};
use aliri_clock::{TestClock, UnixTime};
use color_eyre::Result;
use mockito::Matcher;
use tokenkeeper::{
    storage::{directory::DirectoryTokenStorage, file::FileTokenStorage, TokenStorage},
    AccessToken, CachedToken, HttpTokenExchanger, Outcome, RefreshSettings, SecretName,
    SecretNameRef, Secrets, TokenCacheManager, TokenStore,
};
use tokenkeeper_oidc::{DiscoveryDocument, JwksTokenValidator, RemoteKeyResolver};
use url::Url;

const NOW: u64 = 1_700_000_000;

const JWKS: &str = r#"{"keys": [{ "kty": "oct", "kid": "123", "alg": "HS256", "k": "dGVzdA" }]}"#;

const SECRETS: &str = r#"
fresh:
  client_id: fresh
  client_secret: s1
stale:
  client_id: stale
  client_secret: s2
broken:
  client_id: broken
  client_secret: s3
site-config: not-a-dict
"#;

fn mint(expires_in: u64) -> Result<AccessToken> {
    let key: Jwk = serde_json::from_str(
        r#"{ "kty": "oct", "kid": "123", "alg": "HS256", "k": "dGVzdA" }"#,
    )?;
    let headers = jwt::BasicHeaders::with_key_id(jwa::Algorithm::HS256, KeyId::from_static("123"));
    let token = BasicClaims::new()
        .with_expiration(UnixTime(NOW + expires_in))
        .sign(&key, &headers)?;

    Ok(AccessToken::new(token.as_str().to_owned()))
}

#[tokio::test]
async fn refresh_run_keeps_valid_tokens_and_replaces_the_rest() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let base = Url::parse(&server.url())?;

    let jwks = server
        .mock("GET", "/certs")
        .with_header("content-type", "application/json")
        .with_body(JWKS)
        .expect(4)
        .create_async()
        .await;

    let new_token = mint(3600)?;
    let stale_exchange = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            Matcher::UrlEncoded("client_id".into(), "stale".into()),
            Matcher::UrlEncoded("client_secret".into(), "s2".into()),
            Matcher::UrlEncoded("scope".into(), "openid profile".into()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({ "access_token": new_token.as_str() }).to_string())
        .expect(1)
        .create_async()
        .await;

    let broken_exchange = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("client_id".into(), "broken".into()))
        .with_status(500)
        .with_body("internal error")
        .expect(2)
        .create_async()
        .await;

    let discovery = DiscoveryDocument {
        issuer: None,
        jwks_uri: base.join("/certs")?,
        token_endpoint: base.join("/token")?,
    };

    let dir = tempfile::tempdir()?;
    let storage = FileTokenStorage::new(dir.path().join("tokens.yaml"));

    let fresh_token = mint(3600)?;
    let previous: TokenStore = [
        (SecretName::from_static("fresh"), CachedToken::new(fresh_token.clone())),
        (SecretName::from_static("stale"), CachedToken::new(mint(600)?)),
        (SecretName::from_static("removed"), CachedToken::new(mint(3600)?)),
    ]
    .into_iter()
    .collect();
    storage.persist(&previous, &BTreeSet::new()).await?;

    let client = reqwest::Client::new();
    let manager = TokenCacheManager::new(
        JwksTokenValidator::new(RemoteKeyResolver::new(client.clone()))
            .with_approved_algorithms([jwa::Algorithm::HS256])
            .with_clock(TestClock::new(UnixTime(NOW))),
        HttpTokenExchanger::new(client),
        RefreshSettings::default().with_scopes("openid profile"),
    );
    let secrets = Secrets::from_yaml_str(SECRETS)?;

    let report = manager
        .refresh_all(&discovery, &storage.load().await?, &secrets)
        .await;
    storage.persist(&report.store, &report.managed_names()).await?;

    let outcome = |name: &str| report.outcomes.get(SecretNameRef::from_str(name)).cloned();
    assert_eq!(outcome("fresh"), Some(Outcome::Reused));
    assert_eq!(outcome("stale"), Some(Outcome::Refreshed));
    assert!(matches!(outcome("broken"), Some(Outcome::Failed(_))));
    assert_eq!(outcome("site-config"), Some(Outcome::Skipped));
    assert_eq!(outcome("removed"), None);

    let stored = storage.load().await?;
    let names: Vec<&str> = stored.names().map(|n| n.as_str()).collect();
    assert_eq!(names, ["fresh", "stale"]);
    assert_eq!(
        stored
            .get(SecretNameRef::from_str("fresh"))
            .map(|t| t.access_token().as_str()),
        Some(fresh_token.as_str())
    );
    assert_eq!(
        stored
            .get(SecretNameRef::from_str("stale"))
            .map(|t| t.access_token().as_str()),
        Some(new_token.as_str())
    );

    let second = manager.refresh_all(&discovery, &stored, &secrets).await;

    assert_eq!(second.store, stored);
    assert_eq!(second.count(|o| *o == Outcome::Reused), 2);

    jwks.assert_async().await;
    stale_exchange.assert_async().await;
    broken_exchange.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_key_set_forces_a_refresh() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let base = Url::parse(&server.url())?;

    server
        .mock("GET", "/certs")
        .with_status(503)
        .create_async()
        .await;
    let exchange = server
        .mock("POST", "/token")
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "replacement"}"#)
        .expect(1)
        .create_async()
        .await;

    let discovery = DiscoveryDocument {
        issuer: None,
        jwks_uri: base.join("/certs")?,
        token_endpoint: base.join("/token")?,
    };

    let client = reqwest::Client::new();
    let manager = TokenCacheManager::new(
        JwksTokenValidator::new(RemoteKeyResolver::new(client.clone()))
            .with_approved_algorithms([jwa::Algorithm::HS256])
            .with_clock(TestClock::new(UnixTime(NOW))),
        HttpTokenExchanger::new(client),
        RefreshSettings::default(),
    );
    let secrets = Secrets::from_yaml_str("only: {client_id: id, client_secret: s}")?;
    let existing: TokenStore = [(SecretName::from_static("only"), CachedToken::new(mint(3600)?))]
        .into_iter()
        .collect();

    let report = manager.refresh_all(&discovery, &existing, &secrets).await;

    exchange.assert_async().await;
    assert_eq!(
        report
            .store
            .get(SecretNameRef::from_str("only"))
            .map(|t| t.access_token().as_str()),
        Some("replacement")
    );
    Ok(())
}

#[tokio::test]
async fn token_directory_keeps_files_it_does_not_manage() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let base = Url::parse(&server.url())?;

    server
        .mock("GET", "/certs")
        .with_header("content-type", "application/json")
        .with_body(JWKS)
        .create_async()
        .await;
    let new_token = mint(3600)?;
    server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("client_id".into(), "stale".into()))
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({ "access_token": new_token.as_str() }).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("client_id".into(), "broken".into()))
        .with_status(500)
        .create_async()
        .await;

    let discovery = DiscoveryDocument {
        issuer: None,
        jwks_uri: base.join("/certs")?,
        token_endpoint: base.join("/token")?,
    };

    let dir = tempfile::tempdir()?;
    tokio::fs::write(dir.path().join("README"), "tokens live here").await?;
    tokio::fs::write(dir.path().join("broken"), mint(60)?.as_str()).await?;
    tokio::fs::write(dir.path().join("fresh"), mint(3600)?.as_str()).await?;
    tokio::fs::write(dir.path().join("core.bin"), b"\xff\xfe\x00").await?;
    let storage = DirectoryTokenStorage::new(dir.path().to_owned());

    let client = reqwest::Client::new();
    let manager = TokenCacheManager::new(
        JwksTokenValidator::new(RemoteKeyResolver::new(client.clone()))
            .with_approved_algorithms([jwa::Algorithm::HS256])
            .with_clock(TestClock::new(UnixTime(NOW))),
        HttpTokenExchanger::new(client),
        RefreshSettings::default(),
    );
    let secrets = Secrets::from_yaml_str(SECRETS)?;

    let report = manager
        .refresh_all(&discovery, &storage.load().await?, &secrets)
        .await;
    storage.persist(&report.store, &report.managed_names()).await?;

    assert_eq!(
        tokio::fs::read_to_string(dir.path().join("README")).await?,
        "tokens live here"
    );
    assert!(dir.path().join("core.bin").exists());
    assert!(!dir.path().join("broken").exists());
    assert_eq!(
        tokio::fs::read_to_string(dir.path().join("stale")).await?,
        new_token.as_str()
    );
    assert_eq!(report.outcomes.get(SecretNameRef::from_str("fresh")), Some(&Outcome::Reused));
    Ok(())
}
