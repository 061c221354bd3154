//! Keeps a set of named OAuth2/OIDC access tokens valid
//!
//! Tools which talk to services on behalf of several communities each need
//! an access token, and each of those tokens is obtained from its own
//! configured secret. This library keeps a store of such tokens fresh
//! without asking the identity provider for a new token when the cached one
//! is still good.
//!
//! A refresh run works on a set of [`Secrets`] and the [`TokenStore`] left
//! by the previous run:
//!
//! 1. For each secret, the cached token is checked against the provider's
//!    current signing keys and must stay valid for longer than the
//!    configured minimum lifetime.
//! 2. Tokens that fail the check are replaced by exchanging the secret at
//!    the provider's token endpoint.
//! 3. The new store holds exactly the secrets that ended the run with a
//!    usable token. A secret whose exchange fails is dropped for this run,
//!    without affecting any other secret.
//!
//! ```no_run
//! use tokenkeeper::{
//!     storage::{file::FileTokenStorage, TokenStorage},
//!     HttpTokenExchanger, RefreshSettings, Secrets, TokenCacheManager,
//! };
//! use tokenkeeper_oidc::{fetch_discovery, JwksTokenValidator, RemoteKeyResolver};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest::Client::builder()
//!     .timeout(std::time::Duration::from_secs(10))
//!     .build()?;
//!
//! let discovery_url: url::Url = tokenkeeper_oidc::CHECKIN_DISCOVERY_URL.parse()?;
//! let discovery = fetch_discovery(&client, &discovery_url).await?;
//!
//! let secrets = Secrets::load("secrets.yaml".as_ref()).await?;
//! let storage = FileTokenStorage::new("tokens.yaml".into());
//! let existing = storage.load().await?;
//!
//! let manager = TokenCacheManager::new(
//!     JwksTokenValidator::new(RemoteKeyResolver::new(client.clone())),
//!     HttpTokenExchanger::new(client),
//!     RefreshSettings::default(),
//! );
//!
//! let report = manager.refresh_all(&discovery, &existing, &secrets).await;
//! storage.persist(&report.store, &report.managed_names()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! As with `tokenkeeper_oidc`, enable either `rustls-tls` or `default-tls`
//! unless the application already enables TLS support in `reqwest`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod exchange;
mod manager;
mod secrets;
mod settings;
pub mod storage;
mod store;

pub use braids::*;
pub use exchange::{HttpTokenExchanger, TokenExchangeError, TokenExchanger};
pub use manager::{Outcome, RefreshReport, TokenCacheManager};
pub use secrets::{Secret, SecretEntry, Secrets, SecretsError};
pub use settings::{RefreshSettings, DEFAULT_MIN_TTL, DEFAULT_SCOPES};
pub use store::{CachedToken, TokenStore};
