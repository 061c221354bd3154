//! Validation of cached OAuth2/OIDC access tokens against a provider's published keys
//!
//! An access token obtained from an OpenID provider is only worth keeping if
//! it can still be verified with one of the provider's current signing keys
//! and will remain valid long enough to be useful. This crate provides the
//! pieces needed to answer that question:
//!
//! * [`fetch_discovery`] reads the provider's discovery document to find
//!   its JWKS and token endpoints.
//! * A [`KeyResolver`] fetches the JSON Web Key Set and indexes it by key ID
//!   into a [`KeySet`]. Keys are fetched fresh on every validation, as
//!   providers rotate them.
//! * [`JwksTokenValidator`] decomposes the token, selects the key named in
//!   the (still untrusted) header, verifies the signature, and compares the
//!   `exp` claim against the clock.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use aliri::JwtRef;
//! use tokenkeeper_oidc::{
//!     fetch_discovery, AccessTokenValidator, JwksTokenValidator, RemoteKeyResolver,
//! };
//!
//! # async fn check(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest::Client::new();
//! let discovery_url: url::Url = tokenkeeper_oidc::CHECKIN_DISCOVERY_URL.parse()?;
//! let discovery = fetch_discovery(&client, &discovery_url).await?;
//!
//! let validator = JwksTokenValidator::new(RemoteKeyResolver::new(client));
//! let usable = validator
//!     .is_valid(
//!         Some(JwtRef::from_str(token)),
//!         &discovery,
//!         Duration::from_secs(20 * 60),
//!     )
//!     .await;
//! # let _ = usable;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! This crate does not enable TLS support in `reqwest` by itself. Enable
//! either the `rustls-tls` or `default-tls` feature if nothing else in the
//! application already does, otherwise HTTPS endpoints cannot be reached.

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

mod discovery;
mod keys;
mod validator;

pub use discovery::{fetch_discovery, DiscoveryDocument, DiscoveryError, CHECKIN_DISCOVERY_URL};
pub use keys::{KeyResolutionError, KeyResolver, KeySet, RemoteKeyResolver};
pub use validator::{AccessTokenValidator, JwksTokenValidator, TokenRejected};
