//! Resolution of a provider's signing keys

use std::collections::{btree_map::Entry, BTreeMap};

use aliri::{
    jwk::{KeyId, KeyIdRef},
    Jwk, Jwks,
};
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Signature verification keys indexed by key ID
///
/// Only keys which carry a `kid` are indexed, since a token's header must
/// name the key it was signed with. Keys of a type or algorithm which cannot
/// be used for verification are dropped while parsing the key set.
#[derive(Clone, Debug, Default)]
pub struct KeySet {
    keys: BTreeMap<KeyId, Jwk>,
}

impl KeySet {
    /// Indexes the keys of a JSON Web Key Set
    ///
    /// If more than one key shares a `kid`, the first one listed is kept.
    pub fn from_jwks(jwks: &Jwks) -> Self {
        let mut keys = BTreeMap::new();

        for jwk in jwks.keys() {
            let Some(kid) = jwk.key_id() else {
                tracing::trace!("ignoring key without key id");
                continue;
            };

            match keys.entry(kid.to_owned()) {
                Entry::Vacant(slot) => {
                    slot.insert(jwk.clone());
                }
                Entry::Occupied(_) => {
                    tracing::debug!(%kid, "ignoring duplicate key id in key set");
                }
            }
        }

        Self { keys }
    }

    /// Gets the key with the given key ID
    pub fn get(&self, kid: &KeyIdRef) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    /// The number of indexed keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key was indexed
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key IDs present in this set
    pub fn key_ids(&self) -> impl Iterator<Item = &KeyIdRef> {
        self.keys.keys().map(|kid| &**kid)
    }
}

/// Unable to obtain the provider's key set
#[derive(Debug, Error)]
pub enum KeyResolutionError {
    /// Unable to send the request to the JWKS endpoint
    #[error("error sending request to JWKS endpoint")]
    RequestSend(#[source] reqwest::Error),
    /// The JWKS endpoint returned an error status
    #[error("JWKS endpoint returned an error")]
    ErrorStatus(#[source] reqwest::Error),
    /// Unable to read the response
    #[error("error reading JWKS response body")]
    BodyRead(#[source] reqwest::Error),
    /// The response is not a JSON Web Key Set
    #[error("malformed JSON Web Key Set")]
    Malformed(#[from] serde_json::Error),
}

/// A source of signature verification keys
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Fetches the key set published at `jwks_uri`
    async fn resolve_keys(&self, jwks_uri: &Url) -> Result<KeySet, KeyResolutionError>;
}

/// Resolves keys by fetching the provider's published key set over HTTP
///
/// No retries are attempted, and nothing is cached between calls.
#[derive(Clone, Debug)]
pub struct RemoteKeyResolver {
    client: reqwest::Client,
}

impl RemoteKeyResolver {
    /// Constructs a new resolver
    ///
    /// Any request timeout should be configured on `client`.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyResolver for RemoteKeyResolver {
    #[tracing::instrument(err, skip(self, jwks_uri), fields(jwks_uri = %jwks_uri))]
    async fn resolve_keys(&self, jwks_uri: &Url) -> Result<KeySet, KeyResolutionError> {
        let response = self
            .client
            .get(jwks_uri.clone())
            .send()
            .await
            .map_err(KeyResolutionError::RequestSend)?;

        tracing::trace!(
            response.status = response.status().as_u16(),
            "received JWKS response"
        );

        let response = response
            .error_for_status()
            .map_err(KeyResolutionError::ErrorStatus)?;
        let body = response
            .bytes()
            .await
            .map_err(KeyResolutionError::BodyRead)?;
        let jwks: Jwks = serde_json::from_slice(&body)?;

        let keys = KeySet::from_jwks(&jwks);
        tracing::debug!(keys = keys.len(), "resolved signing keys");

        Ok(keys)
    }
}
