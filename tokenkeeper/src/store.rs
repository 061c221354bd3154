//! Tokens kept between runs, by secret name

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, SecretName, SecretNameRef};

/// A token cached for a secret
///
/// Only the bearer token itself is kept; its expiry is re-derived from the
/// token whenever it is checked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    /// The access token
    pub access_token: AccessToken,
}

impl CachedToken {
    /// Constructs a new cached token
    pub fn new(access_token: AccessToken) -> Self {
        Self { access_token }
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }
}

impl From<AccessToken> for CachedToken {
    fn from(access_token: AccessToken) -> Self {
        Self::new(access_token)
    }
}

/// Cached tokens, by secret name
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenStore {
    tokens: BTreeMap<SecretName, CachedToken>,
}

impl TokenStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the token cached under `name`
    pub fn get(&self, name: &SecretNameRef) -> Option<&CachedToken> {
        self.tokens.get(name)
    }

    /// Caches a token under `name`, returning any token it replaces
    pub fn insert(&mut self, name: SecretName, token: CachedToken) -> Option<CachedToken> {
        self.tokens.insert(name, token)
    }

    /// The number of cached tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are cached
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterates over the cached tokens in name order
    pub fn iter(&self) -> impl Iterator<Item = (&SecretNameRef, &CachedToken)> {
        self.tokens.iter().map(|(name, token)| (&**name, token))
    }

    /// Iterates over the names with a cached token
    pub fn names(&self) -> impl Iterator<Item = &SecretNameRef> {
        self.tokens.keys().map(|name| &**name)
    }
}

impl FromIterator<(SecretName, CachedToken)> for TokenStore {
    fn from_iter<T: IntoIterator<Item = (SecretName, CachedToken)>>(iter: T) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TokenStore {
    type Item = (SecretName, CachedToken);
    type IntoIter = std::collections::btree_map::IntoIter<SecretName, CachedToken>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.into_iter()
    }
}
