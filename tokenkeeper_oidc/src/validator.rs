//! Access token validation against the provider's key set

use std::{error, time::Duration};

use aliri::{
    error::JwtVerifyError,
    jwa,
    jwk::KeyId,
    jwt::{self, CoreClaims, CoreHeaders, HasAlgorithm},
    JwtRef,
};
use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use thiserror::Error;

use crate::{DiscoveryDocument, KeyResolutionError, KeyResolver};

/// Decides whether a cached access token is still worth using
#[async_trait]
pub trait AccessTokenValidator: Send + Sync {
    /// Whether `token` is authentic and will remain valid for more than `min_ttl`
    ///
    /// Any condition preventing a positive answer, including failures to
    /// reach the provider, yields `false`.
    async fn is_valid(
        &self,
        token: Option<&JwtRef>,
        discovery: &DiscoveryDocument,
        min_ttl: Duration,
    ) -> bool;
}

/// The reason a token was not accepted
#[derive(Debug, Error)]
pub enum TokenRejected {
    /// There is no token to validate
    #[error("no token available")]
    Missing,
    /// The token is not a well-formed JWT
    #[error("malformed token")]
    Malformed(#[source] JwtVerifyError),
    /// The provider's key set could not be obtained
    #[error("unable to resolve signing keys")]
    KeysUnavailable(#[source] KeyResolutionError),
    /// The token header does not name a signing key
    #[error("token does not specify a key id")]
    MissingKeyId,
    /// No key in the provider's key set has the ID named by the token
    #[error("no signing key with id `{0}`")]
    UnknownKeyId(KeyId),
    /// The signature or claims were rejected
    #[error("token failed verification")]
    VerificationFailed(#[source] JwtVerifyError),
    /// The token has no `exp` claim
    #[error("token does not specify an expiration")]
    MissingExpiry,
    /// The token expires too soon to be kept
    #[error("token valid for {remaining}s, more than {required}s required")]
    InsufficientLifetime {
        /// Seconds until the token expires
        remaining: u64,
        /// Seconds of validity that were required
        required: u64,
    },
}

/// Validates tokens against the key set published by the provider
///
/// The key set is fetched anew for every token checked.
#[derive(Debug)]
pub struct JwksTokenValidator<R, C = System> {
    resolver: R,
    approved_algorithms: Vec<jwa::Algorithm>,
    clock: C,
}

impl<R> JwksTokenValidator<R, System> {
    /// Constructs a new validator using the system clock
    ///
    /// Only RSA signatures (`RS256`, `RS384`, `RS512`, `PS256`, `PS384` and
    /// `PS512`) are approved by default.
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            approved_algorithms: vec![
                jwa::Algorithm::RS256,
                jwa::Algorithm::RS384,
                jwa::Algorithm::RS512,
                jwa::Algorithm::PS256,
                jwa::Algorithm::PS384,
                jwa::Algorithm::PS512,
            ],
            clock: System,
        }
    }
}

impl<R, C> JwksTokenValidator<R, C> {
    /// Replaces the set of signature algorithms a token may declare
    pub fn with_approved_algorithms<I>(self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = jwa::Algorithm>,
    {
        Self {
            approved_algorithms: algorithms.into_iter().collect(),
            ..self
        }
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> JwksTokenValidator<R, D> {
        JwksTokenValidator {
            resolver: self.resolver,
            approved_algorithms: self.approved_algorithms,
            clock,
        }
    }

    /// The key resolver used by this validator
    pub fn resolver(&self) -> &R {
        &self.resolver
    }
}

impl<R: KeyResolver, C: Clock> JwksTokenValidator<R, C> {
    /// Checks `token`, returning its remaining lifetime if it is acceptable
    ///
    /// The token is acceptable if its signature verifies with the key named
    /// by its header and it expires strictly more than `min_ttl` from now.
    pub async fn check(
        &self,
        token: Option<&JwtRef>,
        discovery: &DiscoveryDocument,
        min_ttl: Duration,
    ) -> Result<Duration, TokenRejected> {
        let token = token
            .filter(|t| !t.as_str().is_empty())
            .ok_or(TokenRejected::Missing)?;

        // The header is untrusted until the signature is verified; it only
        // selects the key.
        let decomposed: jwt::Decomposed<jwt::BasicHeaders> =
            token.decompose().map_err(TokenRejected::Malformed)?;
        let kid = decomposed
            .kid()
            .ok_or(TokenRejected::MissingKeyId)?
            .to_owned();

        tracing::trace!(%kid, alg = %decomposed.alg(), "resolving key for token");

        let keys = self
            .resolver
            .resolve_keys(&discovery.jwks_uri)
            .await
            .map_err(TokenRejected::KeysUnavailable)?;

        let key = keys
            .get(&kid)
            .ok_or_else(|| TokenRejected::UnknownKeyId(kid.clone()))?;

        let validator = jwt::CoreValidator::default()
            .ignore_expiration()
            .extend_approved_algorithms(self.approved_algorithms.iter().copied());

        let validated: jwt::Validated<jwt::BasicClaims> = decomposed
            .verify(key, &validator)
            .map_err(TokenRejected::VerificationFailed)?;

        let expiry = validated
            .claims()
            .exp()
            .ok_or(TokenRejected::MissingExpiry)?;
        let remaining = remaining_lifetime(expiry, self.clock.now());

        if remaining > min_ttl {
            Ok(remaining)
        } else {
            Err(TokenRejected::InsufficientLifetime {
                remaining: remaining.as_secs(),
                required: min_ttl.as_secs(),
            })
        }
    }
}

#[async_trait]
impl<R, C> AccessTokenValidator for JwksTokenValidator<R, C>
where
    R: KeyResolver,
    C: Clock + Send + Sync,
{
    async fn is_valid(
        &self,
        token: Option<&JwtRef>,
        discovery: &DiscoveryDocument,
        min_ttl: Duration,
    ) -> bool {
        match self.check(token, discovery, min_ttl).await {
            Ok(remaining) => {
                tracing::debug!(remaining = remaining.as_secs(), "token is still valid");
                true
            }
            Err(TokenRejected::Missing) => {
                tracing::debug!("no previous token");
                false
            }
            Err(TokenRejected::InsufficientLifetime { remaining: 0, .. }) => {
                tracing::warn!("token has expired");
                false
            }
            Err(TokenRejected::InsufficientLifetime {
                remaining,
                required,
            }) => {
                tracing::debug!(remaining, required, "token expires too soon");
                false
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to validate token"
                );
                false
            }
        }
    }
}

/// Time left until `expiry`, saturating at zero for tokens already expired
fn remaining_lifetime(expiry: UnixTime, now: UnixTime) -> Duration {
    Duration::from_secs(expiry.0.saturating_sub(now.0))
}
