//! Settings shared by every refresh run

use std::{num::NonZeroUsize, time::Duration};

/// Scopes requested when none are configured
pub const DEFAULT_SCOPES: &str = "openid profile eduperson_entitlement email";

/// Minimum remaining lifetime required of a cached token when none is configured
pub const DEFAULT_MIN_TTL: Duration = Duration::from_secs(20 * 60);

/// Settings for a refresh run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Space-delimited scopes requested for new tokens
    pub scopes: String,

    /// Minimum remaining lifetime for a cached token to be kept
    ///
    /// A token expiring in exactly this long is replaced.
    pub min_ttl: Duration,

    /// Maximum number of secrets processed at the same time
    pub concurrency: NonZeroUsize,
}

impl RefreshSettings {
    /// Sets the requested scopes
    pub fn with_scopes(self, scopes: impl Into<String>) -> Self {
        Self {
            scopes: scopes.into(),
            ..self
        }
    }

    /// Sets the minimum remaining lifetime
    pub fn with_min_ttl(self, min_ttl: Duration) -> Self {
        Self { min_ttl, ..self }
    }

    /// Sets how many secrets may be processed at once
    pub fn with_concurrency(self, concurrency: NonZeroUsize) -> Self {
        Self {
            concurrency,
            ..self
        }
    }
}

impl Default for RefreshSettings {
    /// Requests [`DEFAULT_SCOPES`], requires [`DEFAULT_MIN_TTL`], and processes
    /// one secret at a time
    fn default() -> Self {
        Self {
            scopes: DEFAULT_SCOPES.to_owned(),
            min_ttl: DEFAULT_MIN_TTL,
            concurrency: NonZeroUsize::MIN,
        }
    }
}
