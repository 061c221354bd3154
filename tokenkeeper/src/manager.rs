//! The refresh run over every configured secret

use std::{
    collections::{BTreeMap, BTreeSet},
    error,
};

use futures::{stream, StreamExt};
use tokenkeeper_oidc::{AccessTokenValidator, DiscoveryDocument};

use crate::{
    exchange::TokenExchanger, CachedToken, RefreshSettings, Secret, SecretEntry, SecretName,
    SecretNameRef, Secrets, TokenStore,
};

/// What became of a secret during a refresh run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The cached token was still valid and was kept
    Reused,
    /// A new token was obtained from the authority
    Refreshed,
    /// The static access token configured for the secret was adopted
    Configured,
    /// No usable token could be obtained; the secret has no token this run
    Failed(String),
    /// The entry is not a recognized credential
    Skipped,
}

impl Outcome {
    /// Whether the secret ended the run with a usable token
    pub fn has_token(&self) -> bool {
        matches!(self, Self::Reused | Self::Refreshed | Self::Configured)
    }
}

/// The result of a refresh run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Tokens for every secret that ended the run with a usable token
    pub store: TokenStore,
    /// The outcome for each configured entry
    pub outcomes: BTreeMap<SecretName, Outcome>,
}

impl RefreshReport {
    /// The secrets for which no token could be obtained, with the reason
    pub fn failures(&self) -> impl Iterator<Item = (&SecretNameRef, &str)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            Outcome::Failed(reason) => Some((&**name, reason.as_str())),
            _ => None,
        })
    }

    /// The credentials this run was responsible for, whether or not they ended with a token
    ///
    /// Entries skipped as unrecognized are not included.
    pub fn managed_names(&self) -> BTreeSet<SecretName> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| **outcome != Outcome::Skipped)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Counts the outcomes matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| predicate(*o)).count()
    }
}

/// Keeps the tokens of a set of secrets valid
///
/// Cached tokens are kept while they remain valid for the configured minimum
/// lifetime; others are replaced by exchanging the secret for a new token.
#[derive(Debug)]
pub struct TokenCacheManager<V, E> {
    validator: V,
    exchanger: E,
    settings: RefreshSettings,
}

impl<V, E> TokenCacheManager<V, E>
where
    V: AccessTokenValidator,
    E: TokenExchanger,
{
    /// Constructs a new manager
    pub fn new(validator: V, exchanger: E, settings: RefreshSettings) -> Self {
        Self {
            validator,
            exchanger,
            settings,
        }
    }

    /// The settings used for refresh runs
    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Produces a new token store holding a usable token for as many secrets as possible
    ///
    /// Each recognized secret is attempted exactly once. A failure for one
    /// secret drops that secret's entry and never affects the others. The
    /// resulting store and outcomes do not depend on the order in which
    /// secrets complete.
    pub async fn refresh_all(
        &self,
        discovery: &DiscoveryDocument,
        existing: &TokenStore,
        secrets: &Secrets,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();

        for (name, entry) in secrets.iter() {
            if let SecretEntry::Unrecognized = entry {
                tracing::debug!(secret = %name, "not a credential, skipping");
                report.outcomes.insert(name.to_owned(), Outcome::Skipped);
            }
        }

        let results: Vec<_> = stream::iter(secrets.credentials())
            .map(|(name, secret)| async move {
                let (outcome, token) = self
                    .refresh_one(discovery, name, secret, existing.get(name))
                    .await;
                (name.to_owned(), outcome, token)
            })
            .buffer_unordered(self.settings.concurrency.get())
            .collect()
            .await;

        for (name, outcome, token) in results {
            if let Some(token) = token {
                report.store.insert(name.clone(), token);
            }
            report.outcomes.insert(name, outcome);
        }

        tracing::info!(
            tokens = report.store.len(),
            reused = report.count(|o| *o == Outcome::Reused),
            refreshed = report.count(|o| *o == Outcome::Refreshed),
            failed = report.count(|o| matches!(o, Outcome::Failed(_))),
            skipped = report.count(|o| *o == Outcome::Skipped),
            "refresh run complete"
        );

        report
    }

    #[tracing::instrument(
        skip_all,
        fields(secret = %name, grant_type = secret.grant_type().unwrap_or("none")),
    )]
    async fn refresh_one(
        &self,
        discovery: &DiscoveryDocument,
        name: &SecretNameRef,
        secret: &Secret,
        cached: Option<&CachedToken>,
    ) -> (Outcome, Option<CachedToken>) {
        let min_ttl = self.settings.min_ttl;

        let cached_jwt = cached.map(|t| t.access_token().as_jwt());
        if self.validator.is_valid(cached_jwt, discovery, min_ttl).await {
            tracing::info!("token is still valid, not refreshing");
            return (Outcome::Reused, cached.cloned());
        }

        if let Secret::AccessToken { access_token } = secret {
            let already_checked =
                cached.is_some_and(|t| t.access_token().as_str() == access_token.as_str());

            if !already_checked
                && self
                    .validator
                    .is_valid(Some(access_token.as_jwt()), discovery, min_ttl)
                    .await
            {
                tracing::info!("using configured access token");
                return (
                    Outcome::Configured,
                    Some(CachedToken::new(access_token.clone())),
                );
            }

            tracing::error!("configured access token is not usable and cannot be renewed");
            return (
                Outcome::Failed("configured access token is not usable".to_owned()),
                None,
            );
        }

        tracing::info!("token needs refreshing");
        match self
            .exchanger
            .exchange(&discovery.token_endpoint, &self.settings.scopes, secret)
            .await
        {
            Ok(access_token) => {
                tracing::info!("obtained new token");
                (Outcome::Refreshed, Some(CachedToken::new(access_token)))
            }
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn error::Error),
                    "unable to obtain new token"
                );
                (Outcome::Failed(error_chain(&error)), None)
            }
        }
    }
}

fn error_chain(error: &dyn error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
