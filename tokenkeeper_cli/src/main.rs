use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode, time::Duration};

use clap::{ArgGroup, Parser};
use color_eyre::eyre::{eyre, WrapErr};
use tokenkeeper::{
    storage::{directory::DirectoryTokenStorage, file::FileTokenStorage, TokenStorage},
    HttpTokenExchanger, Outcome, RefreshSettings, Secrets, TokenCacheManager, DEFAULT_SCOPES,
};
use tokenkeeper_oidc::{
    fetch_discovery, JwksTokenValidator, RemoteKeyResolver, CHECKIN_DISCOVERY_URL,
};
use url::Url;

/// Refreshes the access tokens of every secret whose cached token is about to expire
#[derive(Debug, Parser)]
#[command(version, about)]
#[command(group(ArgGroup::new("store").required(true).args(["token_file", "token_dir"])))]
struct Opts {
    /// YAML file mapping names to secrets
    #[arg(long, env = "CHECKIN_SECRETS_FILE")]
    secrets_file: PathBuf,

    /// Discovery document of the OpenID provider
    #[arg(long, env = "CHECKIN_OIDC_URL", default_value = CHECKIN_DISCOVERY_URL)]
    discovery_url: Url,

    /// Space-delimited scopes to request for new tokens
    #[arg(long, env = "CHECKIN_SCOPES", default_value = DEFAULT_SCOPES)]
    scopes: String,

    /// Keep all tokens in this YAML file
    #[arg(long, env = "ACCESS_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Keep each token in its own file in this directory
    #[arg(long, env = "ACCESS_TOKEN_DIR")]
    token_dir: Option<PathBuf>,

    /// Minimum remaining lifetime, in seconds, for a cached token to be kept
    #[arg(long, env = "ACCESS_TOKEN_TTL", default_value_t = 1200)]
    min_ttl: u64,

    /// Timeout, in seconds, for each request to the provider
    #[arg(long, env = "HTTP_TIMEOUT", default_value_t = 10)]
    http_timeout: u64,

    /// Number of secrets to process at the same time
    #[arg(long, env = "REFRESH_CONCURRENCY", default_value_t = NonZeroUsize::MIN)]
    concurrency: NonZeroUsize,

    /// Exit with an error if a token could not be obtained for any secret
    #[arg(long)]
    strict: bool,
}

impl Opts {
    fn storage(&self) -> color_eyre::Result<Box<dyn TokenStorage>> {
        match (&self.token_file, &self.token_dir) {
            (Some(file), _) => Ok(Box::new(FileTokenStorage::new(file.clone()))),
            (None, Some(dir)) => Ok(Box::new(DirectoryTokenStorage::new(dir.clone()))),
            (None, None) => Err(eyre!("one of --token-file or --token-dir is required")),
        }
    }

    fn settings(&self) -> RefreshSettings {
        RefreshSettings::default()
            .with_scopes(self.scopes.clone())
            .with_min_ttl(Duration::from_secs(self.min_ttl))
            .with_concurrency(self.concurrency)
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    dotenvy::dotenv().ok();

    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let opts = Opts::parse();

    run(opts).await
}

async fn run(opts: Opts) -> color_eyre::Result<ExitCode> {
    let secrets = Secrets::load(&opts.secrets_file)
        .await
        .wrap_err_with(|| format!("loading secrets from {}", opts.secrets_file.display()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(opts.http_timeout))
        .build()
        .wrap_err("building HTTP client")?;

    let discovery = fetch_discovery(&client, &opts.discovery_url)
        .await
        .wrap_err_with(|| format!("fetching discovery document from {}", opts.discovery_url))?;

    let storage = opts.storage()?;
    let existing = storage.load().await.wrap_err("loading token store")?;

    let manager = TokenCacheManager::new(
        JwksTokenValidator::new(RemoteKeyResolver::new(client.clone())),
        HttpTokenExchanger::new(client),
        opts.settings(),
    );

    let report = manager.refresh_all(&discovery, &existing, &secrets).await;

    storage
        .persist(&report.store, &report.managed_names())
        .await
        .wrap_err("persisting token store")?;

    let failed = report.count(|o| matches!(o, Outcome::Failed(_)));
    for (name, reason) in report.failures() {
        tracing::warn!(secret = %name, reason, "no token for secret this run");
    }

    tracing::info!(
        tokens = report.store.len(),
        failed,
        "token store updated"
    );

    if opts.strict && failed > 0 {
        tracing::error!(failed, "not every secret has a token");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Opts::command().debug_assert();
    }

    #[test]
    fn defaults_follow_provider_conventions() -> color_eyre::Result<()> {
        let opts = Opts::try_parse_from([
            "tokenkeeper",
            "--secrets-file",
            "secrets.yaml",
            "--token-dir",
            "/var/run/tokens",
        ])?;

        let settings = opts.settings();
        assert_eq!(settings.min_ttl, Duration::from_secs(20 * 60));
        assert_eq!(settings.concurrency.get(), 1);
        assert!(!opts.strict);
        Ok(())
    }

    #[test]
    fn token_file_and_dir_are_exclusive() {
        let err = Opts::try_parse_from([
            "tokenkeeper",
            "--secrets-file",
            "secrets.yaml",
            "--token-file",
            "tokens.yaml",
            "--token-dir",
            "/var/run/tokens",
        ])
        .unwrap_err();

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn settings_are_taken_from_arguments() -> color_eyre::Result<()> {
        let opts = Opts::try_parse_from([
            "tokenkeeper",
            "--secrets-file",
            "secrets.yaml",
            "--token-file",
            "tokens.yaml",
            "--scopes",
            "openid",
            "--min-ttl",
            "60",
            "--concurrency",
            "4",
            "--strict",
        ])?;

        assert_eq!(
            opts.settings(),
            RefreshSettings::default()
                .with_scopes("openid")
                .with_min_ttl(Duration::from_secs(60))
                .with_concurrency(NonZeroUsize::new(4).unwrap())
        );
        assert!(opts.strict);
        Ok(())
    }
}
