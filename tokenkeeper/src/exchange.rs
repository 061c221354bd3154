//! Obtaining new access tokens from the token endpoint

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::{AccessToken, ClientIdRef, Secret};

mod dto;

/// An error while attempting to obtain a new token from the authority
#[derive(Debug, Error)]
pub enum TokenExchangeError {
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// The secret is a static access token and cannot be exchanged
    #[error("secret holds a static access token and cannot be exchanged")]
    NotExchangeable,
}

/// Obtains new access tokens for secrets
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchanges `secret` for a new access token at `token_endpoint`
    ///
    /// `scopes` is a space-delimited list of scopes to request.
    async fn exchange(
        &self,
        token_endpoint: &Url,
        scopes: &str,
        secret: &Secret,
    ) -> Result<AccessToken, TokenExchangeError>;
}

/// Exchanges secrets for tokens by posting form-encoded grants over HTTP
///
/// Requests are made once; there are no retries.
#[derive(Clone, Debug)]
pub struct HttpTokenExchanger {
    client: reqwest::Client,
}

impl HttpTokenExchanger {
    /// Constructs a new exchanger
    ///
    /// Any request timeout should be configured on `client`.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(
        &self,
        token_endpoint: &Url,
        scopes: &str,
        secret: &Secret,
    ) -> Result<AccessToken, TokenExchangeError> {
        match secret {
            Secret::ClientCredentials {
                client_id,
                client_secret,
            } => {
                let payload = dto::ClientCredentialsRequest {
                    client_id,
                    client_secret,
                    scope: scopes,
                };
                request_token(&self.client, token_endpoint, client_id, &payload).await
            }
            Secret::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            } => {
                let payload = dto::RefreshTokenRequest {
                    client_id,
                    client_secret: client_secret.as_deref(),
                    refresh_token,
                    scope: scopes,
                };
                request_token(&self.client, token_endpoint, client_id, &payload).await
            }
            Secret::AccessToken { .. } => Err(TokenExchangeError::NotExchangeable),
        }
    }
}

trait GrantRequest: serde::Serialize + Sync {
    fn grant_type() -> &'static str;
}

impl GrantRequest for dto::ClientCredentialsRequest<'_> {
    fn grant_type() -> &'static str {
        "client_credentials"
    }
}

impl GrantRequest for dto::RefreshTokenRequest<'_> {
    fn grant_type() -> &'static str {
        "refresh_token"
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, client_id, payload),
    fields(
        token_url = %token_url,
        credentials.grant_type = G::grant_type(),
        credentials.client_id = %client_id,
    ),
)]
async fn request_token<G: GrantRequest>(
    client: &reqwest::Client,
    token_url: &Url,
    client_id: &ClientIdRef,
    payload: &G,
) -> Result<AccessToken, TokenExchangeError> {
    tracing::trace!("requesting token from authority");

    let resp = client
        .post(token_url.clone())
        .form(payload)
        .send()
        .await
        .map_err(TokenExchangeError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp.text().await.map_err(TokenExchangeError::BodyRead)?;
        return Err(TokenExchangeError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp.bytes().await.map_err(TokenExchangeError::BodyRead)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    if resp.access_token.as_str().is_empty() {
        return Err(TokenExchangeError::TokenBody(serde::de::Error::custom(
            "empty `access_token`",
        )));
    }

    tracing::info!(
        token_type = resp.token_type.as_deref().unwrap_or("unspecified"),
        lifetime = resp.expires_in,
        has_id_token = resp.id_token.is_some(),
        has_refresh_token = resp.refresh_token.is_some(),
        "received new tokens"
    );

    if resp.refresh_token.is_some() && G::grant_type() == "refresh_token" {
        tracing::warn!("authority rotated the refresh token; the configured one may stop working");
    }

    Ok(resp.access_token)
}
