//! OpenID Connect discovery of the provider endpoints

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Discovery document of the EGI Check-in identity provider
pub const CHECKIN_DISCOVERY_URL: &str =
    "https://aai.egi.eu/auth/realms/egi/.well-known/openid-configuration";

/// The parts of an OpenID provider's metadata needed to validate and obtain tokens
///
/// Fetched once per run and treated as immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscoveryDocument {
    /// The issuer identifier of the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Location of the provider's JSON Web Key Set
    pub jwks_uri: Url,

    /// Location of the provider's OAuth2 token endpoint
    pub token_endpoint: Url,
}

/// An error while fetching the discovery document
///
/// Without the document neither keys nor new tokens can be obtained, so this
/// error is fatal for a refresh run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Unable to send the request to the discovery endpoint
    #[error("error sending request to discovery endpoint")]
    RequestSend(#[source] reqwest::Error),
    /// The discovery endpoint responded with an error status
    #[error("discovery endpoint returned an error")]
    ErrorStatus(#[source] reqwest::Error),
    /// The discovery document could not be read or deserialized
    #[error("malformed discovery document")]
    MalformedDocument(#[source] reqwest::Error),
}

/// Fetches the provider's discovery document
#[tracing::instrument(err, skip(client, discovery_url), fields(discovery_url = %discovery_url))]
pub async fn fetch_discovery(
    client: &reqwest::Client,
    discovery_url: &Url,
) -> Result<DiscoveryDocument, DiscoveryError> {
    let response = client
        .get(discovery_url.clone())
        .send()
        .await
        .map_err(DiscoveryError::RequestSend)?;

    tracing::debug!(
        response.status = response.status().as_u16(),
        "received discovery response"
    );

    let document = response
        .error_for_status()
        .map_err(DiscoveryError::ErrorStatus)?
        .json::<DiscoveryDocument>()
        .await
        .map_err(DiscoveryError::MalformedDocument)?;

    tracing::debug!(
        jwks_uri = %document.jwks_uri,
        token_endpoint = %document.token_endpoint,
        "discovered provider endpoints"
    );

    Ok(document)
}
