//! DTOs for the OAuth2 token endpoint

use serde::{Deserialize, Serialize, Serializer};

use crate::{AccessToken, ClientIdRef, ClientSecretRef, RefreshToken, RefreshTokenRef};

/// Form body for the client credentials grant
#[derive(Debug)]
pub(super) struct ClientCredentialsRequest<'a> {
    pub client_id: &'a ClientIdRef,
    pub client_secret: &'a ClientSecretRef,
    pub scope: &'a str,
}

impl Serialize for ClientCredentialsRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("ClientCredentialsRequest", 4)?;
        ser.serialize_field("grant_type", "client_credentials")?;
        ser.serialize_field("client_id", self.client_id)?;
        ser.serialize_field("client_secret", self.client_secret)?;
        ser.serialize_field("scope", self.scope)?;
        ser.end()
    }
}

/// Form body for the refresh token grant
#[derive(Debug)]
pub(super) struct RefreshTokenRequest<'a> {
    pub client_id: &'a ClientIdRef,
    pub client_secret: Option<&'a ClientSecretRef>,
    pub refresh_token: &'a RefreshTokenRef,
    pub scope: &'a str,
}

impl Serialize for RefreshTokenRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshTokenRequest", 5)?;
        ser.serialize_field("grant_type", "refresh_token")?;
        ser.serialize_field("client_id", self.client_id)?;
        if let Some(secret) = self.client_secret {
            ser.serialize_field("client_secret", secret)?;
        } else {
            ser.skip_field("client_secret")?;
        }
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.serialize_field("scope", self.scope)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default)]
    pub id_token: Option<String>,
}
