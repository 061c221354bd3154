//! Named credentials used to obtain access tokens

use std::{collections::BTreeMap, io, path::Path};

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::{AccessToken, ClientId, ClientSecret, RefreshToken, SecretName, SecretNameRef};

/// A credential from which an access token can be obtained
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
    /// Credentials for the client credentials grant
    ClientCredentials {
        /// The client ID
        client_id: ClientId,
        /// The client secret
        client_secret: ClientSecret,
    },
    /// Credentials for the refresh token grant
    RefreshToken {
        /// The client ID
        client_id: ClientId,
        /// The client secret, if the client is confidential
        client_secret: Option<ClientSecret>,
        /// The refresh token
        refresh_token: RefreshToken,
    },
    /// An access token obtained by some other means
    ///
    /// It is used as-is and cannot be renewed.
    AccessToken {
        /// The access token
        access_token: AccessToken,
    },
}

impl Secret {
    /// The OAuth2 grant used to renew this secret's token, if any
    pub fn grant_type(&self) -> Option<&'static str> {
        match self {
            Self::ClientCredentials { .. } => Some("client_credentials"),
            Self::RefreshToken { .. } => Some("refresh_token"),
            Self::AccessToken { .. } => None,
        }
    }

    /// Discriminates a secret by the fields present in `value`
    ///
    /// A refresh token takes precedence over client credentials, which take
    /// precedence over a static access token. Numeric field values are read
    /// as their decimal text. Returns `None` for anything that is not a
    /// mapping or matches none of these shapes.
    fn from_value(value: Value) -> Option<Self> {
        let Value::Mapping(mut mapping) = value else {
            return None;
        };

        for field in mapping.values_mut() {
            if let Value::Number(n) = field {
                *field = Value::String(n.to_string());
            }
        }

        let fields: SecretFields = match serde_yaml::from_value(Value::Mapping(mapping)) {
            Ok(fields) => fields,
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn std::error::Error),
                    "unable to read secret fields"
                );
                return None;
            }
        };

        match fields {
            SecretFields {
                client_id: Some(client_id),
                client_secret,
                refresh_token: Some(refresh_token),
                ..
            } => Some(Self::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
            }),
            SecretFields {
                client_id: Some(client_id),
                client_secret: Some(client_secret),
                ..
            } => Some(Self::ClientCredentials {
                client_id,
                client_secret,
            }),
            SecretFields {
                access_token: Some(access_token),
                ..
            } => Some(Self::AccessToken { access_token }),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct SecretFields {
    #[serde(default)]
    client_id: Option<ClientId>,
    #[serde(default)]
    client_secret: Option<ClientSecret>,
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
    #[serde(default)]
    access_token: Option<AccessToken>,
}

/// A configured entry in the secrets document
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretEntry {
    /// A recognized credential
    Credentials(Secret),
    /// A value that is not a recognized credential
    ///
    /// Such entries belong to other consumers of the secrets document and are
    /// skipped.
    Unrecognized,
}

/// An error loading the secrets document
#[derive(Debug, Error)]
pub enum SecretsError {
    /// The secrets file could not be read
    #[error("unable to read secrets file")]
    Read(#[from] io::Error),
    /// The document is not valid YAML
    #[error("unable to parse secrets document")]
    Parse(#[from] serde_yaml::Error),
    /// The document is not a mapping of names to secrets
    #[error("secrets document must be a mapping of names to secrets")]
    NotAMapping,
}

/// The set of configured secrets, by name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Secrets {
    entries: BTreeMap<SecretName, SecretEntry>,
}

impl Secrets {
    /// Parses a YAML (or JSON) secrets document
    pub fn from_yaml_str(document: &str) -> Result<Self, SecretsError> {
        let value: Value = serde_yaml::from_str(document)?;

        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Ok(Self::default()),
            _ => return Err(SecretsError::NotAMapping),
        };

        let mut entries = BTreeMap::new();
        for (key, value) in mapping {
            let Some(name) = secret_name(&key) else {
                tracing::warn!("ignoring secret with a non-scalar name");
                continue;
            };

            let is_mapping = value.is_mapping();
            let entry = match Secret::from_value(value) {
                Some(secret) => SecretEntry::Credentials(secret),
                None if is_mapping => {
                    tracing::warn!(
                        secret = %name,
                        "mapping does not hold a recognized credential, ignoring it"
                    );
                    SecretEntry::Unrecognized
                }
                None => SecretEntry::Unrecognized,
            };

            entries.insert(name, entry);
        }

        Ok(Self { entries })
    }

    /// Reads and parses the secrets file at `path`
    pub async fn load(path: &Path) -> Result<Self, SecretsError> {
        let document = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&document)
    }

    /// Adds or replaces a secret
    pub fn insert(&mut self, name: SecretName, secret: Secret) {
        self.entries.insert(name, SecretEntry::Credentials(secret));
    }

    /// Gets the entry with the given name
    pub fn get(&self, name: &SecretNameRef) -> Option<&SecretEntry> {
        self.entries.get(name)
    }

    /// Iterates over all entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&SecretNameRef, &SecretEntry)> {
        self.entries.iter().map(|(name, entry)| (&**name, entry))
    }

    /// Iterates over the recognized credentials in name order
    pub fn credentials(&self) -> impl Iterator<Item = (&SecretNameRef, &Secret)> {
        self.iter().filter_map(|(name, entry)| match entry {
            SecretEntry::Credentials(secret) => Some((name, secret)),
            SecretEntry::Unrecognized => None,
        })
    }

    /// The number of entries, recognized or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(SecretName, Secret)> for Secrets {
    fn from_iter<T: IntoIterator<Item = (SecretName, Secret)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, secret)| (name, SecretEntry::Credentials(secret)))
                .collect(),
        }
    }
}

fn secret_name(key: &Value) -> Option<SecretName> {
    match key {
        Value::String(s) => Some(SecretName::new(s.clone())),
        Value::Number(n) => Some(SecretName::new(n.to_string())),
        Value::Bool(b) => Some(SecretName::new(b.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use tracing_test::traced_test;

    use super::*;

    const SECRETS: &str = r#"
        fedcloud.egi.eu:
          client_id: id
          client_secret: secret
        vo.access.egi.eu:
          client_id: other-id
          refresh_token: refresh
        static:
          access_token: eyJ.token.sig
        both:
          client_id: id
          client_secret: secret
          refresh_token: refresh
          access_token: ignored
        site: not-a-dict
        incomplete:
          client_id: id
        list:
          - 1
          - 2
    "#;

    #[test]
    fn discriminates_secret_variants() -> Result<()> {
        let secrets = Secrets::from_yaml_str(SECRETS)?;

        assert_eq!(
            secrets.get(SecretNameRef::from_str("fedcloud.egi.eu")),
            Some(&SecretEntry::Credentials(Secret::ClientCredentials {
                client_id: ClientId::from_static("id"),
                client_secret: ClientSecret::from_static("secret"),
            }))
        );
        assert_eq!(
            secrets.get(SecretNameRef::from_str("vo.access.egi.eu")),
            Some(&SecretEntry::Credentials(Secret::RefreshToken {
                client_id: ClientId::from_static("other-id"),
                client_secret: None,
                refresh_token: RefreshToken::from_static("refresh"),
            }))
        );
        assert_eq!(
            secrets.get(SecretNameRef::from_str("static")),
            Some(&SecretEntry::Credentials(Secret::AccessToken {
                access_token: AccessToken::from_static("eyJ.token.sig"),
            }))
        );
        Ok(())
    }

    #[test]
    fn refresh_token_takes_precedence() -> Result<()> {
        let secrets = Secrets::from_yaml_str(SECRETS)?;

        let Some(SecretEntry::Credentials(secret)) = secrets.get(SecretNameRef::from_str("both"))
        else {
            panic!("expected credentials");
        };
        assert_eq!(secret.grant_type(), Some("refresh_token"));
        Ok(())
    }

    #[test]
    fn unrecognized_entries_are_kept_but_not_credentials() -> Result<()> {
        let secrets = Secrets::from_yaml_str(SECRETS)?;

        for name in ["site", "incomplete", "list"] {
            assert_eq!(
                secrets.get(SecretNameRef::from_str(name)),
                Some(&SecretEntry::Unrecognized),
                "{name}"
            );
        }

        let names: Vec<&str> = secrets.credentials().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            ["both", "fedcloud.egi.eu", "static", "vo.access.egi.eu"]
        );
        Ok(())
    }

    #[test]
    fn numeric_credentials_are_read_as_text() -> Result<()> {
        let secrets =
            Secrets::from_yaml_str("numeric:\n  client_id: 12345\n  client_secret: 67890\n")?;

        assert_eq!(
            secrets.get(SecretNameRef::from_str("numeric")),
            Some(&SecretEntry::Credentials(Secret::ClientCredentials {
                client_id: ClientId::from_static("12345"),
                client_secret: ClientSecret::from_static("67890"),
            }))
        );
        Ok(())
    }

    #[test]
    #[traced_test]
    fn unrecognized_mappings_are_reported() -> Result<()> {
        Secrets::from_yaml_str("incomplete:\n  client_id: id\nsite: not-a-dict\n")?;

        logs_assert(|lines: &[&str]| {
            let warnings: Vec<_> = lines
                .iter()
                .filter(|line| line.contains("WARN") && line.contains("recognized credential"))
                .collect();
            match warnings.as_slice() {
                [line] if line.contains("incomplete") => Ok(()),
                _ => Err(format!("expected one warning for `incomplete`, got {warnings:?}")),
            }
        });
        Ok(())
    }

    #[test]
    fn json_documents_are_accepted() -> Result<()> {
        let secrets =
            Secrets::from_yaml_str(r#"{"a": {"client_id": "id", "client_secret": "s"}, "b": 3}"#)?;

        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets.credentials().count(), 1);
        Ok(())
    }

    #[test]
    fn empty_document_has_no_secrets() -> Result<()> {
        assert!(Secrets::from_yaml_str("")?.is_empty());
        Ok(())
    }

    #[test]
    fn top_level_must_be_a_mapping() {
        let err = Secrets::from_yaml_str("- a\n- b\n").unwrap_err();

        assert!(matches!(err, SecretsError::NotAMapping), "{err:?}");
    }

    #[tokio::test]
    async fn loads_secrets_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("secrets.yaml");
        tokio::fs::write(&path, SECRETS).await?;

        let secrets = Secrets::load(&path).await?;

        assert_eq!(secrets.credentials().count(), 4);
        Ok(())
    }
}
