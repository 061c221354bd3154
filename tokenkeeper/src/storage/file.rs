//! A token store kept in a single YAML file

use std::{collections::BTreeSet, io, path::PathBuf};

use async_trait::async_trait;

use super::{write_atomic, StoreError, TokenStorage};
use crate::{SecretName, TokenStore};

/// Keeps all tokens in one YAML document mapping names to tokens
///
/// The file belongs to this storage alone and is rewritten in full on every
/// persist.
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    /// Constructs a new file token storage
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    /// Reads the YAML document, treating one that cannot be parsed as empty
    #[tracing::instrument(err, skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<TokenStore, StoreError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::info!("no previous token store");
                return Ok(TokenStore::new());
            }
            Err(error) if error.kind() == io::ErrorKind::InvalidData => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "token store is not text, refreshing every token"
                );
                return Ok(TokenStore::new());
            }
            Err(error) => return Err(StoreError::io(&self.path)(error)),
        };

        if data.trim().is_empty() {
            return Ok(TokenStore::new());
        }

        let store: TokenStore = match serde_yaml::from_str(&data) {
            Ok(store) => store,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "token store is malformed, refreshing every token"
                );
                return Ok(TokenStore::new());
            }
        };

        tracing::debug!(tokens = store.len(), "loaded token store");
        Ok(store)
    }

    #[tracing::instrument(err, skip_all, fields(path = %self.path.display(), tokens = store.len()))]
    async fn persist(
        &self,
        store: &TokenStore,
        _managed: &BTreeSet<SecretName>,
    ) -> Result<(), StoreError> {
        let data = serde_yaml::to_string(store).map_err(StoreError::Serialize)?;

        write_atomic(&self.path, data.as_bytes())
            .await
            .map_err(StoreError::io(&self.path))?;

        tracing::debug!("persisted token store");
        Ok(())
    }
}
