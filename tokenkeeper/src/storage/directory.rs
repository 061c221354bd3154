//! A token store kept as one file per secret

use std::{collections::BTreeSet, io, path::PathBuf};

use async_trait::async_trait;

use super::{write_atomic, StoreError, TokenStorage};
use crate::{AccessToken, CachedToken, SecretName, SecretNameRef, TokenStore};

/// Keeps each token in its own file, named after its secret
///
/// Each file holds nothing but the raw bearer token, so that consumers can
/// read it directly. Hidden files in the directory are never read or
/// removed, and neither is any file not named after a managed secret.
#[derive(Debug)]
pub struct DirectoryTokenStorage {
    dir: PathBuf,
}

impl DirectoryTokenStorage {
    /// Constructs a new directory token storage
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    async fn read_tokens(&self) -> io::Result<TokenStore> {
        let mut store = TokenStore::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                Ok(_) => continue,
                Err(error) => {
                    tracing::warn!(
                        file = %name,
                        error = (&error as &dyn std::error::Error),
                        "unable to inspect file in token directory, ignoring it"
                    );
                    continue;
                }
            }

            let data = match tokio::fs::read_to_string(entry.path()).await {
                Ok(data) => data,
                Err(error) => {
                    tracing::warn!(
                        file = %name,
                        error = (&error as &dyn std::error::Error),
                        "unable to read token file, ignoring it"
                    );
                    continue;
                }
            };

            let token = data.trim();
            if token.is_empty() {
                tracing::debug!(secret = %name, "ignoring empty token file");
                continue;
            }

            store.insert(
                SecretName::new(name),
                CachedToken::new(AccessToken::new(token.to_owned())),
            );
        }

        Ok(store)
    }

    async fn remove_retired(
        &self,
        store: &TokenStore,
        managed: &BTreeSet<SecretName>,
    ) -> Result<(), StoreError> {
        let retired = managed
            .iter()
            .filter(|name| store.get(name).is_none() && is_storable(name));

        for name in retired {
            let path = self.dir.join(name.as_str());
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::info!(secret = %name, "removed token no longer held"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(StoreError::io(&path)(error)),
            }
        }

        Ok(())
    }
}

/// Whether `name` can be used as a file name inside the directory
fn is_storable(name: &SecretNameRef) -> bool {
    let name = name.as_str();
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

#[async_trait]
impl TokenStorage for DirectoryTokenStorage {
    /// Reads every regular, non-hidden file in the directory as a token
    ///
    /// Files that cannot be read as text are skipped with a warning. Only a
    /// failure to list the directory itself is an error.
    #[tracing::instrument(err, skip(self), fields(dir = %self.dir.display()))]
    async fn load(&self) -> Result<TokenStore, StoreError> {
        match self.read_tokens().await {
            Ok(store) => {
                tracing::debug!(tokens = store.len(), "loaded token directory");
                Ok(store)
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::info!("no previous token directory");
                Ok(TokenStore::new())
            }
            Err(error) => Err(StoreError::io(&self.dir)(error)),
        }
    }

    /// Writes every token to its own file and removes the files of managed names not in `store`
    ///
    /// Names that cannot be used as file names are skipped with a warning.
    #[tracing::instrument(err, skip(self, store, managed), fields(dir = %self.dir.display(), tokens = store.len()))]
    async fn persist(
        &self,
        store: &TokenStore,
        managed: &BTreeSet<SecretName>,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(StoreError::io(&self.dir))?;

        for (name, token) in store.iter() {
            if !is_storable(name) {
                tracing::warn!(
                    secret = %name,
                    "secret name cannot be used as a file name, not persisting its token"
                );
                continue;
            }

            let path = self.dir.join(name.as_str());
            write_atomic(&path, token.access_token().as_str().as_bytes())
                .await
                .map_err(StoreError::io(&path))?;
        }

        self.remove_retired(store, managed).await?;

        tracing::debug!("persisted token directory");
        Ok(())
    }
}
