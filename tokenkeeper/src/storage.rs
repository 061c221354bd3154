//! Persistence of the token store between runs

use std::{
    collections::BTreeSet,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::OpenOptions;

use crate::{SecretName, TokenStore};

pub mod directory;
pub mod file;

/// An error reading or writing persisted tokens
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error
    #[error("token store I/O error at {}", path.display())]
    Io {
        /// The path being accessed
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },
    /// The store could not be serialized
    #[error("unable to serialize token store")]
    Serialize(#[source] serde_yaml::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// A place where the token store is kept between runs
///
/// The store is read once at the start of a run and replaced wholesale at
/// the end.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Reads the persisted store
    ///
    /// A store which has never been written loads as empty. Persisted
    /// tokens that cannot be read are left out with a warning, so that their
    /// secrets are refreshed.
    async fn load(&self) -> Result<TokenStore, StoreError>;

    /// Replaces the persisted store with `store`
    ///
    /// `managed` names the secrets this run was responsible for. A token
    /// persisted for a managed name that is absent from `store` is removed.
    /// Storage shared with other data never touches anything else.
    async fn persist(
        &self,
        store: &TokenStore,
        managed: &BTreeSet<SecretName>,
    ) -> Result<(), StoreError>;
}

/// Replaces the contents of `path` without exposing a partially written file
///
/// The data is written to a hidden sibling file readable only by the owner
/// and then renamed over `path`.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let temp_path = temp_path_for(path)?;

    let result = async {
        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        if let Err(error) = tokio::fs::remove_file(&temp_path).await {
            tracing::debug!(
                path = %temp_path.display(),
                error = (&error as &dyn std::error::Error),
                "unable to remove temporary file"
            );
        }
    }

    result
}

fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} does not name a file", path.display()),
        )
    })?;

    let mut temp_name = OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");

    Ok(path.with_file_name(temp_name))
}
