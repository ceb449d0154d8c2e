//! Host-side storage: data directories and the shared keyfile.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};

/// Data directory inside mongod containers.
pub const CONTAINER_DATA_DIR: &str = "/data/db";

/// Keyfile file name under the storage root.
pub const KEYFILE_NAME: &str = "mongo_keyfile";

/// Random bytes in a generated keyfile, before encoding.
const KEYFILE_BYTES: usize = 756;

/// Returns where the keyfile is mounted inside containers.
pub fn keyfile_target() -> &'static str {
    if cfg!(target_os = "macos") {
        "/etc/mongo/mongo_keyfile"
    } else {
        "/data/db/mongo_keyfile"
    }
}

/// Layout of the engine's host directories.
///
/// ```text
/// <root>/
///   mongo_keyfile
///   data/
///     <node>-db/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a layout rooted at `~/.tomodo`.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            OrchestratorError::invalid_configuration("cannot determine the home directory")
        })?;
        Ok(Self::new(home.join(".tomodo")))
    }

    /// Returns the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the host data directory of a node.
    pub fn data_dir(&self, node_name: &str) -> PathBuf {
        self.root.join("data").join(format!("{node_name}-db"))
    }

    /// Returns the keyfile path.
    pub fn keyfile_path(&self) -> PathBuf {
        self.root.join(KEYFILE_NAME)
    }

    /// Creates the host data directory of a node.
    pub async fn create_data_dir(&self, node_name: &str) -> Result<PathBuf> {
        let dir = self.data_dir(node_name);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(path = %dir.display(), "Created data directory");
        Ok(dir)
    }

    /// Deletes a host data directory, returning whether anything was removed.
    ///
    /// Directories outside the storage root are left alone. A missing
    /// directory is not an error.
    pub async fn remove_data_dir(&self, dir: &Path) -> Result<bool> {
        if !dir.starts_with(self.root.join("data")) {
            warn!(
                path = %dir.display(),
                root = %self.root.display(),
                "Refusing to remove directory outside the storage root"
            );
            return Ok(false);
        }
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                info!(path = %dir.display(), "Removed data directory");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %dir.display(), "Data directory already gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the keyfile path, generating the keyfile if it does not exist.
    ///
    /// The file is created with create-new semantics and mode `0400`; if
    /// another process creates it first, that file is reused.
    pub async fn ensure_keyfile(&self) -> Result<PathBuf> {
        let path = self.keyfile_path();
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }
        tokio::fs::create_dir_all(&self.root).await?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o400);

        let mut file = match options.open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(path),
            Err(e) => return Err(e.into()),
        };
        file.write_all(generate_key().as_bytes()).await?;
        file.flush().await?;

        info!(path = %path.display(), "Generated keyfile");
        Ok(path)
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; KEYFILE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
