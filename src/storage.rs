// # Managed Storage
//
// Committed files live under a managed storage root, laid out as
// `roms/<system>/<file name>`. The trait seam exists so tests can inject
// placement failures; production storage is the local filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),
    #[error("insufficient free space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },
    #[error("free space unavailable for {0}")]
    FreeSpaceUnknown(PathBuf),
}

/// Managed file storage operations (allows fault injection for tests)
#[async_trait::async_trait]
pub trait RomStorage: Send + Sync {
    /// Copy `source` into managed storage at `relative_dest`. Returns the
    /// absolute placed path. Placement to the same destination is
    /// serialized; an existing destination file is an error, never an
    /// overwrite.
    async fn place(&self, source: &Path, relative_dest: &Path) -> Result<PathBuf, StorageError>;

    /// Remove a previously placed file (commit rollback path).
    async fn remove(&self, relative_dest: &Path) -> Result<(), StorageError>;

    /// Free bytes available on the volume holding the storage root.
    fn available_space(&self) -> Result<u64, StorageError>;

    fn root(&self) -> &Path;
}

/// Production local-filesystem storage
pub struct LocalRomStorage {
    root: PathBuf,
    // One lock per in-flight destination path; moves to distinct paths
    // proceed concurrently
    path_locks: std::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalRomStorage {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        Ok(LocalRomStorage {
            root,
            path_locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn lock_for(&self, relative_dest: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.path_locks.lock().unwrap();
        locks
            .entry(relative_dest.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait::async_trait]
impl RomStorage for LocalRomStorage {
    async fn place(&self, source: &Path, relative_dest: &Path) -> Result<PathBuf, StorageError> {
        let lock = self.lock_for(relative_dest);
        let _guard = lock.lock().await;

        let destination = self.root.join(relative_dest);
        if destination.exists() {
            return Err(StorageError::DestinationExists(destination));
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::copy(source, &destination).await?;
        debug!(
            "Placed {} -> {}",
            source.display(),
            destination.display()
        );
        Ok(destination)
    }

    async fn remove(&self, relative_dest: &Path) -> Result<(), StorageError> {
        let destination = self.root.join(relative_dest);
        tokio::fs::remove_file(&destination).await?;
        debug!("Removed {}", destination.display());
        Ok(())
    }

    fn available_space(&self) -> Result<u64, StorageError> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        // Longest mount-point prefix wins (e.g. "/" vs "/home")
        disks
            .iter()
            .filter(|disk| self.root.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| StorageError::FreeSpaceUnknown(self.root.clone()))
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Storage manager handed through the pipeline
#[derive(Clone)]
pub struct StorageManager {
    storage: Arc<dyn RomStorage>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("root", &self.storage.root())
            .finish()
    }
}

impl StorageManager {
    pub fn new(storage: Arc<dyn RomStorage>) -> Self {
        StorageManager { storage }
    }

    pub fn local(root: PathBuf) -> Result<Self, StorageError> {
        Ok(StorageManager {
            storage: Arc::new(LocalRomStorage::new(root)?),
        })
    }

    pub async fn place(
        &self,
        source: &Path,
        relative_dest: &Path,
    ) -> Result<PathBuf, StorageError> {
        self.storage.place(source, relative_dest).await
    }

    pub async fn remove(&self, relative_dest: &Path) -> Result<(), StorageError> {
        self.storage.remove(relative_dest).await
    }

    pub fn available_space(&self) -> Result<u64, StorageError> {
        self.storage.available_space()
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn place_copies_and_refuses_overwrite() {
        let source_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("game.sfc");
        std::fs::write(&source, b"rom bytes").unwrap();

        let storage = LocalRomStorage::new(storage_dir.path().to_path_buf()).unwrap();
        let rel = Path::new("roms/snes/game.sfc");

        let placed = storage.place(&source, rel).await.unwrap();
        assert_eq!(std::fs::read(&placed).unwrap(), b"rom bytes");

        let second = storage.place(&source, rel).await;
        assert!(matches!(second, Err(StorageError::DestinationExists(_))));
    }

    #[tokio::test]
    async fn remove_deletes_placed_file() {
        let source_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("game.gb");
        std::fs::write(&source, b"x").unwrap();

        let storage = LocalRomStorage::new(storage_dir.path().to_path_buf()).unwrap();
        let rel = Path::new("roms/gb/game.gb");
        let placed = storage.place(&source, rel).await.unwrap();

        storage.remove(rel).await.unwrap();
        assert!(!placed.exists());
    }
}
