use super::filesystem::SharedFileSystem;
use super::scanner::{FolderScanner, IdentityStrategy, PlatformFamily};
use super::types::{upsert_bookmark, Bookmark, LibrarySettings, LibrarySnapshot};
use crate::storage::{PersistentStore, SharedStore, StorageError};
use tracing::info;

/// Joins scan results with stored bookmarks and fronts all persistence.
pub struct LibraryRepository {
    scanner: FolderScanner<SharedFileSystem>,
    store: PersistentStore<SharedStore>,
}

impl LibraryRepository {
    pub fn new(scanner: FolderScanner<SharedFileSystem>, store: PersistentStore<SharedStore>) -> Self {
        Self { scanner, store }
    }

    pub fn from_parts(fs: SharedFileSystem, kv: SharedStore) -> Self {
        Self::new(FolderScanner::new(fs), PersistentStore::new(kv))
    }

    pub fn with_identity(mut self, identity: IdentityStrategy) -> Self {
        self.scanner = self.scanner.with_identity(identity);
        self
    }

    pub fn with_platform(mut self, platform: PlatformFamily) -> Self {
        self.scanner = self.scanner.with_platform(platform);
        self
    }

    pub fn store(&self) -> &PersistentStore<SharedStore> {
        &self.store
    }

    /// Fresh scan plus bookmark read, run concurrently. Nothing is cached.
    pub async fn get_library(&self, root_uris: &[String]) -> Result<LibrarySnapshot, StorageError> {
        let (books, bookmarks) = tokio::join!(
            self.scanner.scan_library(root_uris),
            self.store.get_bookmarks()
        );

        Ok(LibrarySnapshot {
            books,
            bookmarks: bookmarks?,
        })
    }

    pub async fn get_settings(&self) -> Result<Option<LibrarySettings>, StorageError> {
        self.store.get_settings().await
    }

    pub async fn persist_settings(&self, settings: &LibrarySettings) -> Result<(), StorageError> {
        self.store.persist_settings(settings).await
    }

    pub async fn get_bookmarks(&self) -> Result<Vec<Bookmark>, StorageError> {
        self.store.get_bookmarks().await
    }

    /// Read-modify-write of the whole bookmark list.
    pub async fn save_bookmark(&self, bookmark: &Bookmark) -> Result<(), StorageError> {
        let mut current = self.store.get_bookmarks().await?;
        upsert_bookmark(&mut current, bookmark.clone());
        self.store.put_bookmarks(&current).await?;

        info!(bookmark = %bookmark.id, book = %bookmark.book_id, position = bookmark.position, "Saved bookmark");
        Ok(())
    }
}
