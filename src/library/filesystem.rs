// Filesystem seam for the scanner
// Local disk in the app, an in-memory tree in tests

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_file: bool,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("location not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported location: {0}")]
    InvalidLocation(String),
    #[error("failed to list {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    pub fn from_io(location: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ScanError::NotFound(location.to_string()),
            io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(location.to_string()),
            _ => ScanError::Io {
                location: location.to_string(),
                source: err,
            },
        }
    }
}

/// Tag data the scanner can fold into an audio book.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaTags {
    pub author: Option<String>,
    pub duration: Option<f64>, // seconds
}

/// Listing service the scanner runs against.
pub trait FileSystem: Send + Sync {
    /// Immediate entries of `location`, one level only.
    fn list<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<DirEntry>, ScanError>>;

    /// Best-effort tag lookup; implementations without tag support return `None`.
    fn probe<'a>(&'a self, _path: &'a str) -> BoxFuture<'a, Option<MediaTags>> {
        async { None }.boxed()
    }
}

impl<T: FileSystem + ?Sized> FileSystem for Arc<T> {
    fn list<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<DirEntry>, ScanError>> {
        (**self).list(location)
    }

    fn probe<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Option<MediaTags>> {
        (**self).probe(path)
    }
}

pub type SharedFileSystem = Arc<dyn FileSystem>;

/// Local disk through `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    read_tags: bool,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, read_tags: bool) -> Self {
        self.read_tags = read_tags;
        self
    }
}

impl FileSystem for LocalFileSystem {
    fn list<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<DirEntry>, ScanError>> {
        async move {
            if location.starts_with(super::scanner::CONTENT_SCHEME) {
                return Err(ScanError::InvalidLocation(location.to_string()));
            }

            let mut reader = tokio::fs::read_dir(location)
                .await
                .map_err(|e| ScanError::from_io(location, e))?;

            let mut entries = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| ScanError::from_io(location, e))?
            {
                let path = entry.path();
                // follow symlinks so linked audiobooks still show up
                let is_file = match tokio::fs::metadata(&path).await {
                    Ok(meta) => meta.is_file(),
                    Err(_) => entry.file_type().await.map(|t| t.is_file()).unwrap_or(false),
                };

                entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: path.to_string_lossy().into_owned(),
                    is_file,
                });
            }

            Ok(entries)
        }
        .boxed()
    }

    fn probe<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Option<MediaTags>> {
        async move {
            if !self.read_tags {
                return None;
            }
            let owned = path.to_string();
            tokio::task::spawn_blocking(move || read_tags(Path::new(&owned)))
                .await
                .ok()
                .flatten()
        }
        .boxed()
    }
}

fn read_tags(path: &Path) -> Option<MediaTags> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();

    let tags = match ext.as_str() {
        "mp3" => {
            use id3::TagLike;
            let tag = id3::Tag::read_from_path(path).ok()?;
            MediaTags {
                author: tag.artist().map(|s| s.to_string()),
                duration: tag.duration().map(|ms| ms as f64 / 1000.0),
            }
        }
        "m4a" | "m4b" => {
            let tag = mp4ameta::Tag::read_from_path(path).ok()?;
            MediaTags {
                author: tag
                    .artist()
                    .or_else(|| tag.album_artist())
                    .map(|s| s.to_string()),
                duration: tag.duration().map(|d| d.as_secs_f64()),
            }
        }
        _ => return None,
    };

    debug!(path = %path.display(), ?tags, "Read media tags");
    Some(tags)
}

/// In-memory directory tree, used by tests and demos.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    dirs: Mutex<HashMap<String, Vec<DirEntry>>>,
    tags: Mutex<HashMap<String, MediaTags>>,
    list_calls: AtomicUsize,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `location` with plain files named `files`.
    pub fn with_dir(self, location: &str, files: &[&str]) -> Self {
        let entries = files
            .iter()
            .map(|name| DirEntry {
                name: name.to_string(),
                path: format!("{}/{}", location.trim_end_matches('/'), name),
                is_file: true,
            })
            .collect();
        self.insert(location, entries);
        self
    }

    /// Adds a sub-directory entry under `location`.
    pub fn with_subdir(self, location: &str, name: &str) -> Self {
        let entry = DirEntry {
            name: name.to_string(),
            path: format!("{}/{}", location.trim_end_matches('/'), name),
            is_file: false,
        };
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.entry(location.to_string()).or_default().push(entry);
        }
        self
    }

    pub fn with_tags(self, path: &str, tags: MediaTags) -> Self {
        if let Ok(mut map) = self.tags.lock() {
            map.insert(path.to_string(), tags);
        }
        self
    }

    pub fn insert(&self, location: &str, entries: Vec<DirEntry>) {
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.insert(location.to_string(), entries);
        }
    }

    pub fn remove(&self, location: &str) {
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.remove(location);
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl FileSystem for MemoryFileSystem {
    fn list<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<DirEntry>, ScanError>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .dirs
            .lock()
            .ok()
            .and_then(|dirs| dirs.get(location).cloned())
            .ok_or_else(|| ScanError::NotFound(location.to_string()));
        async move { result }.boxed()
    }

    fn probe<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Option<MediaTags>> {
        let tags = self.tags.lock().ok().and_then(|map| map.get(path).cloned());
        async move { tags }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_listing_marks_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("book1.mp3"), b"id3").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let fs = LocalFileSystem::new();
        let location = dir.path().to_string_lossy().into_owned();
        let mut entries = fs.list(&location).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "book1.mp3");
        assert!(entries[0].is_file);
        assert_eq!(entries[1].name, "nested");
        assert!(!entries[1].is_file);
    }

    #[tokio::test]
    async fn test_local_missing_dir_is_not_found() {
        let fs = LocalFileSystem::new();
        let err = fs.list("/definitely/not/here/shelfplay").await.unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_content_uri_is_rejected_locally() {
        let fs = LocalFileSystem::new();
        let err = fs.list("content://com.android.externalstorage/tree/x").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidLocation(_)));
    }

    #[tokio::test]
    async fn test_probe_disabled_by_default() {
        let fs = LocalFileSystem::new();
        assert!(fs.probe("/tmp/whatever.mp3").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_fs_counts_calls() {
        let fs = MemoryFileSystem::new().with_dir("/media", &["a.mp3"]);
        assert_eq!(fs.list("/media").await.unwrap()[0].path, "/media/a.mp3");
        assert!(fs.list("/missing").await.is_err());
        assert_eq!(fs.list_calls(), 2);
    }
}
