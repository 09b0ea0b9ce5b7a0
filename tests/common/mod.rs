#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::FutureExt;
use shelfplay::library::{DirEntry, FileSystem, LibraryRepository, MemoryFileSystem, ScanError};
use shelfplay::state::LibraryState;
use shelfplay::storage::{MemoryStore, SharedStore};
use std::sync::Arc;
use tokio::sync::Notify;

pub fn media_dir() -> MemoryFileSystem {
    MemoryFileSystem::new().with_dir("/media", &["book1.mp3", "notes.txt", "story.epub"])
}

pub struct Fixture {
    pub state: LibraryState,
    pub fs: Arc<MemoryFileSystem>,
    pub kv: Arc<MemoryStore>,
}

pub fn fixture(fs: MemoryFileSystem) -> Fixture {
    fixture_with_store(fs, Arc::new(MemoryStore::new()))
}

pub fn fixture_with_store(fs: MemoryFileSystem, kv: Arc<MemoryStore>) -> Fixture {
    let fs = Arc::new(fs);
    let shared: SharedStore = kv.clone();
    let repo = LibraryRepository::from_parts(fs.clone(), shared);
    Fixture {
        state: LibraryState::new(repo),
        fs,
        kv,
    }
}

/// Memory filesystem where listing one location waits until `open` is called.
pub struct GatedFileSystem {
    inner: MemoryFileSystem,
    gated: String,
    gate: Arc<Notify>,
}

impl GatedFileSystem {
    pub fn new(inner: MemoryFileSystem, gated: &str) -> Self {
        Self {
            inner,
            gated: gated.to_string(),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn gate(&self) -> Arc<Notify> {
        Arc::clone(&self.gate)
    }
}

impl FileSystem for GatedFileSystem {
    fn list<'a>(&'a self, location: &'a str) -> BoxFuture<'a, Result<Vec<DirEntry>, ScanError>> {
        async move {
            if location == self.gated {
                self.gate.notified().await;
            }
            self.inner.list(location).await
        }
        .boxed()
    }
}
