// Application state - the one place the UI reads the library from
// Holds the current snapshot and settings; refreshes, settings edits and bookmark saves go through here

use crate::library::{upsert_bookmark, Book, Bookmark, LibraryRepository, LibrarySettings};
use crate::storage::StorageError;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct LibraryData {
    books: Vec<Book>,
    bookmarks: Vec<Bookmark>,
}

struct Inner {
    repository: LibraryRepository,
    data: Mutex<LibraryData>,
    settings_tx: watch::Sender<LibrarySettings>,
    // bumped whenever books or bookmarks change
    revision_tx: watch::Sender<u64>,
    generation: AtomicU64,
    // newest refresh whose result has been applied
    committed: AtomicU64,
    in_flight: AtomicUsize,
    // serializes settings writes so the stored value ends as the latest one
    persist_lock: AsyncMutex<()>,
}

/// Cheap-to-clone handle on the shared library state.
#[derive(Clone)]
pub struct LibraryState {
    inner: Arc<Inner>,
}

/// Counts one in-flight refresh for as long as it lives.
struct ScanGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> ScanGuard<'a> {
    fn acquire(in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LibraryState {
    pub fn new(repository: LibraryRepository) -> Self {
        Self::with_settings(repository, LibrarySettings::default())
    }

    pub fn with_settings(repository: LibraryRepository, settings: LibrarySettings) -> Self {
        let (settings_tx, _) = watch::channel(settings);
        let (revision_tx, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                repository,
                data: Mutex::new(LibraryData::default()),
                settings_tx,
                revision_tx,
                generation: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                persist_lock: AsyncMutex::new(()),
            }),
        }
    }

    fn data(&self) -> MutexGuard<'_, LibraryData> {
        self.inner.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump_revision(&self) {
        self.inner.revision_tx.send_modify(|rev| *rev += 1);
    }

    pub fn repository(&self) -> &LibraryRepository {
        &self.inner.repository
    }

    pub fn books(&self) -> Vec<Book> {
        self.data().books.clone()
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.data().bookmarks.clone()
    }

    pub fn bookmarks_for(&self, book_id: &str) -> Vec<Bookmark> {
        self.data()
            .bookmarks
            .iter()
            .filter(|b| b.book_id == book_id)
            .cloned()
            .collect()
    }

    pub fn find_book(&self, book_id: &str) -> Option<Book> {
        self.data().books.iter().find(|b| b.id == book_id).cloned()
    }

    pub fn settings(&self) -> LibrarySettings {
        self.inner.settings_tx.borrow().clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn subscribe_settings(&self) -> watch::Receiver<LibrarySettings> {
        self.inner.settings_tx.subscribe()
    }

    pub fn subscribe_library(&self) -> watch::Receiver<u64> {
        self.inner.revision_tx.subscribe()
    }

    /// Rescans the configured roots and replaces books and bookmarks wholesale.
    ///
    /// When refreshes overlap, a result is dropped once a newer refresh has been applied.
    /// A newer refresh that fails does not block an older one that succeeds.
    pub async fn refresh_library(&self) -> Result<(), StorageError> {
        let token = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _scanning = ScanGuard::acquire(&self.inner.in_flight);

        let roots = self.settings().root_uris;
        let snapshot = self.inner.repository.get_library(&roots).await?;

        {
            let mut data = self.data();
            if self.inner.committed.load(Ordering::SeqCst) > token {
                debug!(token, "Dropping result of superseded refresh");
                return Ok(());
            }
            self.inner.committed.store(token, Ordering::SeqCst);
            info!(books = snapshot.books.len(), bookmarks = snapshot.bookmarks.len(), "Library refreshed");
            data.books = snapshot.books;
            data.bookmarks = snapshot.bookmarks;
        }

        self.bump_revision();
        Ok(())
    }

    /// Applies `transform` to the current settings and persists the result in the background.
    ///
    /// The in-memory value is never rolled back; a failed write is only logged.
    /// Writes take turns and each one stores whatever is current when its turn comes,
    /// so the last write to finish always carries the latest settings.
    /// Await the returned handle to know the write has finished.
    pub fn update_settings<T>(&self, transform: T) -> JoinHandle<()>
    where
        T: FnOnce(LibrarySettings) -> LibrarySettings,
    {
        self.inner
            .settings_tx
            .send_modify(|current| *current = transform(std::mem::take(current)));

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _turn = inner.persist_lock.lock().await;
            let latest = inner.settings_tx.borrow().clone();
            if let Err(e) = inner.repository.persist_settings(&latest).await {
                warn!(error = %e, "Failed to persist library settings");
            }
        })
    }

    /// Persists first, then mirrors the same replace-or-append into memory.
    pub async fn save_bookmark(&self, bookmark: Bookmark) -> Result<(), StorageError> {
        self.inner.repository.save_bookmark(&bookmark).await?;
        upsert_bookmark(&mut self.data().bookmarks, bookmark);
        self.bump_revision();
        Ok(())
    }

    /// Boot step: adopt stored settings if there are any. Returns whether there were.
    pub async fn load_persisted_settings(&self) -> Result<bool, StorageError> {
        match self.inner.repository.get_settings().await? {
            Some(stored) => {
                debug!(roots = stored.root_uris.len(), "Restored library settings");
                // the handle is dropped on purpose, the write still runs
                let _ = self.update_settings(move |_| stored);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn mark_opened(&self, book_id: &str) {
        let changed = {
            let mut data = self.data();
            match data.books.iter_mut().find(|b| b.id == book_id) {
                Some(book) => {
                    book.last_opened_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if changed {
            self.bump_revision();
        }
    }

    /// In-memory only; books are rebuilt from disk on every refresh.
    pub fn set_progress(&self, book_id: &str, fraction: f64) {
        let mut data = self.data();
        if let Some(book) = data.books.iter_mut().find(|b| b.id == book_id) {
            book.progress = Some(fraction.clamp(0.0, 1.0));
        }
    }

    /// Watches settings and refreshes whenever the roots or the auto-scan flag change
    /// (the first observation counts as a change) while auto-scan is on and a root exists.
    /// Runs until the returned task is aborted.
    pub fn spawn_auto_scan(&self) -> JoinHandle<()> {
        let state = self.clone();
        let mut rx = self.inner.settings_tx.subscribe();

        tokio::spawn(async move {
            let mut last_seen: Option<(Vec<String>, bool)> = None;
            loop {
                let current = {
                    let settings = rx.borrow_and_update();
                    (settings.root_uris.clone(), settings.auto_scan_on_launch)
                };

                if last_seen.as_ref() != Some(&current) {
                    let wanted = current.1 && !current.0.is_empty();
                    last_seen = Some(current);

                    if wanted {
                        debug!("Settings changed, starting automatic scan");
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = state.refresh_library().await {
                                warn!(error = %e, "Automatic library scan failed");
                            }
                        });
                    }
                }

                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
