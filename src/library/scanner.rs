use super::filesystem::{DirEntry, FileSystem};
use super::types::{Book, Chapter, MediaType};
use icu_collator::{Collator, CollatorOptions, Strength};
use std::cmp::Ordering;
use tracing::{debug, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

pub const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "m4a", "m4b", "aac", "wav"];
pub const EBOOK_EXTENSIONS: [&str; 2] = ["epub", "pdf"];
pub const CONTENT_SCHEME: &str = "content://";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Android,
    Other,
}

impl PlatformFamily {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            PlatformFamily::Android
        } else {
            PlatformFamily::Other
        }
    }
}

/// How book and chapter identifiers are assigned on each scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityStrategy {
    /// Fresh v4 UUIDs every scan.
    #[default]
    Random,
    /// Hash of the file path, equal across rescans.
    PathDerived,
}

/// Content-provider references pass through; Android gets an absolute path.
pub fn normalize_location(uri: &str, platform: PlatformFamily) -> String {
    if uri.starts_with(CONTENT_SCHEME) {
        return uri.to_string();
    }

    if platform == PlatformFamily::Android && !uri.starts_with('/') {
        return format!("/{}", uri);
    }

    uri.to_string()
}

pub fn classify(file_name: &str) -> Option<MediaType> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();

    if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Audio)
    } else if EBOOK_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Ebook)
    } else {
        None
    }
}

/// File name without its final extension.
pub fn title_from_name(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
        .to_string()
}

/// Title ordering under the root Unicode collation: accents sort next to their
/// base letter and lowercase sorts before uppercase on ties.
pub struct TitleCollator {
    collator: Option<Collator>,
}

impl TitleCollator {
    pub fn new() -> Self {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Tertiary);

        match Collator::try_new(&Default::default(), options) {
            Ok(collator) => Self {
                collator: Some(collator),
            },
            Err(e) => {
                warn!(error = %e, "Collation data unavailable, sorting titles case-folded");
                Self { collator: None }
            }
        }
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match &self.collator {
            Some(collator) => collator.compare(a, b).then_with(|| a.cmp(b)),
            None => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| b.cmp(a)),
        }
    }
}

impl Default for TitleCollator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn compare_titles(a: &str, b: &str) -> Ordering {
    TitleCollator::new().compare(a, b)
}

fn path_id(path: &str, seed: u64) -> String {
    let bytes = path.as_bytes();
    Uuid::from_u64_pair(xxh64(bytes, seed), xxh64(bytes, seed + 1)).to_string()
}

pub struct FolderScanner<F> {
    fs: F,
    identity: IdentityStrategy,
    platform: PlatformFamily,
}

impl<F: FileSystem> FolderScanner<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            identity: IdentityStrategy::default(),
            platform: PlatformFamily::current(),
        }
    }

    pub fn with_identity(mut self, identity: IdentityStrategy) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_platform(mut self, platform: PlatformFamily) -> Self {
        self.platform = platform;
        self
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    /// One book per supported file directly under each root, sorted by title.
    /// Roots that cannot be listed are skipped.
    pub async fn scan_library(&self, root_uris: &[String]) -> Vec<Book> {
        if root_uris.is_empty() {
            return Vec::new();
        }

        let mut books = Vec::new();

        for root in root_uris {
            let location = normalize_location(root, self.platform);
            let entries = match self.fs.list(&location).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(root = %root, error = %e, "Skipping library folder that could not be listed");
                    continue;
                }
            };

            let before = books.len();
            for entry in entries.iter().filter(|e| e.is_file) {
                if let Some(book) = self.book_from_entry(entry).await {
                    books.push(book);
                }
            }
            debug!(root = %root, found = books.len() - before, "Scanned library folder");
        }

        let collator = TitleCollator::new();
        books.sort_by(|a, b| collator.compare(&a.title, &b.title));
        info!(books = books.len(), roots = root_uris.len(), "Library scan finished");
        books
    }

    async fn book_from_entry(&self, entry: &DirEntry) -> Option<Book> {
        let media_type = classify(&entry.name)?;
        let mut book = self.make_book(&entry.path, title_from_name(&entry.name), media_type);

        if media_type == MediaType::Audio {
            if let Some(tags) = self.fs.probe(&entry.path).await {
                book.author = tags.author;
                if let Some(chapter) = book.tracks.first_mut() {
                    chapter.duration = tags.duration;
                }
            }
        }

        Some(book)
    }

    fn make_book(&self, path: &str, title: String, media_type: MediaType) -> Book {
        let (book_id, chapter_id) = match self.identity {
            IdentityStrategy::Random => (Uuid::new_v4().to_string(), Uuid::new_v4().to_string()),
            IdentityStrategy::PathDerived => (path_id(path, 0), path_id(path, 2)),
        };

        Book {
            id: book_id,
            title: title.clone(),
            author: None,
            description: None,
            cover: None,
            media_type,
            path: path.to_string(),
            tracks: vec![Chapter {
                id: chapter_id,
                title,
                duration: None,
                path: path.to_string(),
                position: None,
            }],
            last_opened_at: None,
            progress: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::filesystem::{MediaTags, MemoryFileSystem};

    fn roots(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_extensions() {
        assert_eq!(classify("book1.mp3"), Some(MediaType::Audio));
        assert_eq!(classify("Saga.M4B"), Some(MediaType::Audio));
        assert_eq!(classify("story.EPUB"), Some(MediaType::Ebook));
        assert_eq!(classify("manual.pdf"), Some(MediaType::Ebook));
        assert_eq!(classify("notes.txt"), None);
        assert_eq!(classify("mp3"), None);
    }

    #[test]
    fn test_title_strips_last_extension_only() {
        assert_eq!(title_from_name("book1.mp3"), "book1");
        assert_eq!(title_from_name("vol.2.part.m4b"), "vol.2.part");
        assert_eq!(title_from_name("plain"), "plain");
    }

    #[test]
    fn test_normalize_location() {
        let content = "content://com.android.externalstorage.documents/tree/primary%3ABooks";
        assert_eq!(normalize_location(content, PlatformFamily::Android), content);
        assert_eq!(
            normalize_location("storage/emulated/0/Books", PlatformFamily::Android),
            "/storage/emulated/0/Books"
        );
        assert_eq!(normalize_location("/media", PlatformFamily::Android), "/media");
        assert_eq!(normalize_location("Books", PlatformFamily::Other), "Books");
    }

    #[test]
    fn test_compare_titles_is_case_insensitive() {
        let mut titles = vec!["banana", "Apple", "cherry", "apple", "éclair", "Ärger"];
        titles.sort_by(|a, b| compare_titles(a, b));
        assert_eq!(titles, vec!["apple", "Apple", "Ärger", "banana", "cherry", "éclair"]);
    }

    #[tokio::test]
    async fn test_scan_media_folder() {
        let fs = MemoryFileSystem::new().with_dir("/media", &["book1.mp3", "notes.txt", "story.epub"]);
        let scanner = FolderScanner::new(fs);

        let books = scanner.scan_library(&roots(&["/media"])).await;

        assert_eq!(books.len(), 2);
        assert_eq!(books[0].title, "book1");
        assert_eq!(books[0].media_type, MediaType::Audio);
        assert_eq!(books[1].title, "story");
        assert_eq!(books[1].media_type, MediaType::Ebook);

        for book in &books {
            assert_eq!(book.tracks.len(), 1);
            assert_eq!(book.tracks[0].path, book.path);
            assert_eq!(book.tracks[0].title, book.title);
        }
    }

    #[tokio::test]
    async fn test_unreadable_root_is_skipped() {
        let fs = MemoryFileSystem::new().with_dir("/ok", &["a.mp3"]);
        let scanner = FolderScanner::new(fs);

        let books = scanner.scan_library(&roots(&["/missing", "/ok"])).await;
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "a");
    }

    #[tokio::test]
    async fn test_subdirs_are_ignored() {
        let fs = MemoryFileSystem::new()
            .with_dir("/media", &["real.mp3"])
            .with_subdir("/media", "Series.mp3");
        let scanner = FolderScanner::new(fs);

        let books = scanner.scan_library(&roots(&["/media"])).await;
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "real");
    }

    #[tokio::test]
    async fn test_hidden_media_files_are_books() {
        let fs = MemoryFileSystem::new().with_dir("/media", &[".hidden.mp3", "a.mp3", ".profile"]);
        let scanner = FolderScanner::new(fs);

        let books = scanner.scan_library(&roots(&["/media"])).await;
        let titles: Vec<&str> = books.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec![".hidden", "a"]);
    }

    #[tokio::test]
    async fn test_accented_titles_sort_with_their_base_letter() {
        let fs = MemoryFileSystem::new().with_dir("/media", &["Zola.epub", "Émile.epub", "apple.epub"]);
        let scanner = FolderScanner::new(fs);

        let books = scanner.scan_library(&roots(&["/media"])).await;
        let titles: Vec<&str> = books.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["apple", "Émile", "Zola"]);
    }

    #[tokio::test]
    async fn test_sorted_across_roots() {
        let fs = MemoryFileSystem::new()
            .with_dir("/a", &["zebra.mp3", "Mango.pdf"])
            .with_dir("/b", &["apple.epub"]);
        let scanner = FolderScanner::new(fs);

        let books = scanner.scan_library(&roots(&["/a", "/b"])).await;
        let titles: Vec<&str> = books.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["apple", "Mango", "zebra"]);
    }

    #[tokio::test]
    async fn test_empty_roots_skip_listing() {
        let scanner = FolderScanner::new(MemoryFileSystem::new());
        assert!(scanner.scan_library(&[]).await.is_empty());
        assert_eq!(scanner.filesystem().list_calls(), 0);
    }

    #[tokio::test]
    async fn test_random_ids_change_between_scans() {
        let fs = MemoryFileSystem::new().with_dir("/media", &["book1.mp3"]);
        let scanner = FolderScanner::new(fs);

        let first = scanner.scan_library(&roots(&["/media"])).await;
        let second = scanner.scan_library(&roots(&["/media"])).await;
        assert_ne!(first[0].id, second[0].id);
        assert_ne!(first[0].id, first[0].tracks[0].id);
    }

    #[tokio::test]
    async fn test_path_derived_ids_are_stable() {
        let fs = MemoryFileSystem::new().with_dir("/media", &["book1.mp3", "book2.mp3"]);
        let scanner = FolderScanner::new(fs).with_identity(IdentityStrategy::PathDerived);

        let first = scanner.scan_library(&roots(&["/media"])).await;
        let second = scanner.scan_library(&roots(&["/media"])).await;
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].tracks[0].id, second[0].tracks[0].id);
        assert_ne!(first[0].id, first[1].id);
        assert_ne!(first[0].id, first[0].tracks[0].id);
    }

    #[tokio::test]
    async fn test_tags_fill_author_and_duration() {
        let fs = MemoryFileSystem::new()
            .with_dir("/media", &["saga.m4b", "story.epub"])
            .with_tags(
                "/media/saga.m4b",
                MediaTags {
                    author: Some("Ursula".to_string()),
                    duration: Some(3600.0),
                },
            );
        let scanner = FolderScanner::new(fs);

        let books = scanner.scan_library(&roots(&["/media"])).await;
        assert_eq!(books[0].author.as_deref(), Some("Ursula"));
        assert_eq!(books[0].tracks[0].duration, Some(3600.0));
        assert_eq!(books[0].title, "saga");
        assert!(books[1].author.is_none());
    }
}
