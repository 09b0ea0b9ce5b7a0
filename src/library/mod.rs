// Library - what's on the shelf
// Folder scanning, the book/bookmark model and the repository that ties them to storage

pub mod filesystem; // listing seam: local disk or in-memory
pub mod repository; // scan + bookmarks -> snapshot
pub mod scanner;    // extension-based classification
pub mod types;      // books, chapters, bookmarks, settings

pub use filesystem::{DirEntry, FileSystem, LocalFileSystem, MediaTags, MemoryFileSystem, ScanError, SharedFileSystem};
pub use repository::LibraryRepository;
pub use scanner::{FolderScanner, IdentityStrategy, PlatformFamily};
pub use types::{
    format_time, upsert_bookmark, Book, Bookmark, Chapter, LibrarySettings, LibrarySnapshot, MediaType,
    ThemePreference,
};
