// shelfplay - audiobook and ebook shelf for the terminal
// Library scanning and storage are always built; the UI and audio output sit behind features

pub mod config;    // config.toml
pub mod library;   // scanning, data model, repository
pub mod logging;   // tracing setup
pub mod picker;    // folder chooser
pub mod playback;  // player queue control
pub mod reader;    // per-book reader state
pub mod state;     // shared app state
pub mod storage;   // persisted settings and bookmarks
#[cfg(feature = "tui")]
pub mod ui;        // terminal interface

pub use config::Config;
pub use library::{Book, Bookmark, Chapter, LibraryRepository, LibrarySettings, MediaType};
pub use playback::{PlaybackService, TrackPlayer};
pub use state::LibraryState;
pub use storage::{KeyValueStore, PersistentStore, SqliteStore};
