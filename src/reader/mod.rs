// Ebook reader state - location, theme and font scale per book
// Persisted under one key per book path so a rescan (new ids) keeps the reading position

use crate::library::Book;
use crate::storage::{PersistentStore, SharedStore, StorageError, READER_STATE_PREFIX};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const MIN_FONT_SCALE: f32 = 0.8;
pub const MAX_FONT_SCALE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReaderTheme {
    #[default]
    Light,
    Sepia,
    Dark,
}

/// Background and text colour as RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: (u8, u8, u8),
    pub text: (u8, u8, u8),
}

impl ReaderTheme {
    pub fn next(self) -> Self {
        match self {
            ReaderTheme::Light => ReaderTheme::Sepia,
            ReaderTheme::Sepia => ReaderTheme::Dark,
            ReaderTheme::Dark => ReaderTheme::Light,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReaderTheme::Light => "light",
            ReaderTheme::Sepia => "sepia",
            ReaderTheme::Dark => "dark",
        }
    }

    pub fn palette(&self) -> Palette {
        match self {
            ReaderTheme::Dark => Palette {
                background: (0x11, 0x11, 0x11),
                text: (0xf0, 0xf0, 0xf0),
            },
            ReaderTheme::Sepia => Palette {
                background: (0xf5, 0xec, 0xd9),
                text: (0x4a, 0x3d, 0x2f),
            },
            ReaderTheme::Light => Palette {
                background: (0xff, 0xff, 0xff),
                text: (0x11, 0x11, 0x11),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderState {
    pub location: String,
    #[serde(default)]
    pub theme: ReaderTheme,
    #[serde(default = "default_font_scale")]
    pub font_scale: f32,
}

fn default_font_scale() -> f32 {
    1.0
}

impl ReaderState {
    pub fn starting_at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            theme: ReaderTheme::default(),
            font_scale: default_font_scale(),
        }
    }

    pub fn cycle_theme(&mut self) {
        self.theme = self.theme.next();
    }

    pub fn adjust_font(&mut self, delta: f32) {
        self.font_scale = (self.font_scale + delta).clamp(MIN_FONT_SCALE, MAX_FONT_SCALE);
    }
}

fn state_key(book: &Book) -> String {
    format!("{}{}", READER_STATE_PREFIX, book.path)
}

pub struct ReaderService {
    store: PersistentStore<SharedStore>,
}

impl ReaderService {
    pub fn new(store: PersistentStore<SharedStore>) -> Self {
        Self { store }
    }

    pub async fn load_state(&self, book: &Book) -> Result<Option<ReaderState>, StorageError> {
        self.store.read_json(&state_key(book)).await
    }

    /// Where to open `book`: the explicit `location` if given, else the saved state,
    /// else the first chapter. An unreadable saved state is logged and ignored.
    pub async fn initial_state(&self, book: &Book, location: Option<&str>) -> ReaderState {
        let fallback = book
            .first_chapter()
            .map(|c| c.path.clone())
            .unwrap_or_else(|| book.path.clone());

        let mut state = match self.load_state(book).await {
            Ok(Some(saved)) => {
                debug!(book = %book.id, location = %saved.location, "Restored reader state");
                saved
            }
            Ok(None) => ReaderState::starting_at(fallback),
            Err(e) => {
                warn!(error = %e, book = %book.id, "Could not read saved reader state");
                ReaderState::starting_at(fallback)
            }
        };

        if let Some(location) = location.filter(|l| !l.is_empty()) {
            state.location = location.to_string();
        }
        state.font_scale = state.font_scale.clamp(MIN_FONT_SCALE, MAX_FONT_SCALE);
        state
    }

    pub async fn save_state(&self, book: &Book, state: &ReaderState) -> Result<(), StorageError> {
        self.store.write_json(&state_key(book), state).await
    }
}
