use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Ebook,
}

impl MediaType {
    pub fn label(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Ebook => "ebook",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>, // seconds
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub path: String,
    pub tracks: Vec<Chapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl Book {
    pub fn first_chapter(&self) -> Option<&Chapter> {
        self.tracks.first()
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.tracks.iter().find(|chapter| chapter.id == chapter_id)
    }

    pub fn display_author(&self) -> &str {
        self.author.as_deref().unwrap_or("Unknown Author")
    }

    /// Sum of known chapter durations, `None` when no chapter has one.
    pub fn total_duration(&self) -> Option<f64> {
        let known: Vec<f64> = self.tracks.iter().filter_map(|c| c.duration).collect();
        if known.is_empty() {
            None
        } else {
            Some(known.iter().sum())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub book_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    pub position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(book_id: impl Into<String>, chapter_id: Option<String>, position: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            book_id: book_id.into(),
            chapter_id,
            position,
            note: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Replace the entry with the same id in its original slot, or append.
pub fn upsert_bookmark(bookmarks: &mut Vec<Bookmark>, bookmark: Bookmark) {
    match bookmarks.iter_mut().find(|item| item.id == bookmark.id) {
        Some(existing) => *existing = bookmark,
        None => bookmarks.push(bookmark),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    System,
    Light,
    Dark,
}

impl ThemePreference {
    pub fn label(&self) -> &'static str {
        match self {
            ThemePreference::System => "system",
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySettings {
    pub root_uris: Vec<String>,
    #[serde(default)]
    pub theme: ThemePreference,
    #[serde(default = "default_auto_scan")]
    pub auto_scan_on_launch: bool,
}

fn default_auto_scan() -> bool {
    true
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            root_uris: Vec::new(),
            theme: ThemePreference::System,
            auto_scan_on_launch: true,
        }
    }
}

impl LibrarySettings {
    /// Adds a root keeping insertion order; blank or already-known roots are ignored.
    pub fn with_root(mut self, uri: &str) -> Self {
        let uri = uri.trim();
        if !uri.is_empty() && !self.root_uris.iter().any(|existing| existing == uri) {
            self.root_uris.push(uri.to_string());
        }
        self
    }

    pub fn without_root(mut self, uri: &str) -> Self {
        self.root_uris.retain(|existing| existing != uri.trim());
        self
    }

    /// Dark flips to light, anything else (system included) flips to dark.
    pub fn toggled_theme(mut self) -> Self {
        self.theme = match self.theme {
            ThemePreference::Dark => ThemePreference::Light,
            _ => ThemePreference::Dark,
        };
        self
    }

    pub fn toggled_auto_scan(mut self) -> Self {
        self.auto_scan_on_launch = !self.auto_scan_on_launch;
        self
    }

    pub fn should_auto_scan(&self) -> bool {
        self.auto_scan_on_launch && !self.root_uris.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub books: Vec<Book>,
    pub bookmarks: Vec<Bookmark>,
}

/// `m:ss`, with non-finite or negative input shown as `0:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
