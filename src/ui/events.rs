use super::navigation::Screen;
use crate::picker::PickOutcome;
use crate::playback::PlaybackState;
use crate::reader::ReaderState;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;

/// What a key press means on the current screen.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Quit,
    Back,
    Up,
    Down,
    Enter,

    // Library
    Refresh,
    OpenSettings,
    StartFilter,

    // Book / player
    TogglePlayback,
    AddBookmark,

    // Reader
    CycleReaderTheme,
    FontLarger,
    FontSmaller,

    // Settings
    PickFolder,
    StartPathEntry,
    RemoveRoot,
    ToggleAutoScan,
    ToggleTheme,

    // Text entry (filter, path)
    Input(char),
    Erase,
    Submit,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Text,
}

/// Results coming back from background tasks.
#[derive(Debug, Clone)]
pub enum AppMessage {
    Status(String),
    Progress { position: f64, duration: f64 },
    Playback(PlaybackState),
    ReaderReady { book_id: String, state: ReaderState },
    Picked(PickOutcome),
    PickFailed(String),
}

pub struct EventHandler {
    sender: mpsc::UnboundedSender<AppMessage>,
    receiver: mpsc::UnboundedReceiver<AppMessage>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AppMessage> {
        self.sender.clone()
    }

    pub fn try_next(&mut self) -> Option<AppMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

pub fn key_to_event(key: KeyEvent, mode: InputMode, screen: &Screen) -> Option<AppEvent> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(AppEvent::Quit);
    }

    if mode == InputMode::Text {
        return match key.code {
            KeyCode::Esc => Some(AppEvent::Cancel),
            KeyCode::Enter => Some(AppEvent::Submit),
            KeyCode::Backspace => Some(AppEvent::Erase),
            KeyCode::Up => Some(AppEvent::Up),
            KeyCode::Down => Some(AppEvent::Down),
            KeyCode::Char(c) if !c.is_control() => Some(AppEvent::Input(c)),
            _ => None,
        };
    }

    // shared keys
    match key.code {
        KeyCode::Char('q') => return Some(AppEvent::Quit),
        KeyCode::Esc | KeyCode::Backspace | KeyCode::Left => return Some(AppEvent::Back),
        KeyCode::Up | KeyCode::Char('k') => return Some(AppEvent::Up),
        KeyCode::Down | KeyCode::Char('j') => return Some(AppEvent::Down),
        KeyCode::Enter | KeyCode::Right => return Some(AppEvent::Enter),
        _ => {}
    }

    match (screen, key.code) {
        (Screen::Library, KeyCode::Char('r')) | (Screen::Library, KeyCode::F(5)) => Some(AppEvent::Refresh),
        (Screen::Library, KeyCode::Char('/')) => Some(AppEvent::StartFilter),
        (Screen::Library | Screen::BookDetail { .. }, KeyCode::Char('s')) => Some(AppEvent::OpenSettings),

        (Screen::BookDetail { .. } | Screen::AudioPlayer { .. }, KeyCode::Char('b')) => Some(AppEvent::AddBookmark),
        (Screen::AudioPlayer { .. }, KeyCode::Char(' ')) => Some(AppEvent::TogglePlayback),

        (Screen::Reader { .. }, KeyCode::Char('t')) => Some(AppEvent::CycleReaderTheme),
        (Screen::Reader { .. }, KeyCode::Char('+') | KeyCode::Char('=')) => Some(AppEvent::FontLarger),
        (Screen::Reader { .. }, KeyCode::Char('-')) => Some(AppEvent::FontSmaller),

        (Screen::Settings, KeyCode::Char('a')) => Some(AppEvent::PickFolder),
        (Screen::Settings, KeyCode::Char('p')) => Some(AppEvent::StartPathEntry),
        (Screen::Settings, KeyCode::Char('d') | KeyCode::Delete) => Some(AppEvent::RemoveRoot),
        (Screen::Settings, KeyCode::Char('u')) => Some(AppEvent::ToggleAutoScan),
        (Screen::Settings, KeyCode::Char('t')) => Some(AppEvent::ToggleTheme),

        _ => None,
    }
}
