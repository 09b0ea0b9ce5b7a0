use super::events::{key_to_event, AppEvent, AppMessage, EventHandler, InputMode};
use super::navigation::{Navigator, Screen};
use super::TerminalManager;
use crate::library::{format_time, Book, Bookmark, MediaType, ThemePreference};
use crate::picker::{FolderPicker, PickOutcome};
use crate::playback::{PlaybackService, PlaybackState, ProgressSubscription, SharedPlayer};
use crate::reader::{ReaderService, ReaderState};
use crate::state::LibraryState;
use anyhow::Result;
use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use fuzzy_matcher::{clangd::ClangdMatcher, FuzzyMatcher};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const STATUS_TTL: Duration = Duration::from_secs(3);

/// Everything the screens talk to.
#[derive(Clone)]
pub struct Services {
    pub library: LibraryState,
    pub playback: Arc<PlaybackService<SharedPlayer>>,
    pub reader: Arc<ReaderService>,
    pub picker: Arc<dyn FolderPicker>,
}

struct PlayerView {
    book_id: Option<String>,
    position: f64,
    duration: f64,
    state: PlaybackState,
    subscription: Option<ProgressSubscription>,
}

impl Default for PlayerView {
    fn default() -> Self {
        Self {
            book_id: None,
            position: 0.0,
            duration: 0.0,
            state: PlaybackState::Stopped,
            subscription: None,
        }
    }
}

struct ReaderView {
    book_id: String,
    state: ReaderState,
}

pub struct App {
    services: Services,
    events: EventHandler,
    nav: Navigator,
    tick_rate: Duration,
    library_rx: watch::Receiver<u64>,

    books: Vec<Book>,
    matcher: ClangdMatcher,
    filter: String,
    filtering: bool,
    visible: Vec<usize>,

    library_list: ListState,
    chapter_list: ListState,
    settings_list: ListState,
    player: PlayerView,
    reader: Option<ReaderView>,
    path_input: Option<String>,
    alert: Option<String>,
    status: Option<(String, Instant)>,
    should_quit: bool,
}

/// Indices into `books` matching `query`, best match first. An empty query keeps everything in order.
pub fn filter_books(matcher: &ClangdMatcher, books: &[Book], query: &str) -> Vec<usize> {
    let query = query.trim();
    if query.is_empty() {
        return (0..books.len()).collect();
    }

    let mut scored: Vec<(usize, i64)> = books
        .iter()
        .enumerate()
        .filter_map(|(idx, book)| {
            let by_title = matcher.fuzzy_match(&book.title, query);
            let by_author = book.author.as_deref().and_then(|a| matcher.fuzzy_match(a, query));
            by_title.max(by_author).map(|score| (idx, score))
        })
        .collect();

    // stable, so equal scores keep library order
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(idx, _)| idx).collect()
}

fn move_selection(list: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        list.select(None);
        return;
    }
    let current = list.selected().unwrap_or(0) as isize;
    let next = (current + delta).clamp(0, len as isize - 1);
    list.select(Some(next as usize));
}

impl App {
    pub fn new(services: Services, tick_rate: Duration) -> Self {
        let library_rx = services.library.subscribe_library();
        let mut app = Self {
            services,
            events: EventHandler::new(),
            nav: Navigator::new(),
            tick_rate,
            library_rx,
            books: Vec::new(),
            matcher: ClangdMatcher::default(),
            filter: String::new(),
            filtering: false,
            visible: Vec::new(),
            library_list: ListState::default(),
            chapter_list: ListState::default(),
            settings_list: ListState::default(),
            player: PlayerView::default(),
            reader: None,
            path_input: None,
            alert: None,
            status: None,
            should_quit: false,
        };
        app.reload_books();
        app
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut terminal = TerminalManager::new()?;
        info!("Terminal UI started");

        while !self.should_quit {
            self.tick();
            terminal.draw(|f| self.draw(f))?;

            if event::poll(self.tick_rate)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key);
                    }
                }
            }
            // let background tasks make progress between frames
            tokio::task::yield_now().await;
        }

        info!("Terminal UI closed");
        Ok(())
    }

    pub fn screen(&self) -> &Screen {
        self.nav.current()
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    fn input_mode(&self) -> InputMode {
        if self.filtering || self.path_input.is_some() {
            InputMode::Text
        } else {
            InputMode::Normal
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if let Some(event) = key_to_event(key, self.input_mode(), self.nav.current()) {
            self.handle_event(event);
        }
    }

    /// Applies background results and picks up library changes.
    pub fn tick(&mut self) {
        while let Some(message) = self.events.try_next() {
            self.apply_message(message);
        }
        if matches!(self.library_rx.has_changed(), Ok(true)) {
            self.library_rx.borrow_and_update();
            self.reload_books();
        }
    }

    fn reload_books(&mut self) {
        self.books = self.services.library.books();
        self.refilter();
    }

    fn refilter(&mut self) {
        self.visible = filter_books(&self.matcher, &self.books, &self.filter);
        let selected = self.library_list.selected().unwrap_or(0);
        if self.visible.is_empty() {
            self.library_list.select(None);
        } else {
            self.library_list.select(Some(selected.min(self.visible.len() - 1)));
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some((message.into(), Instant::now()));
    }

    fn selected_book(&self) -> Option<&Book> {
        let idx = *self.visible.get(self.library_list.selected()?)?;
        self.books.get(idx)
    }

    fn find_book(&self, book_id: &str) -> Option<&Book> {
        self.books.iter().find(|b| b.id == book_id)
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        if event == AppEvent::Quit {
            self.should_quit = true;
            return;
        }

        match self.nav.current().clone() {
            Screen::Library => self.on_library(event),
            Screen::BookDetail { book_id } => self.on_book_detail(&book_id, event),
            Screen::AudioPlayer { book_id, chapter_id } => self.on_player(&book_id, chapter_id, event),
            Screen::Reader { book_id, .. } => self.on_reader(&book_id, event),
            Screen::Settings => self.on_settings(event),
        }
    }

    fn go_back(&mut self) {
        match self.nav.back() {
            Some(Screen::AudioPlayer { .. }) => {
                // playback keeps going, the screen just stops listening
                self.player.subscription = None;
            }
            Some(Screen::Reader { .. }) => self.reader = None,
            Some(Screen::Settings) => {
                self.path_input = None;
                self.alert = None;
            }
            _ => {}
        }
    }

    fn on_library(&mut self, event: AppEvent) {
        if self.filtering {
            match event {
                AppEvent::Input(c) => {
                    self.filter.push(c);
                    self.refilter();
                }
                AppEvent::Erase => {
                    self.filter.pop();
                    self.refilter();
                }
                AppEvent::Submit => self.filtering = false,
                AppEvent::Cancel => {
                    self.filtering = false;
                    self.filter.clear();
                    self.refilter();
                }
                AppEvent::Up => move_selection(&mut self.library_list, self.visible.len(), -1),
                AppEvent::Down => move_selection(&mut self.library_list, self.visible.len(), 1),
                _ => {}
            }
            return;
        }

        match event {
            AppEvent::Up => move_selection(&mut self.library_list, self.visible.len(), -1),
            AppEvent::Down => move_selection(&mut self.library_list, self.visible.len(), 1),
            AppEvent::Enter => {
                if let Some(book_id) = self.selected_book().map(|b| b.id.clone()) {
                    self.services.library.mark_opened(&book_id);
                    self.chapter_list.select(Some(0));
                    self.nav.push(Screen::BookDetail { book_id });
                }
            }
            AppEvent::Refresh => self.start_refresh(),
            AppEvent::StartFilter => self.filtering = true,
            AppEvent::OpenSettings => self.nav.push(Screen::Settings),
            AppEvent::Back if !self.filter.is_empty() => {
                self.filter.clear();
                self.refilter();
            }
            AppEvent::Back => self.go_back(),
            _ => {}
        }
    }

    fn on_book_detail(&mut self, book_id: &str, event: AppEvent) {
        let book = match self.find_book(book_id) {
            Some(book) => book.clone(),
            None => {
                if event == AppEvent::Back {
                    self.go_back();
                }
                return;
            }
        };

        match event {
            AppEvent::Up => move_selection(&mut self.chapter_list, book.tracks.len(), -1),
            AppEvent::Down => move_selection(&mut self.chapter_list, book.tracks.len(), 1),
            AppEvent::Enter => {
                let chapter = self.chapter_list.selected().and_then(|i| book.tracks.get(i));
                let screen = match book.media_type {
                    MediaType::Audio => Screen::AudioPlayer {
                        book_id: book.id.clone(),
                        chapter_id: chapter.map(|c| c.id.clone()),
                    },
                    MediaType::Ebook => Screen::Reader {
                        book_id: book.id.clone(),
                        location: chapter.map(|c| c.path.clone()),
                    },
                };
                self.open(screen, &book);
            }
            AppEvent::AddBookmark => {
                let chapter_id = self
                    .chapter_list
                    .selected()
                    .and_then(|i| book.tracks.get(i))
                    .map(|c| c.id.clone());
                self.add_bookmark(&book.id, chapter_id);
            }
            AppEvent::OpenSettings => self.nav.push(Screen::Settings),
            AppEvent::Back => self.go_back(),
            _ => {}
        }
    }

    fn on_player(&mut self, book_id: &str, chapter_id: Option<String>, event: AppEvent) {
        match event {
            AppEvent::TogglePlayback => {
                let playback = Arc::clone(&self.services.playback);
                let tx = self.events.sender();
                tokio::spawn(async move {
                    let message = match playback.toggle_playback().await {
                        Ok(state) => AppMessage::Playback(state),
                        Err(e) => {
                            warn!(error = %e, "Toggle playback failed");
                            AppMessage::Status(format!("Playback error: {}", e))
                        }
                    };
                    let _ = tx.send(message);
                });
            }
            AppEvent::AddBookmark => self.add_bookmark(book_id, chapter_id),
            AppEvent::Back => self.go_back(),
            _ => {}
        }
    }

    fn on_reader(&mut self, book_id: &str, event: AppEvent) {
        let changed = match (&mut self.reader, &event) {
            (Some(view), AppEvent::CycleReaderTheme) => {
                view.state.cycle_theme();
                true
            }
            (Some(view), AppEvent::FontLarger) => {
                view.state.adjust_font(0.1);
                true
            }
            (Some(view), AppEvent::FontSmaller) => {
                view.state.adjust_font(-0.1);
                true
            }
            _ => false,
        };

        if changed {
            self.save_reader_state(book_id);
        } else if event == AppEvent::Back {
            self.go_back();
        }
    }

    fn on_settings(&mut self, event: AppEvent) {
        if let Some(input) = self.path_input.as_mut() {
            match event {
                AppEvent::Input(c) => input.push(c),
                AppEvent::Erase => {
                    input.pop();
                }
                AppEvent::Submit => {
                    let path = input.trim().to_string();
                    self.path_input = None;
                    if !path.is_empty() {
                        self.add_root(&path);
                    }
                }
                AppEvent::Cancel => self.path_input = None,
                _ => {}
            }
            return;
        }

        let roots = self.services.library.settings().root_uris;
        match event {
            AppEvent::Up => move_selection(&mut self.settings_list, roots.len(), -1),
            AppEvent::Down => move_selection(&mut self.settings_list, roots.len(), 1),
            AppEvent::PickFolder => self.start_pick(),
            AppEvent::StartPathEntry => {
                self.alert = None;
                self.path_input = Some(String::new());
            }
            AppEvent::RemoveRoot => {
                if let Some(root) = self.settings_list.selected().and_then(|i| roots.get(i)).cloned() {
                    let _ = self.services.library.update_settings(move |s| s.without_root(&root));
                    move_selection(&mut self.settings_list, roots.len().saturating_sub(1), 0);
                }
            }
            AppEvent::ToggleAutoScan => {
                let _ = self.services.library.update_settings(|s| s.toggled_auto_scan());
            }
            AppEvent::ToggleTheme => {
                let _ = self.services.library.update_settings(|s| s.toggled_theme());
            }
            AppEvent::Back => self.go_back(),
            _ => {}
        }
    }

    /// Pushes `screen` and starts whatever it needs in the background.
    fn open(&mut self, screen: Screen, book: &Book) {
        match &screen {
            Screen::AudioPlayer { chapter_id, .. } => self.start_playback(book, chapter_id.clone()),
            Screen::Reader { location, .. } => self.start_reader(book, location.clone()),
            _ => {}
        }
        self.nav.push(screen);
    }

    fn start_refresh(&mut self) {
        if self.services.library.is_scanning() {
            debug!("Refresh requested while another is running, the newest result wins");
        }
        let library = self.services.library.clone();
        let tx = self.events.sender();
        tokio::spawn(async move {
            if let Err(e) = library.refresh_library().await {
                warn!(error = %e, "Library refresh failed");
                let _ = tx.send(AppMessage::Status(format!("Refresh failed: {}", e)));
            }
        });
    }

    fn start_playback(&mut self, book: &Book, chapter_id: Option<String>) {
        let tx = self.events.sender();
        let subscription = self
            .services
            .playback
            .add_progress_listener(move |position, duration| {
                let _ = tx.send(AppMessage::Progress { position, duration });
            });

        self.player = PlayerView {
            book_id: Some(book.id.clone()),
            subscription: Some(subscription),
            ..PlayerView::default()
        };

        let initial = chapter_id.or_else(|| book.first_chapter().map(|c| c.id.clone()));
        let playback = Arc::clone(&self.services.playback);
        let book = book.clone();
        let tx = self.events.sender();
        tokio::spawn(async move {
            let started = async {
                playback.load_book(&book).await?;
                playback.play_chapter(initial.as_deref()).await
            };
            let message = match started.await {
                Ok(()) => AppMessage::Playback(PlaybackState::Playing),
                Err(e) => {
                    warn!(error = %e, book = %book.id, "Could not start playback");
                    AppMessage::Status(format!("Playback error: {}", e))
                }
            };
            let _ = tx.send(message);
        });
    }

    fn start_reader(&mut self, book: &Book, location: Option<String>) {
        self.reader = None;
        let reader = Arc::clone(&self.services.reader);
        let book = book.clone();
        let tx = self.events.sender();
        tokio::spawn(async move {
            let state = reader.initial_state(&book, location.as_deref()).await;
            let _ = tx.send(AppMessage::ReaderReady {
                book_id: book.id.clone(),
                state,
            });
        });
    }

    fn save_reader_state(&mut self, book_id: &str) {
        let (Some(view), Some(book)) = (&self.reader, self.find_book(book_id)) else {
            return;
        };
        let reader = Arc::clone(&self.services.reader);
        let book = book.clone();
        let state = view.state.clone();
        let tx = self.events.sender();
        tokio::spawn(async move {
            if let Err(e) = reader.save_state(&book, &state).await {
                warn!(error = %e, "Could not save reader state");
                let _ = tx.send(AppMessage::Status("Reader settings not saved".to_string()));
            }
        });
    }

    fn add_bookmark(&mut self, book_id: &str, chapter_id: Option<String>) {
        let position = if self.player.book_id.as_deref() == Some(book_id) {
            self.player.position
        } else {
            0.0
        };
        let bookmark = Bookmark::new(book_id, chapter_id, position);
        let library = self.services.library.clone();
        let tx = self.events.sender();
        tokio::spawn(async move {
            let message = match library.save_bookmark(bookmark).await {
                Ok(()) => format!("Bookmark saved at {}", format_time(position)),
                Err(e) => {
                    warn!(error = %e, "Bookmark save failed");
                    "Could not save bookmark".to_string()
                }
            };
            let _ = tx.send(AppMessage::Status(message));
        });
    }

    fn add_root(&mut self, uri: &str) {
        let uri = uri.to_string();
        let _ = self.services.library.update_settings(move |s| s.with_root(&uri));
    }

    fn start_pick(&mut self) {
        self.alert = None;
        let picker = Arc::clone(&self.services.picker);
        let tx = self.events.sender();
        tokio::spawn(async move {
            let message = match picker.pick_directory().await {
                Ok(outcome) => AppMessage::Picked(outcome),
                Err(e) => AppMessage::PickFailed(e.to_string()),
            };
            let _ = tx.send(message);
        });
    }

    fn apply_message(&mut self, message: AppMessage) {
        match message {
            AppMessage::Status(text) => self.set_status(text),
            AppMessage::Progress { position, duration } => {
                self.player.position = position;
                self.player.duration = duration;
                if let (Some(book_id), true) = (&self.player.book_id, duration > 0.0) {
                    self.services.library.set_progress(book_id, position / duration);
                }
            }
            AppMessage::Playback(state) => self.player.state = state,
            AppMessage::ReaderReady { book_id, state } => {
                let wanted = matches!(self.nav.current(), Screen::Reader { book_id: current, .. } if *current == book_id);
                if wanted {
                    self.reader = Some(ReaderView { book_id, state });
                }
            }
            AppMessage::Picked(PickOutcome::Picked(uri)) => {
                self.add_root(&uri);
                self.set_status(format!("Added {}", uri));
            }
            AppMessage::Picked(outcome) => debug!(?outcome, "Folder pick ended without a folder"),
            AppMessage::PickFailed(reason) => {
                warn!(%reason, "Folder picker failed");
                self.alert = Some("Could not select the folder.".to_string());
            }
        }
    }

    // ----- rendering -----

    fn base_style(&self) -> Style {
        match self.services.library.settings().theme {
            ThemePreference::Dark => Style::default().fg(Color::White).bg(Color::Black),
            ThemePreference::Light => Style::default().fg(Color::Black).bg(Color::White),
            ThemePreference::System => Style::default(),
        }
    }

    pub fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // header
                Constraint::Min(6),    // screen
                Constraint::Length(3), // status
            ])
            .split(f.area());

        let base = self.base_style();
        self.render_header(f, chunks[0], base);

        match self.nav.current().clone() {
            Screen::Library => self.render_library(f, chunks[1], base),
            Screen::BookDetail { book_id } => self.render_book_detail(f, chunks[1], base, &book_id),
            Screen::AudioPlayer { book_id, chapter_id } => {
                self.render_player(f, chunks[1], base, &book_id, chapter_id.as_deref())
            }
            Screen::Reader { book_id, .. } => self.render_reader(f, chunks[1], base, &book_id),
            Screen::Settings => self.render_settings(f, chunks[1], base),
        }

        self.render_status_bar(f, chunks[2], base);
    }

    fn render_header(&self, f: &mut Frame, area: Rect, base: Style) {
        let mut spans = vec![Span::styled(
            self.nav.breadcrumb(),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )];
        if self.services.library.is_scanning() {
            spans.push(Span::raw("   "));
            spans.push(Span::styled("Scanning...", Style::default().fg(Color::Cyan)));
        }

        let header = Paragraph::new(Line::from(spans))
            .style(base)
            .block(Block::default().borders(Borders::ALL).title("shelfplay"));
        f.render_widget(header, area);
    }

    fn render_library(&mut self, f: &mut Frame, area: Rect, base: Style) {
        let show_filter = self.filtering || !self.filter.is_empty();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(if show_filter {
                [Constraint::Length(3), Constraint::Min(3)]
            } else {
                [Constraint::Length(0), Constraint::Min(3)]
            })
            .split(area);

        if show_filter {
            let cursor = if self.filtering { "_" } else { "" };
            let filter = Paragraph::new(format!("/{}{}  ({} matches)", self.filter, cursor, self.visible.len()))
                .style(base)
                .block(Block::default().borders(Borders::ALL).title("Filter"));
            f.render_widget(filter, chunks[0]);
        }

        let block = Block::default().borders(Borders::ALL).title(format!("Books ({})", self.books.len()));

        if self.books.is_empty() {
            let hint = if self.services.library.is_scanning() {
                "Scanning your folders..."
            } else if self.services.library.settings().root_uris.is_empty() {
                "No library folders yet. Press s to add one."
            } else {
                "No books found. Press r to rescan."
            };
            let empty = Paragraph::new(hint).style(base).block(block).wrap(Wrap { trim: true });
            f.render_widget(empty, chunks[1]);
            return;
        }

        let items: Vec<ListItem> = self
            .visible
            .iter()
            .filter_map(|&idx| self.books.get(idx))
            .map(|book| {
                let mut spans = vec![Span::styled(book.title.clone(), Style::default().add_modifier(Modifier::BOLD))];
                if let Some(author) = &book.author {
                    spans.push(Span::raw(format!("  {}", author)));
                }
                spans.push(Span::styled(
                    format!("  [{}]", book.media_type.label()),
                    Style::default().fg(Color::DarkGray),
                ));
                if let Some(progress) = book.progress {
                    spans.push(Span::raw(format!("  {:.0}%", progress * 100.0)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let list = List::new(items)
            .style(base)
            .block(block)
            .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
        f.render_stateful_widget(list, chunks[1], &mut self.library_list);
    }

    fn render_missing(f: &mut Frame, area: Rect, base: Style) {
        let missing = Paragraph::new("Book not found.")
            .style(base)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(missing, area);
    }

    fn render_book_detail(&mut self, f: &mut Frame, area: Rect, base: Style, book_id: &str) {
        let Some(book) = self.find_book(book_id).cloned() else {
            Self::render_missing(f, area, base);
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(8), Constraint::Min(3)])
            .split(area);

        let bookmarks = self.services.library.bookmarks_for(&book.id).len();
        let mut lines = vec![
            Line::from(Span::styled(book.title.clone(), Style::default().add_modifier(Modifier::BOLD))),
            Line::from(book.display_author().to_string()),
        ];
        let mut facts = vec![book.media_type.label().to_string()];
        if let Some(total) = book.total_duration() {
            facts.push(format_time(total));
        }
        facts.push(format!("{} bookmark(s)", bookmarks));
        lines.push(Line::from(facts.join("  |  ")));
        if let Some(description) = &book.description {
            lines.push(Line::from(""));
            lines.push(Line::from(description.clone()));
        }

        let action = match book.media_type {
            MediaType::Audio => "Enter: listen",
            MediaType::Ebook => "Enter: read",
        };
        let details = Paragraph::new(lines)
            .style(base)
            .block(Block::default().borders(Borders::ALL).title(action))
            .wrap(Wrap { trim: true });
        f.render_widget(details, chunks[0]);

        let items: Vec<ListItem> = book
            .tracks
            .iter()
            .enumerate()
            .map(|(i, chapter)| {
                let duration = chapter.duration.map(format_time).unwrap_or_default();
                ListItem::new(format!("{:>3}. {}  {}", i + 1, chapter.title, duration))
            })
            .collect();
        let chapters = List::new(items)
            .style(base)
            .block(Block::default().borders(Borders::ALL).title("Chapters"))
            .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
        f.render_stateful_widget(chapters, chunks[1], &mut self.chapter_list);
    }

    fn render_player(&self, f: &mut Frame, area: Rect, base: Style, book_id: &str, chapter_id: Option<&str>) {
        let Some(book) = self.find_book(book_id) else {
            Self::render_missing(f, area, base);
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(4), Constraint::Length(3), Constraint::Length(2)])
            .split(area);

        let chapter = chapter_id
            .and_then(|id| book.chapter(id))
            .or_else(|| book.first_chapter())
            .map(|c| c.title.clone())
            .unwrap_or_default();
        let mut lines = vec![Line::from(Span::styled(
            book.title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ))];
        if let Some(author) = &book.author {
            lines.push(Line::from(author.clone()));
        }
        lines.push(Line::from(Span::styled(chapter, Style::default().fg(Color::DarkGray))));
        let info = Paragraph::new(lines)
            .style(base)
            .alignment(ratatui::layout::Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(info, chunks[0]);

        let ratio = if self.player.duration > 0.0 {
            (self.player.position / self.player.duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let color = match self.player.state {
            PlaybackState::Playing => Color::Green,
            _ => Color::Yellow,
        };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL))
            .gauge_style(Style::default().fg(color))
            .ratio(ratio)
            .label(format!(
                "{} / {}",
                format_time(self.player.position),
                format_time(self.player.duration)
            ));
        f.render_widget(gauge, chunks[1]);

        let state = match self.player.state {
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Stopped => "Stopped",
        };
        let controls = Paragraph::new(format!("{}   space: play / pause   b: bookmark", state))
            .style(base)
            .alignment(ratatui::layout::Alignment::Center);
        f.render_widget(controls, chunks[2]);
    }

    fn render_reader(&self, f: &mut Frame, area: Rect, base: Style, book_id: &str) {
        let Some(book) = self.find_book(book_id) else {
            Self::render_missing(f, area, base);
            return;
        };

        let Some(view) = self.reader.as_ref().filter(|v| v.book_id == book.id) else {
            let loading = Paragraph::new("Opening...")
                .style(base)
                .block(Block::default().borders(Borders::ALL).title(book.title.clone()));
            f.render_widget(loading, area);
            return;
        };

        let palette = view.state.theme.palette();
        let (br, bg, bb) = palette.background;
        let (tr, tg, tb) = palette.text;
        let style = Style::default().bg(Color::Rgb(br, bg, bb)).fg(Color::Rgb(tr, tg, tb));

        let lines = vec![
            Line::from(Span::styled(book.title.clone(), Style::default().add_modifier(Modifier::BOLD))),
            Line::from(book.display_author().to_string()),
            Line::from(""),
            Line::from(format!("Location: {}", view.state.location)),
            Line::from(format!(
                "Theme: {}   Font: {:.1}x",
                view.state.theme.label(),
                view.state.font_scale
            )),
            Line::from(""),
            Line::from("t: theme   +/-: font size"),
        ];
        let page = Paragraph::new(lines)
            .style(style)
            .block(Block::default().borders(Borders::ALL).title("Reader"))
            .wrap(Wrap { trim: true });
        f.render_widget(page, area);
    }

    fn render_settings(&mut self, f: &mut Frame, area: Rect, base: Style) {
        let settings = self.services.library.settings();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(6)])
            .split(area);

        let roots = Block::default().borders(Borders::ALL).title("Library folders");
        if settings.root_uris.is_empty() {
            let empty = Paragraph::new("No folders yet. Press a to choose one or p to type a path.")
                .style(base)
                .block(roots);
            f.render_widget(empty, chunks[0]);
        } else {
            let items: Vec<ListItem> = settings.root_uris.iter().map(|uri| ListItem::new(uri.clone())).collect();
            let list = List::new(items)
                .style(base)
                .block(roots)
                .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
                .highlight_symbol("> ");
            f.render_stateful_widget(list, chunks[0], &mut self.settings_list);
        }

        let on_off = |flag: bool| if flag { "on" } else { "off" };
        let mut lines = vec![
            Line::from(format!("Auto-scan on launch: {} (u)", on_off(settings.auto_scan_on_launch))),
            Line::from(format!("Theme: {} (t)", settings.theme.label())),
        ];
        match &self.path_input {
            Some(input) => lines.push(Line::from(Span::styled(
                format!("Path: {}_", input),
                Style::default().fg(Color::Cyan),
            ))),
            None => lines.push(Line::from("a: choose folder   p: type path   d: remove")),
        }
        if let Some(alert) = &self.alert {
            lines.push(Line::from(Span::styled(alert.clone(), Style::default().fg(Color::Red))));
        }
        let options = Paragraph::new(lines)
            .style(base)
            .block(Block::default().borders(Borders::ALL).title("Options"));
        f.render_widget(options, chunks[1]);
    }

    fn render_status_bar(&self, f: &mut Frame, area: Rect, base: Style) {
        let text = match &self.status {
            Some((message, at)) if at.elapsed() < STATUS_TTL => message.clone(),
            _ => match self.nav.current() {
                Screen::Library => "Enter: open   /: filter   r: rescan   s: settings   q: quit".to_string(),
                _ => "Esc: back   q: quit".to_string(),
            },
        };
        let status = Paragraph::new(text)
            .style(base.fg(Color::Green))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(status, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{LibraryRepository, MemoryFileSystem};
    use crate::picker::{NoPicker, PickerError};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use crate::playback::{PlayerCommand, PlayerOptions, SilentPlayer};
    use crate::storage::{MemoryStore, PersistentStore, SharedStore};
    use ratatui::{backend::TestBackend, Terminal};

    struct Harness {
        app: App,
        player: Arc<SilentPlayer>,
        library: LibraryState,
    }

    /// Hands out queued outcomes, one per pick.
    struct ScriptedPicker {
        outcomes: Mutex<VecDeque<PickOutcome>>,
    }

    impl ScriptedPicker {
        fn new(outcomes: Vec<PickOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    impl FolderPicker for ScriptedPicker {
        fn pick_directory(&self) -> BoxFuture<'_, Result<PickOutcome, PickerError>> {
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PickOutcome::Cancelled);
            async move { Ok(next) }.boxed()
        }
    }

    fn harness(fs: MemoryFileSystem) -> Harness {
        harness_with_picker(fs, Arc::new(NoPicker))
    }

    fn harness_with_picker(fs: MemoryFileSystem, picker: Arc<dyn FolderPicker>) -> Harness {
        let kv: SharedStore = Arc::new(MemoryStore::new());
        let repo = LibraryRepository::from_parts(Arc::new(fs), kv.clone());
        let library = LibraryState::new(repo);
        let player = Arc::new(SilentPlayer::new());
        let shared: SharedPlayer = player.clone();

        let services = Services {
            library: library.clone(),
            playback: Arc::new(PlaybackService::new(shared, PlayerOptions::default())),
            reader: Arc::new(ReaderService::new(PersistentStore::new(kv))),
            picker,
        };
        Harness {
            app: App::new(services, Duration::from_millis(10)),
            player,
            library,
        }
    }

    async fn settle(app: &mut App) {
        tokio::time::sleep(Duration::from_millis(30)).await;
        app.tick();
    }

    fn screen_text(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    fn media() -> MemoryFileSystem {
        MemoryFileSystem::new().with_dir("/media", &["book1.mp3", "notes.txt", "story.epub"])
    }

    async fn loaded(fs: MemoryFileSystem) -> Harness {
        let mut h = harness(fs);
        h.library.update_settings(|s| s.with_root("/media")).await.unwrap();
        h.library.refresh_library().await.unwrap();
        h.app.tick();
        h
    }

    #[test]
    fn test_filter_prefers_matches() {
        let matcher = ClangdMatcher::default();
        let book = |title: &str| Book {
            id: title.to_string(),
            title: title.to_string(),
            author: None,
            description: None,
            cover: None,
            media_type: MediaType::Audio,
            path: format!("/media/{}.mp3", title),
            tracks: Vec::new(),
            last_opened_at: None,
            progress: None,
        };
        let books = vec![book("Alpha"), book("Saga of Ice"), book("Zebra")];

        assert_eq!(filter_books(&matcher, &books, ""), vec![0, 1, 2]);
        assert_eq!(filter_books(&matcher, &books, "sga"), vec![1]);
    }

    #[tokio::test]
    async fn test_empty_library_hints_at_settings() {
        let mut h = harness(MemoryFileSystem::new());
        assert!(screen_text(&mut h.app).contains("No library folders yet"));
    }

    #[tokio::test]
    async fn test_refresh_shows_books() {
        let mut h = loaded(media()).await;
        let text = screen_text(&mut h.app);
        assert!(text.contains("book1"));
        assert!(text.contains("story"));
        assert!(!text.contains("notes"));
    }

    #[tokio::test]
    async fn test_opening_audio_chapter_starts_playback() {
        let mut h = loaded(media()).await;
        h.app.handle_event(AppEvent::Enter);
        assert!(matches!(h.app.screen(), Screen::BookDetail { .. }));

        h.app.handle_event(AppEvent::Enter);
        assert!(matches!(h.app.screen(), Screen::AudioPlayer { chapter_id: Some(_), .. }));
        settle(&mut h.app).await;

        let commands = h.player.commands();
        assert_eq!(commands[0], PlayerCommand::Setup);
        assert!(matches!(commands.last(), Some(PlayerCommand::Play)));
        assert!(screen_text(&mut h.app).contains("Playing"));
    }

    #[tokio::test]
    async fn test_progress_updates_timer() {
        let mut h = loaded(media()).await;
        h.app.handle_event(AppEvent::Enter);
        h.app.handle_event(AppEvent::Enter);
        settle(&mut h.app).await;

        h.player.emit(65.0, 130.0);
        settle(&mut h.app).await;
        assert!(screen_text(&mut h.app).contains("1:05 / 2:10"));
    }

    #[tokio::test]
    async fn test_bookmark_from_player() {
        let mut h = loaded(media()).await;
        h.app.handle_event(AppEvent::Enter);
        h.app.handle_event(AppEvent::Enter);
        settle(&mut h.app).await;
        h.player.emit(42.0, 100.0);
        settle(&mut h.app).await;

        h.app.handle_event(AppEvent::AddBookmark);
        settle(&mut h.app).await;

        let bookmarks = h.library.bookmarks();
        assert_eq!(bookmarks.len(), 1);
        assert_eq!(bookmarks[0].position, 42.0);
    }

    #[tokio::test]
    async fn test_ebook_opens_reader() {
        let mut h = loaded(media()).await;
        h.app.handle_event(AppEvent::Down);
        h.app.handle_event(AppEvent::Enter);
        h.app.handle_event(AppEvent::Enter);
        assert!(matches!(h.app.screen(), Screen::Reader { .. }));

        settle(&mut h.app).await;
        h.app.handle_event(AppEvent::CycleReaderTheme);
        assert!(screen_text(&mut h.app).contains("Theme: sepia"));
    }

    #[tokio::test]
    async fn test_back_stops_at_library() {
        let mut h = loaded(media()).await;
        h.app.handle_event(AppEvent::OpenSettings);
        h.app.handle_event(AppEvent::Back);
        h.app.handle_event(AppEvent::Back);
        assert_eq!(h.app.screen(), &Screen::Library);
        assert!(!h.app.should_quit());
    }

    #[tokio::test]
    async fn test_manual_path_entry_adds_root() {
        let mut h = harness(MemoryFileSystem::new());
        h.app.handle_event(AppEvent::OpenSettings);
        h.app.handle_event(AppEvent::StartPathEntry);
        for c in "  /books ".chars() {
            h.app.handle_event(AppEvent::Input(c));
        }
        h.app.handle_event(AppEvent::Submit);

        assert_eq!(h.library.settings().root_uris, vec!["/books".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_path_entry_is_ignored() {
        let mut h = harness(MemoryFileSystem::new());
        h.app.handle_event(AppEvent::OpenSettings);
        h.app.handle_event(AppEvent::StartPathEntry);
        h.app.handle_event(AppEvent::Input(' '));
        h.app.handle_event(AppEvent::Submit);
        assert!(h.library.settings().root_uris.is_empty());
    }

    #[tokio::test]
    async fn test_picker_failure_shows_alert() {
        let mut h = harness(MemoryFileSystem::new());
        h.app.handle_event(AppEvent::OpenSettings);
        h.app.handle_event(AppEvent::PickFolder);
        settle(&mut h.app).await;
        assert!(screen_text(&mut h.app).contains("Could not select the folder."));
    }

    #[tokio::test]
    async fn test_cancelled_and_busy_picks_are_silent() {
        let picker = ScriptedPicker::new(vec![PickOutcome::Cancelled, PickOutcome::InProgress]);
        let mut h = harness_with_picker(MemoryFileSystem::new(), Arc::new(picker));
        h.app.handle_event(AppEvent::OpenSettings);

        for _ in 0..2 {
            h.app.handle_event(AppEvent::PickFolder);
            settle(&mut h.app).await;
            assert!(h.app.alert.is_none());
            assert!(h.app.status.is_none());
            assert!(h.library.settings().root_uris.is_empty());
        }
        assert!(!screen_text(&mut h.app).contains("Could not select the folder."));
    }

    #[tokio::test]
    async fn test_picked_folder_becomes_a_root() {
        let picker = ScriptedPicker::new(vec![PickOutcome::Picked("/books".to_string())]);
        let mut h = harness_with_picker(MemoryFileSystem::new(), Arc::new(picker));
        h.app.handle_event(AppEvent::OpenSettings);

        h.app.handle_event(AppEvent::PickFolder);
        settle(&mut h.app).await;

        assert_eq!(h.library.settings().root_uris, vec!["/books".to_string()]);
        assert!(h.app.alert.is_none());
        assert!(screen_text(&mut h.app).contains("Added /books"));
    }

    #[tokio::test]
    async fn test_library_filter() {
        let mut h = loaded(media()).await;
        h.app.handle_event(AppEvent::StartFilter);
        for c in "stry".chars() {
            h.app.handle_event(AppEvent::Input(c));
        }
        h.app.handle_event(AppEvent::Submit);

        let text = screen_text(&mut h.app);
        assert!(text.contains("story"));
        assert!(!text.contains("book1"));

        h.app.handle_event(AppEvent::Back);
        assert!(screen_text(&mut h.app).contains("book1"));
    }
}
