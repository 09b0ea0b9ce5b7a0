// shelfplay - scan folders of audiobooks and ebooks, listen, read, bookmark
// With no subcommand the terminal UI starts; the subcommands are for scripting

use anyhow::Result;
use clap::{Parser, Subcommand};
use shelfplay::config::Config;
use shelfplay::library::{format_time, LibraryRepository, LocalFileSystem};
use shelfplay::logging::init_logging;
use shelfplay::state::LibraryState;
use shelfplay::storage::{SharedStore, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "shelfplay", version)]
#[command(about = "Audiobook and ebook shelf for the terminal")]
struct Cli {
    /// Also log to stderr
    #[arg(long, global = true)]
    dev: bool,

    /// Use this config file instead of the default one
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan folders and list the books found (defaults to the saved folders)
    Scan { roots: Vec<String> },
    /// Manage the saved library folders
    Roots {
        #[command(subcommand)]
        action: RootsAction,
    },
    /// List saved bookmarks
    Bookmarks,
}

#[derive(Subcommand)]
enum RootsAction {
    Add { uri: String },
    Remove { uri: String },
    List,
}

fn build_repository(config: &Config) -> Result<LibraryRepository> {
    let kv: SharedStore = Arc::new(SqliteStore::open(&config.storage.database_path)?);
    let fs = LocalFileSystem::new().with_tags(config.scanner.read_tags);
    Ok(LibraryRepository::from_parts(Arc::new(fs), kv).with_identity(config.scanner.identity()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let _log_guard = init_logging(cli.dev, &config.log_dir)?;
    info!(version = env!("CARGO_PKG_VERSION"), "shelfplay starting");

    let repository = build_repository(&config)?;

    match cli.command {
        Some(Command::Scan { roots }) => {
            let roots = if roots.is_empty() {
                repository.get_settings().await?.unwrap_or_default().root_uris
            } else {
                roots
            };
            let snapshot = repository.get_library(&roots).await?;
            for book in &snapshot.books {
                let duration = book.total_duration().map(format_time).unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    book.title,
                    book.media_type.label(),
                    book.display_author(),
                    duration,
                    book.path
                );
            }
            println!("{} book(s) in {} folder(s)", snapshot.books.len(), roots.len());
        }
        Some(Command::Roots { action }) => {
            let current = repository.get_settings().await?.unwrap_or_default();
            let (settings, changed) = match action {
                RootsAction::Add { uri } => (current.with_root(&uri), true),
                RootsAction::Remove { uri } => (current.without_root(&uri), true),
                RootsAction::List => (current, false),
            };

            if changed {
                repository.persist_settings(&settings).await?;
            }
            for root in &settings.root_uris {
                println!("{}", root);
            }
        }
        Some(Command::Bookmarks) => {
            for bookmark in repository.get_bookmarks().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    bookmark.created_at.format("%Y-%m-%d %H:%M"),
                    bookmark.book_id,
                    format_time(bookmark.position),
                    bookmark.note.as_deref().unwrap_or("")
                );
            }
        }
        None => run_ui(&config, LibraryState::new(repository)).await?,
    }

    Ok(())
}

#[cfg(feature = "tui")]
async fn run_ui(config: &Config, library: LibraryState) -> Result<()> {
    use shelfplay::picker::FolderPicker;
    use shelfplay::playback::PlaybackService;
    use shelfplay::reader::ReaderService;
    use shelfplay::ui::{App, Services};
    use tracing::warn;

    if let Err(e) = library.load_persisted_settings().await {
        warn!(error = %e, "Could not load saved settings, using defaults");
    }
    let auto_scan = library.spawn_auto_scan();

    let picker: Arc<dyn FolderPicker> = {
        #[cfg(feature = "picker")]
        {
            Arc::new(shelfplay::picker::DialogPicker::new())
        }
        #[cfg(not(feature = "picker"))]
        {
            Arc::new(shelfplay::picker::NoPicker)
        }
    };

    let services = Services {
        playback: Arc::new(PlaybackService::new(make_player(), config.playback.player_options())),
        reader: Arc::new(ReaderService::new(library.repository().store().clone())),
        library,
        picker,
    };

    let mut app = App::new(services, config.tick_rate());
    let result = app.run().await;
    auto_scan.abort();
    result
}

#[cfg(not(feature = "tui"))]
async fn run_ui(_config: &Config, _library: LibraryState) -> Result<()> {
    anyhow::bail!("built without the terminal UI; use one of the subcommands (see --help)")
}

#[cfg(all(feature = "tui", feature = "audio"))]
fn make_player() -> shelfplay::playback::SharedPlayer {
    match shelfplay::playback::RodioPlayer::spawn() {
        Ok(player) => Arc::new(player),
        Err(e) => {
            tracing::warn!(error = %e, "Audio thread unavailable, playback will be silent");
            Arc::new(shelfplay::playback::SilentPlayer::new())
        }
    }
}

#[cfg(all(feature = "tui", not(feature = "audio")))]
fn make_player() -> shelfplay::playback::SharedPlayer {
    Arc::new(shelfplay::playback::SilentPlayer::new())
}
