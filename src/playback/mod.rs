// Playback - turns books into player queues
// The engine behind `TrackPlayer` does the decoding; this layer only issues commands

#[cfg(feature = "audio")]
pub mod rodio_player;
pub mod silent;

#[cfg(feature = "audio")]
pub use rodio_player::RodioPlayer;
pub use silent::{PlayerCommand, SilentPlayer};

use crate::library::Book;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// One queue entry handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerTrack {
    pub id: String,
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    pub artwork: Option<String>,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub position: f64, // seconds
    pub duration: f64, // seconds, 0 when unknown
}

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub auto_handle_interruptions: bool,
    pub volume: f32, // 0.0 to 1.0
    pub progress_interval: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            auto_handle_interruptions: true,
            volume: 0.8,
            progress_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Output(String),
    #[error("player used before setup")]
    NotInitialized,
    #[error("no track with id '{0}' in the queue")]
    UnknownTrack(String),
    #[error("cannot play {path}: {reason}")]
    Source { path: String, reason: String },
    #[error("audio engine has shut down")]
    EngineGone,
}

/// Command surface of the external audio engine.
pub trait TrackPlayer: Send + Sync {
    fn setup(&self, options: PlayerOptions) -> BoxFuture<'_, Result<(), PlaybackError>>;
    fn reset(&self) -> BoxFuture<'_, Result<(), PlaybackError>>;
    fn add(&self, tracks: Vec<PlayerTrack>) -> BoxFuture<'_, Result<(), PlaybackError>>;
    fn skip<'a>(&'a self, track_id: &'a str) -> BoxFuture<'a, Result<(), PlaybackError>>;
    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>>;
    fn pause(&self) -> BoxFuture<'_, Result<(), PlaybackError>>;
    fn state(&self) -> BoxFuture<'_, Result<PlaybackState, PlaybackError>>;
    /// Fresh receiver for progress updates.
    fn progress(&self) -> broadcast::Receiver<Progress>;
}

impl<T: TrackPlayer + ?Sized> TrackPlayer for Arc<T> {
    fn setup(&self, options: PlayerOptions) -> BoxFuture<'_, Result<(), PlaybackError>> {
        (**self).setup(options)
    }
    fn reset(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        (**self).reset()
    }
    fn add(&self, tracks: Vec<PlayerTrack>) -> BoxFuture<'_, Result<(), PlaybackError>> {
        (**self).add(tracks)
    }
    fn skip<'a>(&'a self, track_id: &'a str) -> BoxFuture<'a, Result<(), PlaybackError>> {
        (**self).skip(track_id)
    }
    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        (**self).play()
    }
    fn pause(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        (**self).pause()
    }
    fn state(&self) -> BoxFuture<'_, Result<PlaybackState, PlaybackError>> {
        (**self).state()
    }
    fn progress(&self) -> broadcast::Receiver<Progress> {
        (**self).progress()
    }
}

pub type SharedPlayer = Arc<dyn TrackPlayer>;

/// Chapters of `book` as engine tracks, in order.
pub fn tracks_for(book: &Book) -> Vec<PlayerTrack> {
    book.tracks
        .iter()
        .enumerate()
        .map(|(index, chapter)| PlayerTrack {
            id: chapter.id.clone(),
            url: chapter.path.clone(),
            title: chapter.title.clone(),
            artist: book.author.clone(),
            artwork: book.cover.clone(),
            index,
        })
        .collect()
}

/// Stops delivering progress when dropped.
pub struct ProgressSubscription {
    handle: JoinHandle<()>,
}

impl ProgressSubscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct PlaybackService<P> {
    player: P,
    options: PlayerOptions,
    initialized: OnceCell<()>,
}

impl<P: TrackPlayer> PlaybackService<P> {
    pub fn new(player: P, options: PlayerOptions) -> Self {
        Self {
            player,
            options,
            initialized: OnceCell::new(),
        }
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Runs engine setup once per service; concurrent callers wait for the same attempt.
    /// A failed attempt leaves the service uninitialized so the next call retries.
    pub async fn setup_player(&self) -> Result<(), PlaybackError> {
        self.initialized
            .get_or_try_init(|| async {
                self.player.setup(self.options.clone()).await?;
                info!("Audio player initialized");
                Ok::<(), PlaybackError>(())
            })
            .await?;
        Ok(())
    }

    /// Replaces the engine queue with the chapters of `book`.
    pub async fn load_book(&self, book: &Book) -> Result<(), PlaybackError> {
        self.setup_player().await?;
        let tracks = tracks_for(book);

        self.player.reset().await?;
        debug!(book = %book.id, tracks = tracks.len(), "Loading book into player");
        self.player.add(tracks).await
    }

    /// Skips to `chapter_id` and plays, or just resumes when no chapter is given.
    pub async fn play_chapter(&self, chapter_id: Option<&str>) -> Result<(), PlaybackError> {
        match chapter_id {
            Some(id) if !id.is_empty() => {
                self.player.skip(id).await?;
                self.player.play().await
            }
            _ => self.player.play().await,
        }
    }

    pub async fn toggle_playback(&self) -> Result<PlaybackState, PlaybackError> {
        match self.player.state().await? {
            PlaybackState::Playing => {
                self.player.pause().await?;
                Ok(PlaybackState::Paused)
            }
            _ => {
                self.player.play().await?;
                Ok(PlaybackState::Playing)
            }
        }
    }

    /// Calls `on_progress(position, duration)` for every engine update until the
    /// subscription is dropped.
    pub fn add_progress_listener<F>(&self, mut on_progress: F) -> ProgressSubscription
    where
        F: FnMut(f64, f64) + Send + 'static,
    {
        let mut rx = self.player.progress();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => on_progress(update.position, update.duration),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Progress listener fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        ProgressSubscription { handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Chapter, MediaType};
    use std::sync::Mutex;

    fn book() -> Book {
        Book {
            id: "book".to_string(),
            title: "Saga".to_string(),
            author: Some("Ursula".to_string()),
            description: None,
            cover: Some("cover.png".to_string()),
            media_type: MediaType::Audio,
            path: "/media/saga".to_string(),
            tracks: vec![
                Chapter {
                    id: "c1".to_string(),
                    title: "One".to_string(),
                    duration: None,
                    path: "/media/saga/1.mp3".to_string(),
                    position: None,
                },
                Chapter {
                    id: "c2".to_string(),
                    title: "Two".to_string(),
                    duration: None,
                    path: "/media/saga/2.mp3".to_string(),
                    position: None,
                },
            ],
            last_opened_at: None,
            progress: None,
        }
    }

    #[test]
    fn test_tracks_carry_book_metadata() {
        let tracks = tracks_for(&book());
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].index, 1);
        assert_eq!(tracks[1].url, "/media/saga/2.mp3");
        assert_eq!(tracks[0].artist.as_deref(), Some("Ursula"));
        assert_eq!(tracks[0].artwork.as_deref(), Some("cover.png"));
    }

    #[tokio::test]
    async fn test_setup_runs_once() {
        let service = PlaybackService::new(SilentPlayer::new(), PlayerOptions::default());
        service.load_book(&book()).await.unwrap();
        service.load_book(&book()).await.unwrap();

        let setups = service
            .player()
            .commands()
            .iter()
            .filter(|c| matches!(c, PlayerCommand::Setup))
            .count();
        assert_eq!(setups, 1);
        assert!(service.is_initialized());
    }

    #[tokio::test]
    async fn test_load_resets_then_adds() {
        let service = PlaybackService::new(SilentPlayer::new(), PlayerOptions::default());
        service.load_book(&book()).await.unwrap();

        let commands = service.player().commands();
        assert_eq!(commands[1], PlayerCommand::Reset);
        assert!(matches!(&commands[2], PlayerCommand::Add(ids) if ids == &vec!["c1".to_string(), "c2".to_string()]));
    }

    #[tokio::test]
    async fn test_play_chapter_skips_first() {
        let service = PlaybackService::new(SilentPlayer::new(), PlayerOptions::default());
        service.load_book(&book()).await.unwrap();

        service.play_chapter(Some("c2")).await.unwrap();
        service.play_chapter(None).await.unwrap();

        let commands = service.player().commands();
        let tail: Vec<_> = commands.iter().skip(3).cloned().collect();
        assert_eq!(
            tail,
            vec![PlayerCommand::Skip("c2".to_string()), PlayerCommand::Play, PlayerCommand::Play]
        );
    }

    #[tokio::test]
    async fn test_unknown_chapter_errors() {
        let service = PlaybackService::new(SilentPlayer::new(), PlayerOptions::default());
        service.load_book(&book()).await.unwrap();
        assert!(matches!(
            service.play_chapter(Some("nope")).await,
            Err(PlaybackError::UnknownTrack(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let service = PlaybackService::new(SilentPlayer::new(), PlayerOptions::default());
        service.load_book(&book()).await.unwrap();

        assert_eq!(service.toggle_playback().await.unwrap(), PlaybackState::Playing);
        assert_eq!(service.toggle_playback().await.unwrap(), PlaybackState::Paused);
        assert_eq!(service.player().state().await.unwrap(), PlaybackState::Paused);
    }

    #[tokio::test]
    async fn test_progress_listener_until_unsubscribed() {
        let service = PlaybackService::new(SilentPlayer::new(), PlayerOptions::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let subscription = service.add_progress_listener(move |position, duration| {
            sink.lock().unwrap().push((position, duration));
        });
        tokio::task::yield_now().await;

        service.player().emit(12.0, 300.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec![(12.0, 300.0)]);

        subscription.unsubscribe();
        tokio::task::yield_now().await;
        service.player().emit(13.0, 300.0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
