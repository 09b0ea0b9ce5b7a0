use super::{PlaybackError, PlaybackState, PlayerOptions, PlayerTrack, Progress, TrackPlayer};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// What a `SilentPlayer` was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Setup,
    Reset,
    Add(Vec<String>),
    Skip(String),
    Play,
    Pause,
}

#[derive(Debug)]
struct Queue {
    tracks: Vec<PlayerTrack>,
    current: Option<usize>,
    state: PlaybackState,
    log: Vec<PlayerCommand>,
}

/// Engine that keeps queue and state bookkeeping but produces no sound.
/// Used when audio output is compiled out, and in tests.
pub struct SilentPlayer {
    queue: Mutex<Queue>,
    progress_tx: broadcast::Sender<Progress>,
}

impl Default for SilentPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SilentPlayer {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(64);
        Self {
            queue: Mutex::new(Queue {
                tracks: Vec::new(),
                current: None,
                state: PlaybackState::Stopped,
                log: Vec::new(),
            }),
            progress_tx,
        }
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.queue().log.clone()
    }

    pub fn current_track(&self) -> Option<PlayerTrack> {
        let queue = self.queue();
        queue.current.and_then(|i| queue.tracks.get(i).cloned())
    }

    /// Pushes a progress update to every listener.
    pub fn emit(&self, position: f64, duration: f64) {
        // no receivers is fine
        let _ = self.progress_tx.send(Progress { position, duration });
    }

    fn apply(&self, command: PlayerCommand) -> Result<(), PlaybackError> {
        let mut queue = self.queue();
        match &command {
            PlayerCommand::Setup => {}
            PlayerCommand::Reset => {
                queue.tracks.clear();
                queue.current = None;
                queue.state = PlaybackState::Stopped;
            }
            PlayerCommand::Add(_) => {}
            PlayerCommand::Skip(id) => {
                let index = queue
                    .tracks
                    .iter()
                    .position(|t| &t.id == id)
                    .ok_or_else(|| PlaybackError::UnknownTrack(id.clone()))?;
                queue.current = Some(index);
            }
            PlayerCommand::Play => {
                if queue.current.is_none() && !queue.tracks.is_empty() {
                    queue.current = Some(0);
                }
                queue.state = PlaybackState::Playing;
            }
            PlayerCommand::Pause => queue.state = PlaybackState::Paused,
        }
        queue.log.push(command);
        Ok(())
    }
}

impl TrackPlayer for SilentPlayer {
    fn setup(&self, _options: PlayerOptions) -> BoxFuture<'_, Result<(), PlaybackError>> {
        let result = self.apply(PlayerCommand::Setup);
        async move { result }.boxed()
    }

    fn reset(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        let result = self.apply(PlayerCommand::Reset);
        async move { result }.boxed()
    }

    fn add(&self, tracks: Vec<PlayerTrack>) -> BoxFuture<'_, Result<(), PlaybackError>> {
        let ids = tracks.iter().map(|t| t.id.clone()).collect();
        self.queue().tracks.extend(tracks);
        let result = self.apply(PlayerCommand::Add(ids));
        async move { result }.boxed()
    }

    fn skip<'a>(&'a self, track_id: &'a str) -> BoxFuture<'a, Result<(), PlaybackError>> {
        let result = self.apply(PlayerCommand::Skip(track_id.to_string()));
        async move { result }.boxed()
    }

    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        let result = self.apply(PlayerCommand::Play);
        async move { result }.boxed()
    }

    fn pause(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        let result = self.apply(PlayerCommand::Pause);
        async move { result }.boxed()
    }

    fn state(&self) -> BoxFuture<'_, Result<PlaybackState, PlaybackError>> {
        let state = self.queue().state;
        async move { Ok(state) }.boxed()
    }

    fn progress(&self) -> broadcast::Receiver<Progress> {
        self.progress_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, index: usize) -> PlayerTrack {
        PlayerTrack {
            id: id.to_string(),
            url: format!("/media/{}.mp3", id),
            title: id.to_string(),
            artist: None,
            artwork: None,
            index,
        }
    }

    #[tokio::test]
    async fn test_play_without_skip_starts_first_track() {
        let player = SilentPlayer::new();
        player.add(vec![track("a", 0), track("b", 1)]).await.unwrap();
        player.play().await.unwrap();
        assert_eq!(player.current_track().unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_reset_clears_queue() {
        let player = SilentPlayer::new();
        player.add(vec![track("a", 0)]).await.unwrap();
        player.play().await.unwrap();
        player.reset().await.unwrap();

        assert!(player.current_track().is_none());
        assert_eq!(player.state().await.unwrap(), PlaybackState::Stopped);
        assert!(player.skip("a").await.is_err());
    }
}
