// Rodio engine - owns the output stream on its own thread
// OutputStream is !Send, so every command crosses a channel and replies on a oneshot

use super::{PlaybackError, PlaybackState, PlayerOptions, PlayerTrack, Progress, TrackPlayer};
use futures::future::BoxFuture;
use futures::FutureExt;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info};

type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

enum Command {
    Setup(PlayerOptions, Reply<()>),
    Reset(Reply<()>),
    Add(Vec<PlayerTrack>, Reply<()>),
    Skip(String, Reply<()>),
    Play(Reply<()>),
    Pause(Reply<()>),
    State(Reply<PlaybackState>),
}

pub struct RodioPlayer {
    commands: mpsc::Sender<Command>,
    progress_tx: broadcast::Sender<Progress>,
}

impl RodioPlayer {
    /// Starts the audio thread. The output device is opened later, by `setup`.
    pub fn spawn() -> Result<Self, PlaybackError> {
        let (commands, rx) = mpsc::channel();
        let (progress_tx, _) = broadcast::channel(32);

        let engine_progress = progress_tx.clone();
        thread::Builder::new()
            .name("shelfplay-audio".to_string())
            .spawn(move || Engine::new(engine_progress).run(rx))
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        Ok(Self { commands, progress_tx })
    }

    fn call<T: Send + 'static>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> BoxFuture<'static, Result<T, PlaybackError>> {
        let (tx, rx) = oneshot::channel();
        let sent = self.commands.send(make(tx)).map_err(|_| PlaybackError::EngineGone);
        async move {
            sent?;
            rx.await.map_err(|_| PlaybackError::EngineGone)?
        }
        .boxed()
    }
}

impl TrackPlayer for RodioPlayer {
    fn setup(&self, options: PlayerOptions) -> BoxFuture<'_, Result<(), PlaybackError>> {
        self.call(|reply| Command::Setup(options, reply))
    }

    fn reset(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        self.call(Command::Reset)
    }

    fn add(&self, tracks: Vec<PlayerTrack>) -> BoxFuture<'_, Result<(), PlaybackError>> {
        self.call(|reply| Command::Add(tracks, reply))
    }

    fn skip<'a>(&'a self, track_id: &'a str) -> BoxFuture<'a, Result<(), PlaybackError>> {
        let id = track_id.to_string();
        self.call(|reply| Command::Skip(id, reply))
    }

    fn play(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        self.call(Command::Play)
    }

    fn pause(&self) -> BoxFuture<'_, Result<(), PlaybackError>> {
        self.call(Command::Pause)
    }

    fn state(&self) -> BoxFuture<'_, Result<PlaybackState, PlaybackError>> {
        self.call(Command::State)
    }

    fn progress(&self) -> broadcast::Receiver<Progress> {
        self.progress_tx.subscribe()
    }
}

/// Elapsed play time, paused with the sink.
#[derive(Default)]
struct PlayClock {
    started: Option<Instant>,
    accumulated: Duration,
}

impl PlayClock {
    fn resume(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    fn position(&self) -> f64 {
        let running = self.started.map(|s| s.elapsed()).unwrap_or_default();
        (self.accumulated + running).as_secs_f64()
    }
}

struct Engine {
    output: Option<(OutputStream, OutputStreamHandle)>,
    sink: Option<Sink>,
    queue: Vec<PlayerTrack>,
    current: Option<usize>,
    state: PlaybackState,
    options: PlayerOptions,
    clock: PlayClock,
    duration: f64,
    progress_tx: broadcast::Sender<Progress>,
}

impl Engine {
    fn new(progress_tx: broadcast::Sender<Progress>) -> Self {
        Self {
            output: None,
            sink: None,
            queue: Vec::new(),
            current: None,
            state: PlaybackState::Stopped,
            options: PlayerOptions::default(),
            clock: PlayClock::default(),
            duration: 0.0,
            progress_tx,
        }
    }

    fn run(mut self, rx: mpsc::Receiver<Command>) {
        loop {
            match rx.recv_timeout(self.options.progress_interval) {
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => self.tick(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Audio thread exiting");
    }

    fn handle(&mut self, command: Command) {
        // a dropped reply just means the caller stopped waiting
        match command {
            Command::Setup(options, reply) => {
                let _ = reply.send(self.setup(options));
            }
            Command::Reset(reply) => {
                self.stop_sink();
                self.queue.clear();
                self.current = None;
                self.state = PlaybackState::Stopped;
                let _ = reply.send(Ok(()));
            }
            Command::Add(tracks, reply) => {
                self.queue.extend(tracks);
                let _ = reply.send(Ok(()));
            }
            Command::Skip(id, reply) => {
                let _ = reply.send(self.skip(&id));
            }
            Command::Play(reply) => {
                let _ = reply.send(self.play());
            }
            Command::Pause(reply) => {
                if let Some(sink) = &self.sink {
                    sink.pause();
                }
                self.clock.pause();
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Paused;
                }
                let _ = reply.send(Ok(()));
            }
            Command::State(reply) => {
                let _ = reply.send(Ok(self.state));
            }
        }
    }

    fn setup(&mut self, options: PlayerOptions) -> Result<(), PlaybackError> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| PlaybackError::Output(e.to_string()))?;
        self.output = Some((stream, handle));
        self.options = PlayerOptions {
            volume: options.volume.clamp(0.0, 1.0),
            ..options
        };
        info!(volume = self.options.volume, "Opened audio output");
        Ok(())
    }

    fn skip(&mut self, id: &str) -> Result<(), PlaybackError> {
        let index = self
            .queue
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| PlaybackError::UnknownTrack(id.to_string()))?;
        self.load(index)
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        if self.sink.is_none() {
            match self.current {
                Some(index) => self.load(index)?,
                None if !self.queue.is_empty() => self.load(0)?,
                None => return Ok(()),
            }
        }
        if let Some(sink) = &self.sink {
            sink.play();
        }
        self.clock.resume();
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Opens track `index` into a fresh sink, paused unless already playing.
    fn load(&mut self, index: usize) -> Result<(), PlaybackError> {
        let handle = match &self.output {
            Some((_, handle)) => handle,
            None => return Err(PlaybackError::NotInitialized),
        };
        let track = match self.queue.get(index) {
            Some(track) => track,
            None => return Err(PlaybackError::UnknownTrack(index.to_string())),
        };

        let source_error = |reason: String| PlaybackError::Source {
            path: track.url.clone(),
            reason,
        };
        let file = File::open(&track.url).map_err(|e| source_error(e.to_string()))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| source_error(e.to_string()))?;
        let duration = source.total_duration().map(|d| d.as_secs_f64()).unwrap_or(0.0);

        let sink = Sink::try_new(handle).map_err(|e| PlaybackError::Output(e.to_string()))?;
        sink.set_volume(self.options.volume);
        sink.append(source);

        debug!(track = %track.title, duration, "Loaded track");

        let keep_playing = self.state == PlaybackState::Playing;
        if !keep_playing {
            sink.pause();
        }

        self.stop_sink();
        self.sink = Some(sink);
        self.current = Some(index);
        self.duration = duration;
        self.clock = PlayClock::default();
        if keep_playing {
            self.clock.resume();
        }
        Ok(())
    }

    fn stop_sink(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.clock = PlayClock::default();
        self.duration = 0.0;
    }

    fn tick(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }

        let finished = self.sink.as_ref().map(|s| s.empty()).unwrap_or(true);
        if finished {
            self.advance();
        }

        // no listeners is fine
        let _ = self.progress_tx.send(Progress {
            position: self.clock.position(),
            duration: self.duration,
        });
    }

    fn advance(&mut self) {
        let next = self.current.map(|i| i + 1).unwrap_or(0);
        if next >= self.queue.len() {
            info!("Reached end of queue");
            self.stop_sink();
            self.state = PlaybackState::Stopped;
            return;
        }

        if let Err(e) = self.load(next) {
            error!(error = %e, "Could not continue to next chapter");
            self.stop_sink();
            self.state = PlaybackState::Stopped;
        } else {
            debug!(index = next, "Chapter finished, moving on");
        }
    }
}
