use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::engine::{EngineStatus, MediaSource, PlaybackEngine};
use super::heartbeat::Heartbeat;
use super::state::{NowPlaying, PlayerState, PlayerUiState};
use super::writer::SessionWriter;
use crate::error::{EngineError, PlaybackError};
use crate::store::{Episode, Podcast, SessionSnapshot, Store, now_millis};

const COMMAND_BUFFER: usize = 32;

/// Timing knobs of a playback session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// Playback distance between two progress checkpoints
    pub heartbeat_interval: Duration,
    /// How often position is sampled while playing
    pub tick_interval: Duration,
    pub seek_back: Duration,
    pub seek_forward: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            seek_back: Duration::from_secs(5),
            seek_forward: Duration::from_secs(15),
        }
    }
}

/// Request to start an episode
///
/// For a stored episode only `guid` matters; the other fields describe
/// episodes that are not (yet) in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayRequest {
    pub guid: String,
    pub audio_url: Option<String>,
    pub title: Option<String>,
    pub podcast_url: Option<String>,
    pub start_position_millis: Option<u64>,
}

impl PlayRequest {
    pub fn for_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            ..Self::default()
        }
    }
}

/// Result of [`PlaybackController::restore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No snapshot, or the episode it names is gone
    NothingToRestore,
    /// A session was already loaded; the snapshot was ignored
    AlreadyActive,
    Restored { guid: String, playing: bool },
}

type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

enum Command {
    Play(PlayRequest, Reply<()>),
    Pause(Reply<()>),
    TogglePlayPause(Reply<()>),
    Stop(Reply<()>),
    SeekTo(u64, Reply<u64>),
    SeekBack(Reply<u64>),
    SeekForward(Reply<u64>),
    Restore(Reply<RestoreOutcome>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the playback session.
///
/// The engine is owned by a single task; every method sends it a command and
/// waits for the answer, so concurrent callers are serialized. Dropping the
/// last handle checkpoints the session and stops the engine.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<PlayerUiState>,
}

impl PlaybackController {
    /// Start the session task on the current runtime
    pub fn spawn(engine: Box<dyn PlaybackEngine>, store: Store, settings: PlaybackSettings) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let (ui, state) = watch::channel(PlayerUiState::default());

        let session = Session {
            engine,
            writer: SessionWriter::spawn(store.clone()),
            store,
            heartbeat: Heartbeat::new(settings.heartbeat_interval.as_millis() as u64),
            settings,
            ui,
            phase: PlayerState::Idle,
            current: None,
            duration_hint: 0,
            ticker: None,
        };
        tokio::spawn(session.run(rx));

        Self { commands, state }
    }

    pub async fn play(&self, request: PlayRequest) -> Result<(), PlaybackError> {
        self.request(|reply| Command::Play(request, reply)).await
    }

    pub async fn pause(&self) -> Result<(), PlaybackError> {
        self.request(Command::Pause).await
    }

    pub async fn toggle_play_pause(&self) -> Result<(), PlaybackError> {
        self.request(Command::TogglePlayPause).await
    }

    pub async fn stop(&self) -> Result<(), PlaybackError> {
        self.request(Command::Stop).await
    }

    /// Seek to `position_millis`, clamped to the media length.
    ///
    /// Returns the position actually sought to.
    pub async fn seek_to(&self, position_millis: u64) -> Result<u64, PlaybackError> {
        self.request(|reply| Command::SeekTo(position_millis, reply)).await
    }

    pub async fn seek_back(&self) -> Result<u64, PlaybackError> {
        self.request(Command::SeekBack).await
    }

    pub async fn seek_forward(&self) -> Result<u64, PlaybackError> {
        self.request(Command::SeekForward).await
    }

    /// Reload the persisted session, if any
    pub async fn restore(&self) -> Result<RestoreOutcome, PlaybackError> {
        self.request(Command::Restore).await
    }

    /// Wait until every write issued so far has reached the store
    pub async fn flush_pending_writes(&self) -> Result<(), PlaybackError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .await
            .map_err(|_| PlaybackError::ControllerGone)?;
        done.await.map_err(|_| PlaybackError::ControllerGone)
    }

    /// Latest published state
    pub fn state(&self) -> PlayerUiState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerUiState> {
        self.state.clone()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, PlaybackError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| PlaybackError::ControllerGone)?;
        response.await.map_err(|_| PlaybackError::ControllerGone)?
    }
}

struct Session {
    engine: Box<dyn PlaybackEngine>,
    store: Store,
    writer: SessionWriter,
    settings: PlaybackSettings,
    heartbeat: Heartbeat,
    ui: watch::Sender<PlayerUiState>,
    phase: PlayerState,
    current: Option<NowPlaying>,
    /// Length from the feed, used until the engine reports one
    duration_hint: u64,
    /// Present only while playing
    ticker: Option<Interval>,
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn to_millis(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_stored(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn now_playing(episode: &Episode, podcast: Option<&Podcast>) -> NowPlaying {
    NowPlaying {
        guid: episode.guid.clone(),
        title: episode.title.clone(),
        description: episode.description.clone(),
        podcast_url: Some(episode.podcast_url.clone()),
        podcast_title: podcast.map(|p| p.title.clone()),
        image_url: podcast.and_then(|p| p.image_url.clone()),
        source: MediaSource::resolve(episode.local_file_path.as_deref(), &episode.audio_url),
    }
}

impl Session {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                biased;
                () = next_tick(&mut self.ticker) => self.on_tick(),
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Play(request, reply) => {
                let _ = reply.send(self.play(request).await);
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Command::TogglePlayPause(reply) => {
                let _ = reply.send(self.toggle_play_pause());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            Command::SeekTo(position, reply) => {
                let _ = reply.send(self.seek_to(position));
            }
            Command::SeekBack(reply) => {
                let back = self.settings.seek_back.as_millis() as u64;
                let target = self.position().saturating_sub(back);
                let _ = reply.send(self.seek_to(target));
            }
            Command::SeekForward(reply) => {
                let forward = self.settings.seek_forward.as_millis() as u64;
                let target = self.position().saturating_add(forward);
                let _ = reply.send(self.seek_to(target));
            }
            Command::Restore(reply) => {
                let _ = reply.send(self.restore().await);
            }
            Command::Flush(reply) => {
                self.writer.flush().await;
                let _ = reply.send(());
            }
        }
    }

    #[instrument(skip(self, request), fields(guid = %request.guid))]
    async fn play(&mut self, request: PlayRequest) -> Result<(), PlaybackError> {
        let (item, start, duration_hint) = match self.store.episode(&request.guid).await? {
            Some(episode) => {
                let podcast = self.store.podcast(&episode.podcast_url).await?;
                (
                    now_playing(&episode, podcast.as_ref()),
                    to_millis(episode.progress_in_millis),
                    to_millis(episode.duration_millis()),
                )
            }
            None => {
                let Some(audio_url) = request.audio_url else {
                    return Err(PlaybackError::UnknownEpisode { guid: request.guid });
                };
                let item = NowPlaying {
                    guid: request.guid,
                    title: request.title.unwrap_or_default(),
                    description: String::new(),
                    podcast_url: request.podcast_url,
                    podcast_title: None,
                    image_url: None,
                    source: MediaSource::Remote(audio_url),
                };
                (item, request.start_position_millis.unwrap_or(0), 0)
            }
        };

        // Only a resolvable request may interrupt the current episode
        self.leave_current();

        info!(source = %item.source, start, "Starting playback");
        self.load(item, start, duration_hint)?;
        if let Some(snapshot) = self.snapshot(start, true) {
            self.writer.save_session(snapshot);
        }
        self.start_playback()
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        if !self.phase.is_playing() {
            return Ok(());
        }
        let position = self.position();
        self.engine.pause().map_err(|e| self.failed(e))?;
        self.stop_ticker();
        self.phase = PlayerState::Paused;
        self.checkpoint(position, false);
        self.publish_at(position);
        Ok(())
    }

    fn toggle_play_pause(&mut self) -> Result<(), PlaybackError> {
        if self.current.is_none() {
            return Err(PlaybackError::NothingLoaded);
        }
        match self.phase {
            PlayerState::Playing => self.pause(),
            PlayerState::Ended => {
                self.seek_to(0)?;
                self.resume()
            }
            _ => self.resume(),
        }
    }

    fn resume(&mut self) -> Result<(), PlaybackError> {
        let position = self.position();
        self.heartbeat.reset(position);
        if let Some(snapshot) = self.snapshot(position, true) {
            self.writer.save_session(snapshot);
        }
        self.start_playback()
    }

    fn stop(&mut self) -> Result<(), PlaybackError> {
        if self.current.is_none() {
            return Ok(());
        }
        let position = self.position();
        self.checkpoint(position, false);
        if let Err(error) = self.engine.stop() {
            warn!(%error, "Engine failed to stop");
        }
        self.stop_ticker();
        self.current = None;
        self.duration_hint = 0;
        self.phase = PlayerState::Idle;
        self.publish_at(0);
        Ok(())
    }

    fn seek_to(&mut self, target: u64) -> Result<u64, PlaybackError> {
        if self.current.is_none() {
            return Err(PlaybackError::NothingLoaded);
        }
        let duration = self.duration();
        let position = if duration > 0 { target.min(duration) } else { target };

        self.engine.seek(position).map_err(|e| self.failed(e))?;
        self.heartbeat.reset(position);
        if self.phase == PlayerState::Ended {
            self.phase = PlayerState::Paused;
        }
        if !self.phase.is_playing() {
            self.checkpoint(position, false);
        }
        self.publish_at(position);
        Ok(position)
    }

    #[instrument(skip(self))]
    async fn restore(&mut self) -> Result<RestoreOutcome, PlaybackError> {
        if self.current.is_some() {
            return Ok(RestoreOutcome::AlreadyActive);
        }
        let Some(snapshot) = self.store.load_session().await? else {
            return Ok(RestoreOutcome::NothingToRestore);
        };
        let Some(episode) = self.store.episode(&snapshot.last_guid).await? else {
            debug!(guid = %snapshot.last_guid, "Session episode no longer stored");
            return Ok(RestoreOutcome::NothingToRestore);
        };
        let Some(podcast) = self.store.podcast(&episode.podcast_url).await? else {
            return Ok(RestoreOutcome::NothingToRestore);
        };

        let position = to_millis(snapshot.last_position_millis);
        let item = now_playing(&episode, Some(&podcast));
        info!(guid = %episode.guid, position, playing = snapshot.last_is_playing, "Restoring session");
        self.load(item, position, to_millis(episode.duration_millis()))?;

        if snapshot.last_is_playing {
            self.start_playback()?;
        }
        Ok(RestoreOutcome::Restored {
            guid: episode.guid,
            playing: snapshot.last_is_playing,
        })
    }

    fn on_tick(&mut self) {
        if !self.phase.is_playing() {
            self.stop_ticker();
            return;
        }
        match self.engine.status() {
            EngineStatus::Ended => {
                self.finish();
                return;
            }
            EngineStatus::Failed(message) => {
                let position = self.position();
                self.checkpoint(position, false);
                warn!(%message, "Playback failed");
                self.failed(EngineError(message));
                return;
            }
            _ => {}
        }

        let position = self.position();
        if self.heartbeat.observe(position) {
            debug!(position, "Heartbeat checkpoint");
            self.checkpoint(position, true);
        }
        self.publish_at(position);
    }

    /// The engine reached the end of the media
    fn finish(&mut self) {
        let duration = self.duration();
        let position = if duration > 0 { duration } else { self.position() };
        self.stop_ticker();
        self.phase = PlayerState::Ended;

        if let Some(snapshot) = self.snapshot(position, false) {
            let guid = snapshot.last_guid.clone();
            info!(%guid, "Episode finished");
            self.writer.checkpoint(snapshot);
            self.writer.mark_finished(guid, to_stored(position), now_millis());
        }
        self.publish_at(position);
    }

    async fn shutdown(mut self) {
        if self.current.is_some() {
            let position = self.position();
            let playing = self.phase.is_playing();
            self.checkpoint(position, playing);
            if let Err(error) = self.engine.stop() {
                warn!(%error, "Engine failed to stop");
            }
        }
        self.writer.flush().await;
        debug!("Playback session closed");
    }

    /// Leaving a playing episode is a transition to not-playing for it
    fn leave_current(&mut self) {
        if !self.phase.is_playing() {
            return;
        }
        let position = self.position();
        if let Err(error) = self.engine.pause() {
            warn!(%error, "Engine failed to pause");
        }
        self.checkpoint(position, false);
        self.stop_ticker();
        self.phase = PlayerState::Paused;
    }

    fn load(&mut self, item: NowPlaying, start: u64, duration_hint: u64) -> Result<(), PlaybackError> {
        let source = item.source.clone();
        self.current = Some(item);
        self.duration_hint = duration_hint;
        self.phase = PlayerState::Loading;
        self.heartbeat.reset(start);
        self.publish_at(start);

        self.engine.load(&source, start).map_err(|e| self.failed(e))?;
        self.phase = PlayerState::Ready;
        self.publish_at(start);
        Ok(())
    }

    fn start_playback(&mut self) -> Result<(), PlaybackError> {
        self.engine.play().map_err(|e| self.failed(e))?;
        self.phase = PlayerState::Playing;

        let period = self.settings.tick_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);

        self.publish_at(self.position());
        Ok(())
    }

    fn stop_ticker(&mut self) {
        self.ticker = None;
    }

    fn failed(&mut self, error: EngineError) -> PlaybackError {
        self.stop_ticker();
        self.phase = PlayerState::Error(error.0.clone());
        self.publish_at(self.position());
        PlaybackError::Engine(error)
    }

    fn position(&self) -> u64 {
        if self.current.is_some() {
            self.engine.position_millis()
        } else {
            0
        }
    }

    fn duration(&self) -> u64 {
        self.engine
            .duration_millis()
            .filter(|&d| d > 0)
            .unwrap_or(self.duration_hint)
    }

    fn snapshot(&self, position: u64, playing: bool) -> Option<SessionSnapshot> {
        self.current.as_ref().map(|item| SessionSnapshot {
            last_guid: item.guid.clone(),
            last_position_millis: to_stored(position),
            last_is_playing: playing,
            podcast_url: item.podcast_url.clone(),
        })
    }

    fn checkpoint(&self, position: u64, playing: bool) {
        if let Some(snapshot) = self.snapshot(position, playing) {
            self.writer.checkpoint(snapshot);
        }
    }

    fn publish_at(&self, position: u64) {
        let state = PlayerUiState {
            state: self.phase.clone(),
            now_playing: self.current.clone(),
            ..PlayerUiState::default()
        }
        .with_position(position, self.duration());
        self.ui.send_replace(state);
    }
}
