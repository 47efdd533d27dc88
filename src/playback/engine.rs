use std::fmt;
use std::path::PathBuf;

use crate::error::EngineError;

/// Where the audio for a session comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A completed download on local disk
    LocalFile(PathBuf),
    /// The episode's enclosure URL
    Remote(String),
}

impl MediaSource {
    /// Pick the local file if it is recorded and still on disk, else the network URL
    pub fn resolve(local_file_path: Option<&str>, audio_url: &str) -> Self {
        match local_file_path.map(PathBuf::from) {
            Some(path) if path.exists() => Self::LocalFile(path),
            _ => Self::Remote(audio_url.to_string()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalFile(_))
    }

    /// URI suitable for handing to a media framework
    pub fn uri(&self) -> String {
        match self {
            Self::LocalFile(path) => format!("file://{}", path.display()),
            Self::Remote(url) => url.clone(),
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// What the engine itself reports about the loaded media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Paused,
    Playing,
    Ended,
    Failed(String),
}

/// The single audio playback handle of the process.
///
/// Implemented by the platform layer. Only the playback controller calls it,
/// always from its own task, so implementations need not be `Sync`.
pub trait PlaybackEngine: Send + 'static {
    /// Load `source` and position it at `start_millis` without starting playback
    fn load(&mut self, source: &MediaSource, start_millis: u64) -> Result<(), EngineError>;

    fn play(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    /// Stop and unload the current media
    fn stop(&mut self) -> Result<(), EngineError>;

    fn seek(&mut self, position_millis: u64) -> Result<(), EngineError>;

    fn position_millis(&self) -> u64;

    /// Total length once known
    fn duration_millis(&self) -> Option<u64>;

    fn status(&self) -> EngineStatus;
}

/// Engine for hosts without audio output.
///
/// Accepts every command and reports the position it was last loaded or
/// sought to; time never advances.
#[derive(Debug, Default)]
pub struct NullEngine {
    loaded: bool,
    playing: bool,
    position: u64,
}

impl PlaybackEngine for NullEngine {
    fn load(&mut self, _source: &MediaSource, start_millis: u64) -> Result<(), EngineError> {
        self.loaded = true;
        self.playing = false;
        self.position = start_millis;
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.playing = self.loaded;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        *self = Self::default();
        Ok(())
    }

    fn seek(&mut self, position_millis: u64) -> Result<(), EngineError> {
        self.position = position_millis;
        Ok(())
    }

    fn position_millis(&self) -> u64 {
        self.position
    }

    fn duration_millis(&self) -> Option<u64> {
        None
    }

    fn status(&self) -> EngineStatus {
        match (self.loaded, self.playing) {
            (false, _) => EngineStatus::Idle,
            (true, false) => EngineStatus::Paused,
            (true, true) => EngineStatus::Playing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_engine_holds_its_position() {
        let mut engine = NullEngine::default();
        assert_eq!(engine.status(), EngineStatus::Idle);

        engine.play().unwrap();
        assert_eq!(engine.status(), EngineStatus::Idle);

        engine
            .load(&MediaSource::Remote("https://example.com/a.mp3".to_string()), 4_000)
            .unwrap();
        engine.play().unwrap();
        engine.seek(9_000).unwrap();
        assert_eq!(engine.status(), EngineStatus::Playing);
        assert_eq!(engine.position_millis(), 9_000);

        engine.stop().unwrap();
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.position_millis(), 0);
    }

    #[test]
    fn resolve_prefers_existing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let source = MediaSource::resolve(path.to_str(), "https://example.com/ep.mp3");
        assert_eq!(source, MediaSource::LocalFile(path.clone()));
        assert_eq!(source.uri(), format!("file://{}", path.display()));
    }

    #[test]
    fn resolve_falls_back_when_file_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deleted.mp3");

        let source = MediaSource::resolve(path.to_str(), "https://example.com/ep.mp3");
        assert_eq!(source, MediaSource::Remote("https://example.com/ep.mp3".to_string()));
        assert!(!source.is_local());
    }

    #[test]
    fn resolve_uses_network_without_download() {
        let source = MediaSource::resolve(None, "https://example.com/ep.mp3");
        assert_eq!(source.uri(), "https://example.com/ep.mp3");
    }
}
