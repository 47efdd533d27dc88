//! Shared fixtures for unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::http::{ByteStream, HttpClient, HttpResponse};
use crate::notify::{Notification, Notifier};
use crate::playback::{EngineStatus, MediaSource, PlaybackEngine};
use crate::store::{Episode, Podcast};

pub fn make_podcast(url: &str, title: &str) -> Podcast {
    Podcast {
        url: url.to_string(),
        title: title.to_string(),
        image_url: None,
    }
}

pub fn make_episode(guid: &str, podcast_url: &str, pub_date: i64) -> Episode {
    Episode {
        guid: guid.to_string(),
        podcast_url: podcast_url.to_string(),
        title: format!("Episode {guid}"),
        description: String::new(),
        pub_date,
        audio_url: format!("https://example.com/{guid}.mp3"),
        duration: 0,
        progress_in_millis: 0,
        local_file_path: None,
        finished_at: None,
    }
}

/// An error of the type reqwest hands out, without touching the network
pub fn request_error() -> reqwest::Error {
    reqwest::Client::new()
        .get("http://[invalid")
        .build()
        .unwrap_err()
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
    fail_mid_stream: bool,
}

/// In-memory `HttpClient` serving canned responses by URL.
///
/// Unknown URLs fail like an unreachable host.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    routes: Arc<Mutex<HashMap<String, Route>>>,
    requests: Arc<Mutex<Vec<String>>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_status(url, 200, body)
    }

    pub fn with_status(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.set_route(
            url,
            Route {
                status,
                body: body.into(),
                fail_mid_stream: false,
            },
        );
        self
    }

    /// Serve the first half of `body`, then break the connection
    pub fn with_broken_stream(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.set_route(
            url,
            Route {
                status: 200,
                body: body.into(),
                fail_mid_stream: true,
            },
        );
        self
    }

    /// Hold every streaming response until the returned semaphore gets permits
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Replace the body served for `url`
    pub fn set_body(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.set_route(
            url,
            Route {
                status: 200,
                body: body.into(),
                fail_mid_stream: false,
            },
        );
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }

    fn set_route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    fn lookup(&self, url: &str) -> Option<Route> {
        self.requests.lock().unwrap().push(url.to_string());
        self.routes.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, reqwest::Error> {
        match self.lookup(url) {
            Some(route) if (200..300).contains(&route.status) => Ok(Bytes::from(route.body)),
            _ => Err(request_error()),
        }
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        let route = self.lookup(url).ok_or_else(request_error)?;
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        let content_length = Some(route.body.len() as u64);
        let body: ByteStream = if route.fail_mid_stream {
            let half = Bytes::from(route.body[..route.body.len() / 2].to_vec());
            Box::pin(futures::stream::iter(vec![Ok(half), Err(request_error())]))
        } else {
            let (first, second) = route.body.split_at(route.body.len() / 2);
            Box::pin(futures::stream::iter(vec![
                Ok(Bytes::from(first.to_vec())),
                Ok(Bytes::from(second.to_vec())),
            ]))
        };

        Ok(HttpResponse {
            status: route.status,
            content_length,
            body,
        })
    }
}

/// Notifier that keeps everything it is told
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.events.lock().unwrap().push(notification);
    }
}

#[derive(Debug, Default)]
struct FakeEngineState {
    loaded: Option<(MediaSource, u64)>,
    playing: bool,
    position: u64,
    duration: Option<u64>,
    status: Option<EngineStatus>,
    fail_next_load: Option<String>,
}

/// Playback engine whose position is moved by the test, not by time
pub struct FakeEngine {
    state: Arc<Mutex<FakeEngineState>>,
}

/// Test-side view of a [`FakeEngine`]
#[derive(Clone)]
pub struct FakeEngineHandle {
    state: Arc<Mutex<FakeEngineState>>,
}

impl FakeEngine {
    pub fn new(duration: Option<u64>) -> (Self, FakeEngineHandle) {
        let state = Arc::new(Mutex::new(FakeEngineState {
            duration,
            ..FakeEngineState::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            FakeEngineHandle { state },
        )
    }
}

impl FakeEngineHandle {
    pub fn set_position(&self, position: u64) {
        self.state.lock().unwrap().position = position;
    }

    pub fn position(&self) -> u64 {
        self.state.lock().unwrap().position
    }

    pub fn loaded(&self) -> Option<(MediaSource, u64)> {
        self.state.lock().unwrap().loaded.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    /// Play through to the end of the media
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        state.position = state.duration.unwrap_or(state.position);
        state.playing = false;
        state.status = Some(EngineStatus::Ended);
    }

    pub fn fail(&self, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.playing = false;
        state.status = Some(EngineStatus::Failed(message.to_string()));
    }

    pub fn fail_next_load(&self, message: &str) {
        self.state.lock().unwrap().fail_next_load = Some(message.to_string());
    }
}

impl PlaybackEngine for FakeEngine {
    fn load(&mut self, source: &MediaSource, start_millis: u64) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next_load.take() {
            return Err(EngineError(message));
        }
        state.loaded = Some((source.clone(), start_millis));
        state.position = start_millis;
        state.playing = false;
        state.status = None;
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.state.lock().unwrap().playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.state.lock().unwrap().playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.loaded = None;
        state.playing = false;
        state.position = 0;
        state.status = None;
        Ok(())
    }

    fn seek(&mut self, position_millis: u64) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.position = position_millis;
        if state.status == Some(EngineStatus::Ended) {
            state.status = None;
        }
        Ok(())
    }

    fn position_millis(&self) -> u64 {
        self.state.lock().unwrap().position
    }

    fn duration_millis(&self) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.loaded.as_ref().and(state.duration)
    }

    fn status(&self) -> EngineStatus {
        let state = self.state.lock().unwrap();
        match &state.status {
            Some(status) => status.clone(),
            None if state.loaded.is_none() => EngineStatus::Idle,
            None if state.playing => EngineStatus::Playing,
            None => EngineStatus::Paused,
        }
    }
}
