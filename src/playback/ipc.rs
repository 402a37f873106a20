//! mpv JSON IPC control channel
//!
//! Newline-delimited JSON over a unix socket (named pipe on Windows) that mpv
//! creates itself. Requests carry a `request_id`; everything without one is an
//! event. A reader task decodes events into [`ControlEvent`]s and routes
//! responses back to waiting requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::{PlaybackError, Result};
use crate::models::ControlEvent;

/// Properties observed for every session
pub const BASE_PROPERTIES: &[&str] = &[
    "mute",
    "pause",
    "duration",
    "volume",
    "filename",
    "path",
    "media-title",
    "playlist-pos",
    "playlist-count",
    "loop",
];

/// Properties only meaningful when video is shown
pub const VIDEO_PROPERTIES: &[&str] = &["fullscreen", "sub-visibility"];

const TIME_POS: &str = "time-pos";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_START: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Properties to observe, in observation-id order
pub fn observed_properties(audio_only: bool) -> Vec<&'static str> {
    let mut props = BASE_PROPERTIES.to_vec();
    if !audio_only {
        props.extend_from_slice(VIDEO_PROPERTIES);
    }
    props
}

/// Fixed per-platform control endpoint
pub fn default_endpoint() -> String {
    if cfg!(windows) {
        r"\\.\pipe\mpvserver".to_string()
    } else {
        "/tmp/mpvserver.sock".to_string()
    }
}

/// Seek reference point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Absolute,
    Relative,
}

impl SeekMode {
    fn as_str(&self) -> &'static str {
        match self {
            SeekMode::Absolute => "absolute",
            SeekMode::Relative => "relative",
        }
    }
}

/// Player commands the position tracker needs
#[async_trait]
pub trait PlayerControl: Send + Sync {
    async fn seek(&self, seconds: f64, mode: SeekMode) -> Result<()>;
    async fn add_subtitle(&self, url: &str, title: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct Request {
    command: Vec<Value>,
    request_id: u64,
}

/// Any line mpv sends: a response, an event, or both shapes merged
#[derive(Debug, Default, Deserialize)]
struct Message {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    request_id: Option<u64>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection to a running mpv instance
pub struct ControlChannel {
    writer: tokio::sync::Mutex<Option<Writer>>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Connect to the player's endpoint, retrying until `window` elapses
    ///
    /// The player creates the endpoint some time after spawning, so early
    /// failures are expected.
    pub async fn connect(
        endpoint: &str,
        window: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControlEvent>)> {
        let deadline = Instant::now() + window;
        let mut delay = BACKOFF_START;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match open_endpoint(endpoint).await {
                Ok(channel) => {
                    info!(endpoint, attempts, "control channel connected");
                    return Ok(channel);
                }
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PlaybackError::ControlChannelUnavailable(format!(
                            "{} after {} attempts: {}",
                            endpoint, attempts, e
                        )));
                    }
                    trace!(endpoint, error = %e, "control endpoint not ready");
                    sleep(delay.min(deadline - now)).await;
                    delay = (delay * 2).min(BACKOFF_MAX);
                }
            }
        }
    }

    /// Wrap an already-open duplex stream
    pub fn from_stream<S>(stream: S) -> (Self, mpsc::UnboundedReceiver<ControlEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(read_half, tx, pending.clone(), closed.clone()));

        let channel = Self {
            writer: tokio::sync::Mutex::new(Some(Box::new(write_half))),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader: Mutex::new(Some(reader)),
        };
        (channel, rx)
    }

    /// Send a raw command and wait for its response payload
    pub async fn command(&self, args: Vec<Value>) -> Result<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PlaybackError::ProcessCrashed);
        }

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Request {
            command: args,
            request_id,
        })
        .map_err(|e| PlaybackError::Ipc(e.to_string()))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(w) => {
                    async {
                        w.write_all(line.as_bytes()).await?;
                        w.flush().await
                    }
                    .await
                }
                None => Err(std::io::ErrorKind::NotConnected.into()),
            }
        };
        if let Err(e) = written {
            lock(&self.pending).remove(&request_id);
            debug!(error = %e, "control write failed");
            return Err(PlaybackError::ProcessCrashed);
        }

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PlaybackError::ProcessCrashed),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                Err(PlaybackError::Ipc(format!("request {} timed out", request_id)))
            }
        }
    }

    pub async fn observe_property(&self, id: u64, name: &str) -> Result<()> {
        self.command(vec![json!("observe_property"), json!(id), json!(name)])
            .await
            .map(|_| ())
    }

    /// Observe the standard property set plus `time-pos`
    pub async fn observe_defaults(&self, audio_only: bool) -> Result<()> {
        let props = observed_properties(audio_only);
        for (i, name) in props.iter().enumerate() {
            self.observe_property(i as u64 + 1, name).await?;
        }
        self.observe_property(props.len() as u64 + 1, TIME_POS).await
    }

    /// Whether a file is already playing
    ///
    /// `time-pos` is unavailable until mpv has loaded a file, so a
    /// `file-loaded` that happened before the channel connected shows up here.
    pub async fn has_loaded_file(&self) -> bool {
        match self.command(vec![json!("get_property"), json!(TIME_POS)]).await {
            Ok(value) => !value.is_null(),
            Err(e) => {
                trace!(error = %e, "no file loaded yet");
                false
            }
        }
    }

    /// Start (unpause) playback
    pub async fn play(&self) -> Result<()> {
        self.command(vec![json!("set_property"), json!("pause"), json!(false)])
            .await
            .map(|_| ())
    }

    pub async fn quit(&self) -> Result<()> {
        match self.command(vec![json!("quit")]).await {
            // mpv may hang up before answering a quit
            Err(PlaybackError::ProcessCrashed) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    /// Stop the reader and drop the connection; pending requests fail
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        lock(&self.pending).clear();
        debug!("control channel closed");
    }
}

#[async_trait]
impl PlayerControl for ControlChannel {
    async fn seek(&self, seconds: f64, mode: SeekMode) -> Result<()> {
        self.command(vec![json!("seek"), json!(seconds), json!(mode.as_str())])
            .await
            .map(|_| ())
    }

    async fn add_subtitle(&self, url: &str, title: &str) -> Result<()> {
        self.command(vec![
            json!("sub-add"),
            json!(url),
            json!("select"),
            json!(title),
        ])
        .await
        .map(|_| ())
    }
}

#[cfg(unix)]
async fn open_endpoint(
    endpoint: &str,
) -> std::io::Result<(ControlChannel, mpsc::UnboundedReceiver<ControlEvent>)> {
    let stream = tokio::net::UnixStream::connect(endpoint).await?;
    Ok(ControlChannel::from_stream(stream))
}

#[cfg(windows)]
async fn open_endpoint(
    endpoint: &str,
) -> std::io::Result<(ControlChannel, mpsc::UnboundedReceiver<ControlEvent>)> {
    let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(endpoint)?;
    Ok(ControlChannel::from_stream(pipe))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn read_loop<R>(
    read_half: R,
    events: mpsc::UnboundedSender<ControlEvent>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(read_half).lines();
    let mut decoder = EventDecoder::default();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "control channel read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg: Message = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, %line, "ignoring malformed control message");
                continue;
            }
        };

        if msg.event.is_none() {
            if let Some(id) = msg.request_id {
                // Unknown or duplicate ids are dropped
                if let Some(tx) = lock(&pending).remove(&id) {
                    let _ = tx.send(response_result(&msg));
                }
                continue;
            }
        }

        for event in decoder.decode(&msg) {
            if events.send(event).is_err() {
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    lock(&pending).clear();
    if let Some(event) = decoder.finish() {
        let _ = events.send(event);
    }
    debug!("control reader finished");
}

fn response_result(msg: &Message) -> Result<Value> {
    match msg.error.as_deref() {
        None | Some("success") => Ok(msg.data.clone().unwrap_or(Value::Null)),
        Some(err) => Err(PlaybackError::Ipc(err.to_string())),
    }
}

/// Turns raw mpv events into control events
///
/// Seeks are reported by mpv as `seek` followed by `playback-restart`; the
/// first `time-pos` after the restart closes the seek with its end marker.
#[derive(Debug, Default)]
struct EventDecoder {
    last_time: Option<f64>,
    seek_start: Option<f64>,
    seeking: bool,
    awaiting_seek_end: bool,
    crashed: bool,
}

impl EventDecoder {
    fn decode(&mut self, msg: &Message) -> Vec<ControlEvent> {
        let Some(event) = msg.event.as_deref() else {
            return Vec::new();
        };

        match event {
            "property-change" => self.property_change(msg),
            "file-loaded" => vec![ControlEvent::Started],
            "seek" => {
                self.seeking = true;
                self.seek_start = self.last_time;
                Vec::new()
            }
            "playback-restart" if self.seeking => {
                self.seeking = false;
                self.awaiting_seek_end = true;
                Vec::new()
            }
            "shutdown" => self.finish().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn property_change(&mut self, msg: &Message) -> Vec<ControlEvent> {
        let Some(name) = msg.name.as_deref() else {
            return Vec::new();
        };

        if name == TIME_POS {
            let Some(secs) = msg.data.as_ref().and_then(Value::as_f64) else {
                return Vec::new();
            };
            self.last_time = Some(secs);
            let mut out = Vec::with_capacity(2);
            if self.awaiting_seek_end {
                self.awaiting_seek_end = false;
                out.push(ControlEvent::Seeked {
                    start: self.seek_start.take(),
                    end: Some(secs),
                });
            }
            out.push(ControlEvent::TimePosition(secs));
            return out;
        }

        if BASE_PROPERTIES.contains(&name) || VIDEO_PROPERTIES.contains(&name) {
            return vec![ControlEvent::PropertyChanged {
                name: name.to_string(),
                value: msg.data.clone().unwrap_or(Value::Null),
            }];
        }
        Vec::new()
    }

    /// The crash event, emitted at most once
    fn finish(&mut self) -> Option<ControlEvent> {
        if self.crashed {
            return None;
        }
        self.crashed = true;
        Some(ControlEvent::Crashed)
    }
}
