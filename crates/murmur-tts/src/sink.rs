//! Audio output sink — the single shared playback device.
//!
//! [`AudioSink`] decouples the playback controller from any specific audio
//! backend. The default [`RodioSink`] plays through the system output device;
//! hosts can substitute a network sink, and tests inject an in-memory one.
//!
//! `rodio::OutputStream` is `!Send` on some platforms, so [`RodioSink`]
//! confines it to a dedicated OS thread and proxies every operation through
//! an `mpsc` channel. The public handle is plain `Send + Sync`.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TtsError;
use crate::pipeline::AudioPayload;

/// Callback invoked exactly once when playback finishes naturally (the sink
/// drains). Never invoked when [`AudioSink::stop`] interrupts playback.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over the shared audio output sink.
///
/// All methods take `&self`; implementations use interior mutability so the
/// trait stays object-safe behind `Arc<dyn AudioSink>`.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Load an artifact payload and start playing it.
    ///
    /// Resolves once the sink has accepted the audio and playback has
    /// started at the given rate; a returned error means playback never
    /// started (the artifact is counted as done, not retried). `on_done`
    /// fires when the audio drains naturally.
    async fn play(
        &self,
        payload: &AudioPayload,
        rate: f32,
        on_done: CompletionCallback,
    ) -> Result<(), TtsError>;

    /// Stop playback immediately and rewind to position zero. The pending
    /// completion callback, if any, is dropped unfired.
    fn stop(&self);

    /// Whether audio is currently playing.
    fn is_playing(&self) -> bool;

    /// Play a short audible failure cue. Best-effort; errors are swallowed.
    fn error_cue(&self);
}

// ── Rodio-backed implementation ────────────────────────────────────

enum SinkCommand {
    Play {
        bytes: Vec<u8>,
        rate: f32,
        on_done: CompletionCallback,
        reply: mpsc::Sender<Result<(), TtsError>>,
    },
    Stop,
    IsPlaying {
        reply: mpsc::Sender<bool>,
    },
    ErrorCue,
    Shutdown,
}

/// System audio output via `rodio`, confined to a dedicated OS thread.
pub struct RodioSink {
    cmd_tx: mpsc::Sender<SinkCommand>,
    http: reqwest::Client,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioSink {
    /// Spawn the audio thread and open the default output device.
    pub fn new() -> Result<Self, TtsError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<SinkCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), TtsError>>();

        let thread = thread::Builder::new()
            .name("murmur-audio".into())
            .spawn(move || audio_thread(&cmd_rx, &init_tx))
            .map_err(|e| TtsError::Playback(format!("failed to spawn audio thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| TtsError::Playback("audio thread died during init".to_string()))??;

        Ok(Self {
            cmd_tx,
            http: reqwest::Client::new(),
            thread: Some(thread),
        })
    }

    /// Resolve a payload to encoded audio bytes, fetching URL references.
    async fn payload_bytes(&self, payload: &AudioPayload) -> Result<Vec<u8>, TtsError> {
        match payload {
            AudioPayload::Bytes(bytes) => Ok(bytes.clone()),
            AudioPayload::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| TtsError::Playback(format!("fetching '{url}': {e}")))?;
                if !response.status().is_success() {
                    return Err(TtsError::Playback(format!(
                        "fetching '{url}': HTTP {}",
                        response.status()
                    )));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| TtsError::Playback(format!("reading '{url}': {e}")))?;
                Ok(bytes.to_vec())
            }
        }
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(
        &self,
        payload: &AudioPayload,
        rate: f32,
        on_done: CompletionCallback,
    ) -> Result<(), TtsError> {
        let bytes = self.payload_bytes(payload).await?;

        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(SinkCommand::Play {
                bytes,
                rate,
                on_done,
                reply: tx,
            })
            .map_err(|_| TtsError::Playback("audio thread is gone".to_string()))?;
        rx.recv()
            .map_err(|_| TtsError::Playback("audio thread is gone".to_string()))?
    }

    fn stop(&self) {
        let _ = self.cmd_tx.send(SinkCommand::Stop);
    }

    fn is_playing(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        if self.cmd_tx.send(SinkCommand::IsPlaying { reply: tx }).is_err() {
            return false;
        }
        rx.recv().unwrap_or(false)
    }

    fn error_cue(&self) {
        let _ = self.cmd_tx.send(SinkCommand::ErrorCue);
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SinkCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

// ── Audio thread body ──────────────────────────────────────────────

/// Playback state owned by the audio thread. The `active` flag belongs to a
/// single playback; `stop` clears it so the drain watcher for a superseded
/// playback can never fire its callback or confuse a newer one.
struct CurrentPlayback {
    sink: Arc<rodio::Sink>,
    active: Arc<AtomicBool>,
}

fn audio_thread(cmd_rx: &mpsc::Receiver<SinkCommand>, init_tx: &mpsc::Sender<Result<(), TtsError>>) {
    let (stream, handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init_tx.send(Err(TtsError::Playback(format!(
                "no audio output device: {e}"
            ))));
            return;
        }
    };
    // Keep the stream alive for the lifetime of the thread.
    let _stream = stream;

    if init_tx.send(Ok(())).is_err() {
        return;
    }

    let mut current: Option<CurrentPlayback> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            SinkCommand::Play {
                bytes,
                rate,
                on_done,
                reply,
            } => {
                stop_current(&mut current);
                let _ = reply.send(start_playback(&handle, bytes, rate, on_done, &mut current));
            }

            SinkCommand::Stop => stop_current(&mut current),

            SinkCommand::IsPlaying { reply } => {
                let playing = current
                    .as_ref()
                    .is_some_and(|c| c.active.load(Ordering::SeqCst) && !c.sink.empty());
                let _ = reply.send(playing);
            }

            SinkCommand::ErrorCue => play_error_cue(&handle),

            SinkCommand::Shutdown => break,
        }
    }

    stop_current(&mut current);
    tracing::debug!("Audio thread shutting down");
}

fn stop_current(current: &mut Option<CurrentPlayback>) {
    if let Some(playback) = current.take() {
        playback.active.store(false, Ordering::SeqCst);
        playback.sink.stop();
    }
}

fn start_playback(
    handle: &rodio::OutputStreamHandle,
    bytes: Vec<u8>,
    rate: f32,
    on_done: CompletionCallback,
    current: &mut Option<CurrentPlayback>,
) -> Result<(), TtsError> {
    let source = rodio::Decoder::new(Cursor::new(bytes))
        .map_err(|e| TtsError::Playback(format!("undecodable audio payload: {e}")))?;

    let sink = rodio::Sink::try_new(handle)
        .map_err(|e| TtsError::Playback(format!("failed to open playback sink: {e}")))?;
    sink.set_speed(rate.max(0.1));
    sink.append(source);

    let sink = Arc::new(sink);
    let active = Arc::new(AtomicBool::new(true));
    *current = Some(CurrentPlayback {
        sink: Arc::clone(&sink),
        active: Arc::clone(&active),
    });

    // Drain watcher: `sleep_until_end` returns when the queue empties or
    // `stop()` drops the sources. Only a natural drain fires the callback.
    thread::spawn(move || {
        sink.sleep_until_end();
        if active.swap(false, Ordering::SeqCst) {
            tracing::debug!("Playback finished naturally");
            on_done();
        }
    });

    Ok(())
}

fn play_error_cue(handle: &rodio::OutputStreamHandle) {
    use rodio::Source;

    let Ok(sink) = rodio::Sink::try_new(handle) else {
        return;
    };
    let tone = rodio::source::SineWave::new(660.0)
        .take_duration(Duration::from_millis(250))
        .amplify(0.25);
    sink.append(tone);
    sink.detach();
}
