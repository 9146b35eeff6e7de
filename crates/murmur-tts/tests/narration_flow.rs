//! Integration tests for the narration pipeline.
//!
//! These drive the [`Narrator`] end-to-end with mock providers, a mock audio
//! sink, and an in-memory chat log. No audio hardware or network access is
//! required — the mocks return canned responses instantly.
//!
//! # What is tested
//!
//! - FIFO order preservation across a mid-sequence job failure
//! - Streaming fan-out (one job, N artifacts, yield order)
//! - Voice resolution: disabled speaker, unknown voice, default fallback
//! - Paragraph splitting into multiple jobs
//! - Reset correctness with work queued and playback in flight
//! - Stale provider responses discarded after a reset
//! - Retention + replay of message-bound audio
//! - Message-event dedup and user-message filtering
//! - Playback start failures advancing the queue with an audible cue

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use murmur_core::chat::{ChatMessage, MessageId};
use murmur_core::events::UiEvent;
use murmur_core::ports::{ChatLog, InMemoryChatLog, UiEventEmitter};
use murmur_core::settings::NarrationSettings;
use murmur_tts::{
    AudioPayload, AudioSink, CompletionCallback, GenerationState, Narrator, PlaybackState,
    TtsError, TtsProvider, TtsResponse, Voice, VoiceSelector,
};
use murmur_tts::voices::DEFAULT_VOICE_KEY;

// ── Mock provider ──────────────────────────────────────────────────

/// Records every generate call and encodes `voice|text` into the payload so
/// tests can assert order and routing from the sink side.
struct MockProvider {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    fail_on: Option<String>,
    stream_chunks: Option<usize>,
}

impl MockProvider {
    fn new(calls: Arc<Mutex<Vec<(String, String)>>>) -> Self {
        Self {
            calls,
            fail_on: None,
            stream_chunks: None,
        }
    }

    fn failing_on(calls: Arc<Mutex<Vec<(String, String)>>>, marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Self::new(calls)
        }
    }

    fn streaming(calls: Arc<Mutex<Vec<(String, String)>>>, chunks: usize) -> Self {
        Self {
            stream_chunks: Some(chunks),
            ..Self::new(calls)
        }
    }
}

#[async_trait]
impl TtsProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn load_settings(&mut self, _block: &serde_json::Value) -> Result<(), TtsError> {
        Ok(())
    }

    async fn check_ready(&self) -> Result<(), TtsError> {
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, TtsError> {
        Ok(vec![
            Voice::new("v-alpha", "Alpha", "en-US"),
            Voice::new("v-beta", "Beta", "en-US"),
        ])
    }

    async fn generate(&self, text: &str, voice_id: &str) -> Result<TtsResponse, TtsError> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice_id.to_string()));

        if let Some(marker) = &self.fail_on {
            if text.contains(marker) {
                return Err(TtsError::Api("mock generation failure".to_string()));
            }
        }

        if let Some(chunks) = self.stream_chunks {
            let payloads: Vec<Result<AudioPayload, TtsError>> = (0..chunks)
                .map(|i| Ok(AudioPayload::Bytes(vec![u8::try_from(i).unwrap()])))
                .collect();
            return Ok(TtsResponse::from_chunks(payloads));
        }

        Ok(TtsResponse::bytes(
            format!("{voice_id}|{text}").into_bytes(),
        ))
    }
}

/// A provider whose generate call blocks until the test releases it. Used to
/// put a reset between request issue and response arrival.
struct GatedProvider {
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl TtsProvider for GatedProvider {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn load_settings(&mut self, _block: &serde_json::Value) -> Result<(), TtsError> {
        Ok(())
    }

    async fn check_ready(&self) -> Result<(), TtsError> {
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, TtsError> {
        Ok(vec![Voice::new("v-alpha", "Alpha", "en-US")])
    }

    async fn generate(&self, _text: &str, _voice_id: &str) -> Result<TtsResponse, TtsError> {
        self.gate.notified().await;
        Ok(TtsResponse::bytes(b"late response".to_vec()))
    }
}

// ── Mock sink ──────────────────────────────────────────────────────

#[derive(Default)]
struct SinkState {
    played: Vec<AudioPayload>,
    pending: Vec<CompletionCallback>,
    stops: usize,
    cues: usize,
}

/// In-memory audio sink. In auto-complete mode every play finishes
/// immediately; in manual mode completions are held until the test fires
/// them (or a stop drops them).
struct MockSink {
    state: Mutex<SinkState>,
    auto_complete: bool,
    fail_play: bool,
}

impl MockSink {
    fn auto() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SinkState::default()),
            auto_complete: true,
            fail_play: false,
        })
    }

    fn manual() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SinkState::default()),
            auto_complete: false,
            fail_play: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SinkState::default()),
            auto_complete: true,
            fail_play: true,
        })
    }

    fn played_strings(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .played
            .iter()
            .map(|payload| match payload {
                AudioPayload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                AudioPayload::Url(url) => url.clone(),
            })
            .collect()
    }

    fn played_count(&self) -> usize {
        self.state.lock().unwrap().played.len()
    }

    fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    fn cues(&self) -> usize {
        self.state.lock().unwrap().cues
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(
        &self,
        payload: &AudioPayload,
        _rate: f32,
        on_done: CompletionCallback,
    ) -> Result<(), TtsError> {
        if self.fail_play {
            return Err(TtsError::Playback("mock sink refuses to play".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.played.push(payload.clone());
        if self.auto_complete {
            drop(state);
            on_done();
        } else {
            state.pending.push(on_done);
        }
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending.clear();
        state.stops += 1;
    }

    fn is_playing(&self) -> bool {
        !self.state.lock().unwrap().pending.is_empty()
    }

    fn error_cue(&self) {
        self.state.lock().unwrap().cues += 1;
    }
}

// ── Event collector ────────────────────────────────────────────────

#[derive(Clone, Default)]
struct CollectingEmitter {
    events: Arc<Mutex<Vec<UiEvent>>>,
}

impl UiEventEmitter for CollectingEmitter {
    fn emit(&self, event: UiEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn clone_box(&self) -> Box<dyn UiEventEmitter> {
        Box::new(self.clone())
    }
}

fn failures(events: &Arc<Mutex<Vec<UiEvent>>>) -> Vec<UiEvent> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, UiEvent::GenerationFailed { .. }))
        .cloned()
        .collect()
}

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    narrator: Narrator,
    chat: Arc<InMemoryChatLog>,
    sink: Arc<MockSink>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    events: Arc<Mutex<Vec<UiEvent>>>,
}

/// Opt-in pipeline logs for debugging: `RUST_LOG=murmur_tts=debug`.
fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    /// Texts the provider was asked to speak, in call order.
    fn generated_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }
}

async fn harness_with(
    build_provider: impl FnOnce(Arc<Mutex<Vec<(String, String)>>>) -> Box<dyn TtsProvider>,
    sink: Arc<MockSink>,
    tweak: impl FnOnce(&mut NarrationSettings),
) -> Harness {
    init_test_logging();

    let mut settings = NarrationSettings::default();
    settings.enabled = true;
    settings.auto_generation = true;
    tweak(&mut settings);

    let chat = Arc::new(InMemoryChatLog::new("chat-1"));
    let emitter = CollectingEmitter::default();
    let events = Arc::clone(&emitter.events);
    let calls: Arc<Mutex<Vec<(String, String)>>> = Arc::default();

    let narrator = Narrator::new(
        Arc::clone(&chat) as Arc<dyn ChatLog>,
        Arc::clone(&sink) as Arc<dyn AudioSink>,
        Arc::new(emitter),
        settings,
    );
    narrator.install_provider(build_provider(Arc::clone(&calls))).await;
    narrator.set_voice_entry(DEFAULT_VOICE_KEY, VoiceSelector::Voice("Alpha".to_string()));

    Harness {
        narrator,
        chat,
        sink,
        calls,
        events,
    }
}

async fn default_harness() -> Harness {
    harness_with(
        |calls| Box::new(MockProvider::new(calls)),
        MockSink::auto(),
        |_| {},
    )
    .await
}

/// Alternate ticks and yields so spawned generation tasks get to run.
async fn tick_and_yield(narrator: &Narrator, times: usize) {
    for _ in 0..times {
        narrator.tick().await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn surviving_jobs_play_in_order_around_a_failure() {
    let h = harness_with(
        |calls| Box::new(MockProvider::failing_on(calls, "FAIL")),
        MockSink::auto(),
        |_| {},
    )
    .await;

    h.chat.push(ChatMessage::new("Aria", "First message."));
    h.chat.push(ChatMessage::new("Bram", "FAIL on this one"));
    h.chat.push(ChatMessage::new("Aria", "Third message."));

    h.narrator.narrate_all().await;
    h.narrator.run_until_settled().await;

    assert_eq!(
        h.sink.played_strings(),
        vec![
            "v-alpha|First message.".to_string(),
            "v-alpha|Third message.".to_string(),
        ]
    );

    let failed = failures(&h.events);
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0],
        UiEvent::GenerationFailed { message_id: MessageId(1), .. }
    ));
    assert_eq!(h.sink.cues(), 1);
    assert!(!h.narrator.is_processing().await);
}

#[tokio::test]
async fn streaming_response_fans_out_in_yield_order() {
    let h = harness_with(
        |calls| Box::new(MockProvider::streaming(calls, 3)),
        MockSink::auto(),
        |_| {},
    )
    .await;

    h.narrator.speak("Hello streaming world", None).await;
    h.narrator.run_until_settled().await;

    let played = h.sink.state.lock().unwrap().played.clone();
    assert_eq!(
        played,
        vec![
            AudioPayload::Bytes(vec![0]),
            AudioPayload::Bytes(vec![1]),
            AudioPayload::Bytes(vec![2]),
        ]
    );
    assert_eq!(h.narrator.generation_state().await, GenerationState::Idle);
    assert!(failures(&h.events).is_empty());
}

#[tokio::test]
async fn disabled_speaker_yields_no_artifacts_and_no_errors() {
    let h = default_harness().await;
    h.narrator.set_voice_entry("Mute", VoiceSelector::Disabled);

    let id = h.chat.push(ChatMessage::new("Mute", "You will not hear this."));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;

    assert_eq!(h.sink.played_count(), 0);
    assert!(failures(&h.events).is_empty());
    assert_eq!(h.sink.cues(), 0);
    assert!(h.generated_texts().is_empty());
}

#[tokio::test]
async fn unknown_voice_reports_exactly_one_failure() {
    let h = default_harness().await;
    h.narrator
        .set_voice_entry("Aria", VoiceSelector::Voice("ghost-voice".to_string()));

    let id = h.chat.push(ChatMessage::new("Aria", "Where is my voice?"));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;

    assert_eq!(h.sink.played_count(), 0);
    let failed = failures(&h.events);
    assert_eq!(failed.len(), 1);
    let UiEvent::GenerationFailed { message_id, error } = &failed[0] else {
        panic!("expected a generation failure");
    };
    assert_eq!(*message_id, id);
    assert!(error.contains("ghost-voice"), "unexpected error: {error}");
    assert_eq!(h.sink.cues(), 1);
}

#[tokio::test]
async fn absent_speaker_falls_back_to_default_voice() {
    let h = default_harness().await;
    h.narrator
        .set_voice_entry(DEFAULT_VOICE_KEY, VoiceSelector::Voice("Beta".to_string()));

    let id = h.chat.push(ChatMessage::new("Stranger", "Who am I?"));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;

    assert_eq!(h.sink.played_strings(), vec!["v-beta|Who am I?".to_string()]);
}

#[tokio::test]
async fn paragraph_mode_creates_one_job_per_paragraph() {
    let h = harness_with(
        |calls| Box::new(MockProvider::new(calls)),
        MockSink::auto(),
        |settings| settings.narrate_by_paragraphs = true,
    )
    .await;

    let id = h.chat.push(ChatMessage::new("Aria", "Line one\n\nLine two"));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;

    assert_eq!(
        h.generated_texts(),
        vec!["Line one".to_string(), "Line two".to_string()]
    );
    assert_eq!(h.sink.played_count(), 2);
}

#[tokio::test]
async fn reset_clears_queues_and_stops_playback() {
    let h = harness_with(
        |calls| Box::new(MockProvider::new(calls)),
        MockSink::manual(),
        |_| {},
    )
    .await;

    for i in 0..4 {
        h.chat.push(ChatMessage::new("Aria", format!("Message number {i}.")));
    }
    h.narrator.narrate_all().await;

    // Let generation run ahead while the first artifact stays mid-playback.
    tick_and_yield(&h.narrator, 6).await;
    assert_eq!(h.sink.played_count(), 1);
    assert_eq!(h.narrator.playback_state().await, PlaybackState::Playing);
    assert!(h.narrator.is_processing().await);

    h.narrator.reset().await;

    assert!(!h.narrator.is_processing().await);
    assert_eq!(h.narrator.generation_state().await, GenerationState::Idle);
    assert_eq!(h.narrator.playback_state().await, PlaybackState::Idle);
    assert!(h.sink.stops() >= 1);
    assert!(!h.sink.is_playing());

    // Nothing left to play after the reset.
    h.narrator.run_until_settled().await;
    assert_eq!(h.sink.played_count(), 1);
}

#[tokio::test]
async fn stale_provider_response_is_discarded_after_reset() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let gate_clone = Arc::clone(&gate);
    let h = harness_with(
        move |_calls| Box::new(GatedProvider { gate: gate_clone }),
        MockSink::auto(),
        |_| {},
    )
    .await;

    let id = h.chat.push(ChatMessage::new("Aria", "Doomed narration"));
    h.narrator.handle_message_rendered(id).await;

    // Dequeue the job and issue the (gated) provider request.
    h.narrator.tick().await;
    tokio::task::yield_now().await;

    h.narrator.reset().await;
    gate.notify_one();

    h.narrator.run_until_settled().await;

    assert_eq!(h.sink.played_count(), 0);
    assert!(failures(&h.events).is_empty());
    assert!(!h.narrator.is_processing().await);
}

#[tokio::test]
async fn message_bound_audio_is_retained_and_replayable() {
    let h = default_harness().await;

    let id = h.chat.push(ChatMessage::new("Aria", "Keep this around."));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;

    assert_eq!(h.sink.played_count(), 1);
    assert!(h.narrator.retained_audio(id).await.is_some());
    assert!(
        h.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, UiEvent::NarrationReady { message_id } if *message_id == id))
    );

    h.narrator.replay(id).await;
    h.narrator.run_until_settled().await;
    assert_eq!(h.sink.played_count(), 2);
}

#[tokio::test]
async fn replay_without_retained_audio_warns() {
    let h = default_harness().await;
    h.narrator.replay(MessageId(42)).await;
    assert!(
        h.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, UiEvent::Notification { .. }))
    );
    assert_eq!(h.sink.played_count(), 0);
}

#[tokio::test]
async fn rendering_the_same_message_twice_narrates_once() {
    let h = default_harness().await;

    let id = h.chat.push(ChatMessage::new("Aria", "Only once, please."));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;

    assert_eq!(h.generated_texts().len(), 1);
}

#[tokio::test]
async fn user_messages_require_the_narrate_user_setting() {
    let h = default_harness().await;

    let first = h.chat.push(ChatMessage::user("Sam", "Can you hear me?"));
    h.narrator.handle_message_rendered(first).await;
    h.narrator.run_until_settled().await;
    assert_eq!(h.sink.played_count(), 0);

    let mut settings = h.narrator.settings();
    settings.narrate_user = true;
    h.narrator.update_settings(settings).await;

    let second = h.chat.push(ChatMessage::user("Sam", "A second user line."));
    h.narrator.handle_message_rendered(second).await;
    h.narrator.run_until_settled().await;
    assert_eq!(
        h.sink.played_strings(),
        vec!["v-alpha|A second user line.".to_string()]
    );
}

#[tokio::test]
async fn empty_sanitized_text_skips_without_error() {
    let h = harness_with(
        |calls| Box::new(MockProvider::new(calls)),
        MockSink::auto(),
        |settings| settings.narrate_dialogues_only = true,
    )
    .await;

    let id = h.chat.push(ChatMessage::new("Aria", "*only silent actions*"));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;

    assert!(h.generated_texts().is_empty());
    assert_eq!(h.sink.played_count(), 0);
    assert!(failures(&h.events).is_empty());

    // The progress indicator was attached and cleanly removed.
    let events = h.events.lock().unwrap();
    assert!(events.iter().any(
        |e| matches!(e, UiEvent::GenerationStarted { message_id } if *message_id == id)
    ));
    assert!(events.iter().any(
        |e| matches!(e, UiEvent::GenerationFinished { message_id } if *message_id == id)
    ));
}

#[tokio::test]
async fn speak_command_uses_the_voice_override() {
    let h = default_harness().await;
    h.narrator
        .set_voice_entry("Celeste", VoiceSelector::Voice("Beta".to_string()));

    h.narrator.speak("A line of free text", Some("Celeste")).await;
    h.narrator.run_until_settled().await;

    assert_eq!(
        h.sink.played_strings(),
        vec!["v-beta|A line of free text".to_string()]
    );
    // Unbound jobs retain nothing.
    assert!(h.narrator.retained_audio(MessageId(0)).await.is_none());
}

#[tokio::test]
async fn periodic_slicer_narrates_completed_paragraphs() {
    let h = harness_with(
        |calls| Box::new(MockProvider::new(calls)),
        MockSink::auto(),
        |settings| settings.periodic_auto_generation = true,
    )
    .await;

    let id = h.chat.push(ChatMessage::new("Aria", "First paragraph."));

    // Nothing complete yet.
    h.narrator.slicer_tick().await;
    h.narrator.run_until_settled().await;
    assert!(h.generated_texts().is_empty());

    // The first paragraph terminator appears.
    h.chat.replace(
        id,
        ChatMessage::new("Aria", "First paragraph.\n\nSecond paragraph"),
    );
    h.narrator.slicer_tick().await;
    h.narrator.run_until_settled().await;
    assert_eq!(h.generated_texts(), vec!["First paragraph.".to_string()]);

    // The second paragraph completes; only the delta is narrated.
    h.chat.replace(
        id,
        ChatMessage::new("Aria", "First paragraph.\n\nSecond paragraph.\n\nThird"),
    );
    h.narrator.slicer_tick().await;
    h.narrator.run_until_settled().await;
    assert_eq!(
        h.generated_texts(),
        vec!["First paragraph.".to_string(), "Second paragraph.".to_string()]
    );

    h.narrator.handle_generation_ended();
}

#[tokio::test]
async fn playback_start_failure_advances_with_audible_cue() {
    let h = harness_with(
        |calls| Box::new(MockProvider::new(calls)),
        MockSink::failing(),
        |_| {},
    )
    .await;

    h.chat.push(ChatMessage::new("Aria", "One."));
    h.chat.push(ChatMessage::new("Aria", "Two."));
    h.narrator.narrate_all().await;
    h.narrator.run_until_settled().await;

    // Both artifacts were attempted, both failed to start, queue advanced.
    assert_eq!(h.sink.played_count(), 0);
    assert_eq!(h.sink.cues(), 2);
    assert!(!h.narrator.is_processing().await);
    let notifications = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, UiEvent::Notification { .. }))
        .count();
    assert_eq!(notifications, 2);
}

#[tokio::test]
async fn toggle_play_narrates_last_message_when_idle() {
    let h = default_harness().await;
    h.chat.push(ChatMessage::new("Aria", "Old message."));
    h.chat.push(ChatMessage::new("Aria", "Latest message."));

    h.narrator.toggle_play().await;
    h.narrator.run_until_settled().await;

    assert_eq!(
        h.sink.played_strings(),
        vec!["v-alpha|Latest message.".to_string()]
    );
}

#[tokio::test]
async fn chat_change_clears_retained_audio() {
    let h = default_harness().await;

    let id = h.chat.push(ChatMessage::new("Aria", "Ephemeral."));
    h.narrator.handle_message_rendered(id).await;
    h.narrator.run_until_settled().await;
    assert!(h.narrator.retained_audio(id).await.is_some());

    h.chat.switch_chat("chat-2");
    h.narrator.handle_chat_changed().await;
    assert!(h.narrator.retained_audio(id).await.is_none());
    assert!(!h.narrator.is_processing().await);
}
