//! The narration orchestrator.
//!
//! [`Narrator`] owns the pipeline state and drives both queue state machines
//! with a cooperative tick: one generation step, one playback step, then a
//! play-state refresh. Steps are idempotent no-ops when their guards fail, so
//! overlapping ticks are harmless. External events (message rendered, chat
//! switched, explicit narrate commands) are handled synchronously as they
//! arrive, independent of the tick cadence.
//!
//! # Locking discipline
//!
//! All queue state lives behind one async mutex; handlers and tick steps lock
//! it briefly and never hold it across the two suspension points (the
//! provider call and the sink-ready await). The generation worker snapshots
//! what it needs, runs unlocked, and re-locks to forward each artifact —
//! comparing the generation epoch so results issued before a reset are
//! discarded rather than replayed.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio::task::JoinHandle;

use murmur_core::chat::{ChatMessage, MessageId};
use murmur_core::events::UiEvent;
use murmur_core::ports::{ChatLog, UiEventEmitter};
use murmur_core::settings::NarrationSettings;

use crate::error::TtsError;
use crate::pipeline::{
    AudioArtifact, GenerationState, NarrationJob, PipelineState, PlaybackState,
};
use crate::provider::{ProviderRegistry, TtsProvider, TtsResponse, Voice};
use crate::sanitize::{self, SanitizeOptions};
use crate::segment;
use crate::sink::{AudioSink, CompletionCallback};
use crate::voices::{DEFAULT_VOICE_KEY, Resolution, VoiceMap, VoiceSelector};

/// Default orchestrator tick period (also the periodic slicer cadence).
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Key of the voice map inside a per-provider settings block.
const VOICE_MAP_KEY: &str = "voice_map";

// ── Internal state ─────────────────────────────────────────────────

/// Dedup/delta tracking for message-rendered events and the slicer cursor.
#[derive(Debug, Default)]
struct MessageTracker {
    last_chat_id: Option<String>,
    last_hash: Option<u64>,
    last_message: Option<ChatMessage>,
    slice_cursor: Option<usize>,
}

/// Names substituted for the `{{user}}` / `{{char}}` macros.
#[derive(Debug, Default)]
struct PersonaNames {
    user: Option<String>,
    character: Option<String>,
}

struct Inner {
    state: Mutex<PipelineState>,
    provider: RwLock<Option<Box<dyn TtsProvider>>>,
    sink: Arc<dyn AudioSink>,
    chat: Arc<dyn ChatLog>,
    emitter: Arc<dyn UiEventEmitter>,
    settings: std::sync::RwLock<NarrationSettings>,
    voice_map: std::sync::RwLock<VoiceMap>,
    persona: std::sync::RwLock<PersonaNames>,
    tracker: std::sync::Mutex<MessageTracker>,
    /// Wakes the run loop early (new work queued, playback finished).
    kick: Notify,
    /// In-flight generation task, awaited by [`Narrator::run_until_settled`].
    gen_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// The auxiliary periodic slicer, alive while a session streams.
    slicer_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    last_play_state: std::sync::Mutex<Option<bool>>,
    /// Natural-playback-end notifications from sink watcher threads.
    done_tx: mpsc::UnboundedSender<u64>,
}

// ── Narrator ───────────────────────────────────────────────────────

/// Drives narration end-to-end: sanitize → resolve voice → generate →
/// queue → play, with per-job failure isolation.
///
/// Must be created inside a Tokio runtime (a playback-completion pump task
/// is spawned at construction).
pub struct Narrator {
    inner: Arc<Inner>,
}

impl Narrator {
    /// Create a narrator over the given collaborators.
    pub fn new(
        chat: Arc<dyn ChatLog>,
        sink: Arc<dyn AudioSink>,
        emitter: Arc<dyn UiEventEmitter>,
        settings: NarrationSettings,
    ) -> Self {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            state: Mutex::new(PipelineState::new()),
            provider: RwLock::new(None),
            sink,
            chat,
            emitter,
            settings: std::sync::RwLock::new(settings),
            voice_map: std::sync::RwLock::new(VoiceMap::new()),
            persona: std::sync::RwLock::new(PersonaNames::default()),
            tracker: std::sync::Mutex::new(MessageTracker::default()),
            kick: Notify::new(),
            gen_task: std::sync::Mutex::new(None),
            slicer_task: std::sync::Mutex::new(None),
            last_play_state: std::sync::Mutex::new(None),
            done_tx,
        });

        // Playback-completion pump: sink watcher threads report natural ends
        // over the channel; queue mutation happens here, on the runtime. The
        // task exits when the narrator (sole strong owner) is dropped.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(epoch) = done_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.playback_completed(epoch).await;
            }
        });

        Self { inner }
    }

    // ── Provider management ────────────────────────────────────────

    /// Install an already-configured provider and load its voice map from
    /// the persisted settings block.
    pub async fn install_provider(&self, provider: Box<dyn TtsProvider>) {
        let name = provider.name();
        let map = {
            let settings = self.inner.settings.read().unwrap();
            voice_map_from_block(&settings.provider_block(name))
        };
        *self.inner.voice_map.write().unwrap() = map;
        *self.inner.provider.write().await = Some(provider);
        tracing::info!(provider = name, "TTS provider installed");
    }

    /// Construct the named provider from the registry, apply its persisted
    /// settings block, and make it the active provider.
    pub async fn select_provider(
        &self,
        registry: &ProviderRegistry,
        name: &str,
    ) -> Result<(), TtsError> {
        let mut provider = registry.create(name)?;
        let block = {
            let mut settings = self.inner.settings.write().unwrap();
            settings.current_provider = name.to_string();
            settings.provider_block(name)
        };
        provider.load_settings(&block).await?;
        self.install_provider(provider).await;
        Ok(())
    }

    /// Whether the active provider is ready to generate. Used to gate
    /// pipeline activation.
    pub async fn check_provider_ready(&self) -> Result<(), TtsError> {
        let guard = self.inner.provider.read().await;
        match guard.as_ref() {
            Some(provider) => provider.check_ready().await,
            None => Err(TtsError::NotReady("no TTS provider selected".to_string())),
        }
    }

    /// The active provider's voice catalog.
    pub async fn voices(&self) -> Result<Vec<Voice>, TtsError> {
        let guard = self.inner.provider.read().await;
        match guard.as_ref() {
            Some(provider) => provider.list_voices().await,
            None => Err(TtsError::NotReady("no TTS provider selected".to_string())),
        }
    }

    // ── Settings & voice map ───────────────────────────────────────

    /// Snapshot of the current settings.
    #[must_use]
    pub fn settings(&self) -> NarrationSettings {
        self.inner.settings.read().unwrap().clone()
    }

    /// Replace the settings wholesale and invalidate any cached provider
    /// voice catalog.
    pub async fn update_settings(&self, settings: NarrationSettings) {
        *self.inner.settings.write().unwrap() = settings;
        if let Some(provider) = self.inner.provider.write().await.as_mut() {
            provider.invalidate_voices();
        }
    }

    /// Enable or disable the whole pipeline.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.settings.write().unwrap().enabled = enabled;
        if enabled {
            self.inner.kick.notify_one();
        }
    }

    /// Set the playback rate applied when the next artifact starts.
    pub fn set_playback_rate(&self, rate: f32) {
        self.inner.settings.write().unwrap().playback_rate = rate;
    }

    /// Names substituted for the `{{user}}` / `{{char}}` macros. `character`
    /// falls back to each job's speaker when unset.
    pub fn set_persona_names(&self, user: Option<String>, character: Option<String>) {
        *self.inner.persona.write().unwrap() = PersonaNames { user, character };
    }

    /// Update one speaker's voice map entry, and mirror the change into the
    /// active provider's settings block so the host can persist it.
    pub fn set_voice_entry(&self, speaker: impl Into<String>, selector: VoiceSelector) {
        let map_value = {
            let mut map = self.inner.voice_map.write().unwrap();
            map.set(speaker, selector);
            serde_json::to_value(&*map).ok()
        };
        let Some(map_value) = map_value else { return };

        let mut settings = self.inner.settings.write().unwrap();
        let provider = settings.current_provider.clone();
        if provider.is_empty() {
            return;
        }
        let mut block = settings.provider_block(&provider);
        if let Some(object) = block.as_object_mut() {
            object.insert(VOICE_MAP_KEY.to_string(), map_value);
        }
        settings.set_provider_block(provider, block);
    }

    /// Snapshot of the active voice map.
    #[must_use]
    pub fn voice_map(&self) -> VoiceMap {
        self.inner.voice_map.read().unwrap().clone()
    }

    // ── Tick loop ──────────────────────────────────────────────────

    /// One cooperative tick: attempt a generation step, a playback step, and
    /// refresh the play-state affordance. A no-op while disabled.
    pub async fn tick(&self) {
        if !self.inner.settings.read().unwrap().enabled {
            return;
        }
        Arc::clone(&self.inner).step_generation().await;
        self.inner.step_playback().await;
        self.inner.refresh_play_state().await;
    }

    /// Spawn the fixed-period tick loop. The loop also wakes early whenever
    /// work arrives or playback completes, and exits when the narrator is
    /// dropped.
    pub fn spawn_run_loop(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let Some(inner) = weak.upgrade() else { break };
                tokio::select! {
                    _ = interval.tick() => {}
                    () = inner.kick.notified() => {}
                }
                if inner.settings.read().unwrap().enabled {
                    Arc::clone(&inner).step_generation().await;
                    inner.step_playback().await;
                    inner.refresh_play_state().await;
                }
            }
        })
    }

    /// Drive the pipeline until both queues are empty and nothing is in
    /// flight. Intended for batch narration in headless hosts and for tests;
    /// interactive hosts use [`Self::spawn_run_loop`] instead.
    pub async fn run_until_settled(&self) {
        if !self.inner.settings.read().unwrap().enabled {
            return;
        }
        loop {
            self.tick().await;

            let generation = self.inner.gen_task.lock().unwrap().take();
            if let Some(handle) = generation {
                let _ = handle.await;
                continue;
            }

            if !self.inner.state.lock().await.is_processing() && !self.inner.sink.is_playing() {
                break;
            }
            self.inner.kick.notified().await;
        }
        self.inner.refresh_play_state().await;
    }

    // ── External events ────────────────────────────────────────────

    /// A character or user message finished rendering.
    pub async fn handle_message_rendered(&self, id: MessageId) {
        self.inner.message_event(id, None).await;
    }

    /// A message was deleted from the chat.
    pub async fn handle_message_deleted(&self) {
        let last = self.inner.chat.last_message();
        let last_text = last.as_ref().map(|(_, m)| m.text.as_str()).unwrap_or("");
        let new_hash = hash_text(last_text);
        {
            let mut tracker = self.inner.tracker.lock().unwrap();
            if tracker.last_hash == Some(new_hash) {
                return;
            }
            tracker.last_hash = Some(new_hash);
            tracker.last_message = last.map(|(_, m)| m);
            tracker.last_chat_id = self.inner.chat.chat_id();
        }

        {
            let mut state = self.inner.state.lock().await;
            for id in state.retained_ids() {
                if self.inner.chat.message(id).is_none() {
                    state.remove_retained(id);
                }
            }
        }

        self.reset().await;
    }

    /// The current message was swiped to another variant.
    pub async fn handle_message_swiped(&self) {
        self.reset().await;
    }

    /// The host switched to a different chat.
    pub async fn handle_chat_changed(&self) {
        self.handle_generation_ended();
        self.reset().await;
        self.inner.state.lock().await.clear_retained();

        let mut tracker = self.inner.tracker.lock().unwrap();
        tracker.last_message = None;
        tracker.slice_cursor = None;
    }

    /// A message-generation session started. With periodic auto-generation
    /// configured and a streaming session, starts the auxiliary slicer timer.
    pub fn handle_generation_started(&self, streaming: bool) {
        let settings = self.inner.settings.read().unwrap().clone();
        if !settings.enabled
            || !settings.auto_generation
            || !settings.periodic_auto_generation
            || !streaming
        {
            return;
        }

        let mut slot = self.inner.slicer_task.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_TICK_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; a periodic timer
            // should first fire after one full period.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.slicer_tick().await;
            }
        }));
    }

    /// The message-generation session ended: stop the slicer and reset its
    /// cursor.
    pub fn handle_generation_ended(&self) {
        if let Some(task) = self.inner.slicer_task.lock().unwrap().take() {
            task.abort();
        }
        self.inner.tracker.lock().unwrap().slice_cursor = None;
    }

    /// Advance the periodic slicer by one step: narrate the next completed
    /// paragraph of the streaming (final) message, if one has appeared.
    pub async fn slicer_tick(&self) {
        self.inner.slicer_tick().await;
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Narrate one specific message (explicit request; filters do not apply).
    pub async fn narrate_message(&self, id: MessageId) {
        let Some(message) = self.inner.chat.message(id) else {
            return;
        };
        self.reset().await;
        self.inner.enqueue_message(Some(id), &message).await;
        self.tick().await;
    }

    /// Narrate the whole chat in order, skipping system and placeholder
    /// messages.
    pub async fn narrate_all(&self) {
        self.reset().await;

        if !self.inner.settings.read().unwrap().enabled {
            self.inner
                .emitter
                .emit(UiEvent::warning("Narration is disabled. Enable it first."));
            return;
        }

        let translated_only = self.inner.settings.read().unwrap().narrate_translated_only;
        let messages: Vec<(MessageId, ChatMessage)> = self
            .inner
            .chat
            .messages()
            .into_iter()
            .filter(|(_, m)| !m.is_system && !m.is_placeholder())
            .collect();

        if messages.is_empty() {
            self.inner
                .emitter
                .emit(UiEvent::info("No messages to narrate."));
            return;
        }

        let mut state = self.inner.state.lock().await;
        for (id, message) in messages {
            state.enqueue_job(NarrationJob {
                message_id: Some(id),
                speaker: message.name.clone(),
                text: message.narration_text(translated_only).to_string(),
            });
        }
        drop(state);
        self.inner.kick.notify_one();
    }

    /// Play/stop toggle: stop everything when busy, otherwise narrate the
    /// last chat message.
    pub async fn toggle_play(&self) {
        let busy = self.inner.state.lock().await.is_processing() || self.inner.sink.is_playing();
        if busy {
            self.reset().await;
        } else if let Some((id, message)) = self.inner.chat.last_message() {
            self.inner.enqueue_message(Some(id), &message).await;
        }
        self.inner.refresh_play_state().await;
    }

    /// Narrate free text with an optional voice-map name override (the
    /// `speak` command surface). Without an override the default voice is
    /// used.
    pub async fn speak(&self, text: &str, voice: Option<&str>) {
        let speaker = voice.map_or_else(|| DEFAULT_VOICE_KEY.to_string(), ToString::to_string);

        if self.inner.voice_map.read().unwrap().resolve(&speaker) == Resolution::Disabled {
            self.inner.emitter.emit(UiEvent::info(format!(
                "No voice configured for {speaker}. Check the narration voice map."
            )));
            return;
        }

        self.reset().await;
        self.inner.state.lock().await.enqueue_job(NarrationJob {
            message_id: None,
            speaker,
            text: text.to_string(),
        });
        self.inner.kick.notify_one();
        self.tick().await;
    }

    /// Replay the retained narration for a message.
    pub async fn replay(&self, id: MessageId) {
        let artifact = self.inner.state.lock().await.retained_artifact(id).cloned();
        match artifact {
            Some(artifact) => {
                self.reset().await;
                {
                    let mut state = self.inner.state.lock().await;
                    let epoch = state.epoch();
                    state.push_artifact(epoch, artifact);
                }
                self.inner.kick.notify_one();
                self.tick().await;
            }
            None => {
                self.inner.emitter.emit(UiEvent::warning(
                    "No audio found for this message. Generate it first.",
                ));
            }
        }
    }

    /// Hard reset: empty both queues, discard the in-flight job and
    /// artifact, stop and rewind the sink. An already-issued provider
    /// request is not cancelled — its late result is discarded by the epoch
    /// check when it tries to forward.
    pub async fn reset(&self) {
        let interrupted = self.inner.state.lock().await.reset();
        self.inner.sink.stop();
        if let Some(job) = interrupted {
            if let Some(id) = job.message_id {
                self.inner
                    .emitter
                    .emit(UiEvent::GenerationFinished { message_id: id });
            }
        }
    }

    /// Pause or resume both queues (in-flight items finish).
    pub async fn set_paused(&self, paused: bool) {
        self.inner.state.lock().await.set_paused(paused);
        if !paused {
            self.inner.kick.notify_one();
        }
    }

    // ── Introspection ──────────────────────────────────────────────

    /// Whether any narration work is queued or in flight.
    pub async fn is_processing(&self) -> bool {
        self.inner.state.lock().await.is_processing()
    }

    /// Current generation-queue state.
    pub async fn generation_state(&self) -> GenerationState {
        self.inner.state.lock().await.generation_state()
    }

    /// Current playback-queue state.
    pub async fn playback_state(&self) -> PlaybackState {
        self.inner.state.lock().await.playback_state()
    }

    /// Retained narration audio for a message (for replay/download hosts).
    pub async fn retained_audio(&self, id: MessageId) -> Option<AudioArtifact> {
        self.inner.state.lock().await.retained_artifact(id).cloned()
    }
}

// ── Inner: queue steps ─────────────────────────────────────────────

impl Inner {
    /// Generation step: dequeue one job when idle, sanitize, resolve the
    /// voice, and hand the provider call to a background task. Skips and
    /// failures drop only the current job.
    async fn step_generation(self: Arc<Self>) {
        let Some((job, epoch)) = self.state.lock().await.begin_generation() else {
            return;
        };

        if let Some(id) = job.message_id {
            self.emitter.emit(UiEvent::GenerationStarted { message_id: id });
        }

        let settings = self.settings.read().unwrap().clone();

        let provider = self.provider.read().await;
        let Some(provider_ref) = provider.as_ref() else {
            drop(provider);
            let error = TtsError::NotReady("no TTS provider selected".to_string());
            self.fail_job(epoch, job.message_id, &error).await;
            return;
        };

        let mut opts = SanitizeOptions::from_settings(&settings);
        opts.separator = provider_ref.separator().to_string();
        opts.speaker = Some(job.speaker.clone());
        {
            let persona = self.persona.read().unwrap();
            opts.user_name = persona.user.clone();
            opts.char_name = persona
                .character
                .clone()
                .or_else(|| Some(job.speaker.clone()));
        }

        let text = sanitize::sanitize(&job.text, &opts);
        if text.is_empty() {
            tracing::debug!(speaker = %job.speaker, "Sanitized text is empty, dropping job");
            drop(provider);
            self.skip_job(epoch, job.message_id).await;
            return;
        }

        let resolution = self.voice_map.read().unwrap().resolve(&job.speaker);
        let selector = match resolution {
            Resolution::Voice(selector) => selector,
            Resolution::Disabled => {
                tracing::debug!(speaker = %job.speaker, "Narration disabled for speaker");
                drop(provider);
                self.skip_job(epoch, job.message_id).await;
                return;
            }
        };

        let voice = match provider_ref.resolve_voice(&selector).await {
            Ok(voice) => voice,
            Err(error) => {
                drop(provider);
                self.fail_job(epoch, job.message_id, &error).await;
                return;
            }
        };
        drop(provider);

        tracing::debug!(speaker = %job.speaker, voice = %voice.id, "Generating narration");

        let inner = Arc::clone(&self);
        let speaker = job.speaker;
        let message_id = job.message_id;
        let handle = tokio::spawn(async move {
            inner
                .generate_and_forward(epoch, message_id, &speaker, &text, &voice.id)
                .await;
            inner.kick.notify_one();
        });
        *self.gen_task.lock().unwrap() = Some(handle);
    }

    /// Run the provider call and forward every produced artifact in order.
    /// Consumes streaming responses one element at a time — the first chunk
    /// reaches the playback queue before the second is pulled.
    async fn generate_and_forward(
        &self,
        epoch: u64,
        message_id: Option<MessageId>,
        speaker: &str,
        text: &str,
        voice_id: &str,
    ) {
        let provider = self.provider.read().await;
        let Some(provider_ref) = provider.as_ref() else {
            drop(provider);
            let error = TtsError::NotReady("TTS provider was removed".to_string());
            self.fail_job(epoch, message_id, &error).await;
            return;
        };

        let response = provider_ref.generate(text, voice_id).await;
        drop(provider);

        match response {
            Ok(TtsResponse::Audio(payload)) => {
                self.forward_artifact(epoch, payload, speaker, message_id).await;
                self.complete_job(epoch, message_id).await;
            }
            Ok(TtsResponse::Stream(mut stream)) => {
                loop {
                    match stream.next().await {
                        Some(Ok(payload)) => {
                            if !self
                                .forward_artifact(epoch, payload, speaker, message_id)
                                .await
                            {
                                // Reset happened mid-stream; stop pulling.
                                return;
                            }
                        }
                        Some(Err(error)) => {
                            // Already-forwarded chunks stay queued; only the
                            // unresolved remainder is affected.
                            self.fail_job(epoch, message_id, &error).await;
                            return;
                        }
                        None => break,
                    }
                }
                self.complete_job(epoch, message_id).await;
            }
            Err(error) => {
                self.fail_job(epoch, message_id, &error).await;
            }
        }
    }

    /// Push one artifact toward playback. Returns `false` when the epoch is
    /// stale (a reset intervened) and the artifact was discarded.
    async fn forward_artifact(
        &self,
        epoch: u64,
        payload: crate::pipeline::AudioPayload,
        speaker: &str,
        message_id: Option<MessageId>,
    ) -> bool {
        let accepted = self.state.lock().await.push_artifact(
            epoch,
            AudioArtifact {
                payload,
                speaker: speaker.to_string(),
                message_id,
            },
        );
        if accepted {
            self.kick.notify_one();
        }
        accepted
    }

    /// Silent skip: the job is dropped without error, the worker returns to
    /// idle, and a message-bound progress indicator is removed.
    async fn skip_job(&self, epoch: u64, message_id: Option<MessageId>) {
        if self.state.lock().await.finish_generation(epoch).is_some() {
            if let Some(id) = message_id {
                self.emitter.emit(UiEvent::GenerationFinished { message_id: id });
            }
        }
    }

    /// Successful completion: worker back to idle, indicator removed.
    async fn complete_job(&self, epoch: u64, message_id: Option<MessageId>) {
        if self.state.lock().await.finish_generation(epoch).is_some() {
            if let Some(id) = message_id {
                self.emitter.emit(UiEvent::GenerationFinished { message_id: id });
            }
            tracing::debug!("Narration job completed");
        }
    }

    /// Reported failure: the job is dropped, the queue continues. Message-
    /// bound failures leave a persistent marker; unbound ones only toast.
    /// Stale failures (after a reset) are not reported at all.
    async fn fail_job(&self, epoch: u64, message_id: Option<MessageId>, error: &TtsError) {
        if self.state.lock().await.finish_generation(epoch).is_none() {
            return;
        }
        tracing::warn!(error = %error, "Narration job failed");
        match message_id {
            Some(id) => self.emitter.emit(UiEvent::GenerationFailed {
                message_id: id,
                error: error.to_string(),
            }),
            None => self
                .emitter
                .emit(UiEvent::error(format!("Narration failed: {error}"))),
        }
        self.sink.error_cue();
        self.kick.notify_one();
    }

    /// Playback step: dequeue one artifact when idle and start it on the
    /// sink. A start failure counts as completion (reported, audible cue,
    /// no retry).
    async fn step_playback(&self) {
        let rate = self.settings.read().unwrap().effective_playback_rate();
        let Some((artifact, epoch)) = self.state.lock().await.begin_playback() else {
            return;
        };

        tracing::debug!(speaker = %artifact.speaker, "Starting narration playback");

        let done_tx = self.done_tx.clone();
        let on_done: CompletionCallback = Box::new(move || {
            let _ = done_tx.send(epoch);
        });

        if let Err(error) = self.sink.play(&artifact.payload, rate, on_done).await {
            tracing::warn!(error = %error, "Playback failed to start, advancing");
            self.emitter
                .emit(UiEvent::error(format!("Audio playback failed: {error}")));
            self.sink.error_cue();
            self.state.lock().await.fail_playback(epoch);
            self.kick.notify_one();
        }
    }

    /// Natural end of playback (from the completion pump): retain message-
    /// bound audio and surface the replay/download controls.
    async fn playback_completed(&self, epoch: u64) {
        let retained = self.state.lock().await.complete_playback(epoch);
        if let Some(id) = retained {
            self.emitter.emit(UiEvent::NarrationReady { message_id: id });
        }
        self.kick.notify_one();
    }

    /// Emit a play-state event when the busy/idle affordance flips.
    async fn refresh_play_state(&self) {
        let processing = self.state.lock().await.is_processing() || self.sink.is_playing();
        let mut last = self.last_play_state.lock().unwrap();
        if *last != Some(processing) {
            *last = Some(processing);
            self.emitter.emit(UiEvent::PlayStateChanged { processing });
        }
    }

    // ── Inner: event plumbing ──────────────────────────────────────

    /// Shared path for message-rendered events and slicer steps.
    ///
    /// Applies the auto-narration filters, deduplicates by content hash, and
    /// narrates only the delta when the message extends the previously
    /// narrated one (streaming growth).
    async fn message_event(&self, id: MessageId, truncate_at: Option<usize>) {
        let settings = self.settings.read().unwrap().clone();
        if !settings.enabled || !settings.auto_generation {
            return;
        }
        let Some(mut message) = self.chat.message(id) else {
            return;
        };
        if message.is_system {
            return;
        }
        if let Some(limit) = truncate_at {
            message.text.truncate(limit);
        }

        let chat_id = self.chat.chat_id();
        let new_hash = hash_text(&message.text);

        let to_narrate: Option<ChatMessage> = {
            let mut tracker = self.tracker.lock().unwrap();

            if tracker.last_chat_id != chat_id {
                tracker.last_chat_id = chat_id;
                // A freshly opened chat baselines on the triggering message
                // so history is not re-narrated; a brand-new chat (single
                // greeting) is narrated.
                tracker.last_hash = if self.chat.len() == 1 {
                    None
                } else {
                    Some(new_hash)
                };
            }

            if tracker.last_hash == Some(new_hash) {
                None
            } else {
                let mut delta = message.clone();
                // When the message extends what was already narrated (same
                // speaker, streaming growth), only the appended suffix is new.
                let narrated_prefix = tracker
                    .last_message
                    .as_ref()
                    .filter(|last| {
                        last.name == delta.name
                            && last.is_user == delta.is_user
                            && delta.text.contains(&last.text)
                    })
                    .map(|last| last.text.clone());
                tracker.last_message = Some(message.clone());
                if let Some(prefix) = narrated_prefix {
                    delta.text = delta.text.replacen(&prefix, "", 1);
                }

                if delta.text.is_empty() || delta.text == "..." {
                    None
                } else if settings.narrate_translated_only && delta.display_text.is_none() {
                    None
                } else if delta.is_user && !settings.narrate_user {
                    None
                } else {
                    tracker.last_hash = Some(new_hash);
                    Some(delta)
                }
            }
        };

        let Some(delta) = to_narrate else {
            return;
        };

        tracing::debug!(speaker = %delta.name, "Queueing message for narration");

        let text = delta.narration_text(settings.narrate_translated_only).to_string();
        let mut state = self.state.lock().await;
        if settings.periodic_auto_generation {
            // The slicer owns segmentation while a message streams in.
            state.enqueue_job(NarrationJob {
                message_id: Some(id),
                speaker: delta.name,
                text,
            });
        } else {
            for job in paragraph_jobs(&settings, Some(id), &delta.name, &text) {
                state.enqueue_job(job);
            }
        }
        drop(state);
        self.kick.notify_one();
    }

    /// One slicer step: find the next completed paragraph of the streaming
    /// (final) message and feed it through the message-event path.
    async fn slicer_tick(&self) {
        let Some((id, message)) = self.chat.last_message() else {
            return;
        };
        if message.is_user {
            return;
        }

        let from = self
            .tracker
            .lock()
            .unwrap()
            .slice_cursor
            .map_or(0, |cursor| cursor + 1);
        let Some(end) = segment::next_paragraph_end(&message.text, from) else {
            return;
        };

        self.message_event(id, Some(end)).await;
        self.tracker.lock().unwrap().slice_cursor = Some(end);
    }

    /// Enqueue one message unconditionally (explicit narrate commands).
    async fn enqueue_message(&self, id: Option<MessageId>, message: &ChatMessage) {
        let settings = self.settings.read().unwrap().clone();
        let text = message
            .narration_text(settings.narrate_translated_only)
            .to_string();

        let mut state = self.state.lock().await;
        for job in paragraph_jobs(&settings, id, &message.name, &text) {
            state.enqueue_job(job);
        }
        drop(state);
        self.kick.notify_one();
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Split a message into jobs according to the paragraph setting.
fn paragraph_jobs(
    settings: &NarrationSettings,
    message_id: Option<MessageId>,
    speaker: &str,
    text: &str,
) -> Vec<NarrationJob> {
    if settings.narrate_by_paragraphs {
        segment::split_paragraphs(text)
            .into_iter()
            .map(|paragraph| NarrationJob {
                message_id,
                speaker: speaker.to_string(),
                text: paragraph,
            })
            .collect()
    } else {
        vec![NarrationJob {
            message_id,
            speaker: speaker.to_string(),
            text: text.to_string(),
        }]
    }
}

/// Content hash used to deduplicate message-rendered events.
fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Extract a voice map from a provider settings block, accepting both the
/// object form and the legacy compact string form.
fn voice_map_from_block(block: &serde_json::Value) -> VoiceMap {
    match block.get(VOICE_MAP_KEY) {
        Some(serde_json::Value::String(compact)) => VoiceMap::parse(compact),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
        None => VoiceMap::default(),
    }
}
