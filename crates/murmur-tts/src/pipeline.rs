//! Pipeline data model and the two queue state machines.
//!
//! [`PipelineState`] owns the narration queue, the playback queue, the
//! in-flight slots, and the generation epoch. Every transition is a guarded
//! method that no-ops when its preconditions fail, so the state machines are
//! testable without the tick scheduler and overlapping tick steps are
//! harmless.
//!
//! ```text
//!   generation: Idle ──(job queued, not paused)──► Generating ──► Idle
//!   playback:   Idle ──(artifact queued, not paused)──► Playing ──► Idle
//! ```
//!
//! The epoch is the reset token: it is bumped by every [`PipelineState::reset`]
//! and compared whenever a worker that ran unlocked (provider call, sink
//! playback) reports back. Stale reports are dropped — an already-issued
//! provider request is never cancelled, only its late result is discarded.

use std::collections::{HashMap, VecDeque};

use murmur_core::chat::MessageId;

// ── Data model ─────────────────────────────────────────────────────

/// One unit of pending text awaiting speech generation.
///
/// Consumed exactly once by the generation worker and not retained after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationJob {
    /// Message this job narrates, when bound to one (drives UI affordances).
    pub message_id: Option<MessageId>,

    /// Speaker name, resolved against the voice map.
    pub speaker: String,

    /// Raw text; sanitization happens when the job is picked up.
    pub text: String,
}

/// The audio content of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPayload {
    /// Encoded audio bytes (mp3/wav/ogg — the sink's decoder decides).
    Bytes(Vec<u8>),

    /// A playable reference the sink fetches at playback time.
    Url(String),
}

/// One playable unit of synthesized speech produced from a narration job.
///
/// Consumed exactly once by the playback controller; artifacts bound to a
/// message are additionally retained after playback for replay/download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub payload: AudioPayload,
    pub speaker: String,
    pub message_id: Option<MessageId>,
}

/// State of the generation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Generating,
}

/// State of the playback queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Metadata of the job currently being generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightJob {
    pub message_id: Option<MessageId>,
    pub speaker: String,
}

// ── Pipeline state ─────────────────────────────────────────────────

/// Shared state of both queues.
///
/// Invariants: at most one job and one artifact in flight at any time; FIFO
/// order is preserved end-to-end between resets.
#[derive(Debug, Default)]
pub struct PipelineState {
    jobs: VecDeque<NarrationJob>,
    artifacts: VecDeque<AudioArtifact>,
    current_job: Option<InFlightJob>,
    current_artifact: Option<AudioArtifact>,
    paused: bool,
    epoch: u64,
    retained: HashMap<MessageId, AudioArtifact>,
}

impl PipelineState {
    /// Create an empty, unpaused pipeline state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Generation queue ───────────────────────────────────────────

    /// Append a job to the narration queue.
    pub fn enqueue_job(&mut self, job: NarrationJob) {
        self.jobs.push_back(job);
    }

    /// Current state of the generation queue.
    #[must_use]
    pub const fn generation_state(&self) -> GenerationState {
        if self.current_job.is_some() {
            GenerationState::Generating
        } else {
            GenerationState::Idle
        }
    }

    /// Guarded Idle → Generating transition.
    ///
    /// Dequeues exactly one job when the queue is non-empty, the pipeline is
    /// not paused, and no job is in flight. Returns the job together with the
    /// epoch it belongs to.
    pub fn begin_generation(&mut self) -> Option<(NarrationJob, u64)> {
        if self.paused || self.current_job.is_some() {
            return None;
        }
        let job = self.jobs.pop_front()?;
        self.current_job = Some(InFlightJob {
            message_id: job.message_id,
            speaker: job.speaker.clone(),
        });
        Some((job, self.epoch))
    }

    /// Forward one artifact produced for the given epoch.
    ///
    /// Returns `false` (and drops the artifact) when the epoch is stale —
    /// i.e. a reset happened after the producing job was dequeued.
    pub fn push_artifact(&mut self, epoch: u64, artifact: AudioArtifact) -> bool {
        if epoch != self.epoch {
            tracing::debug!("Discarding audio artifact from a stale generation");
            return false;
        }
        self.artifacts.push_back(artifact);
        true
    }

    /// Generating → Idle transition for the given epoch.
    ///
    /// Stale epochs are ignored: after a reset the in-flight slot already
    /// belongs to a newer generation.
    pub fn finish_generation(&mut self, epoch: u64) -> Option<InFlightJob> {
        if epoch != self.epoch {
            return None;
        }
        self.current_job.take()
    }

    // ── Playback queue ─────────────────────────────────────────────

    /// Current state of the playback queue.
    #[must_use]
    pub const fn playback_state(&self) -> PlaybackState {
        if self.current_artifact.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    /// Guarded Idle → Playing transition.
    ///
    /// Dequeues exactly one artifact when the queue is non-empty, not paused,
    /// and nothing is playing.
    pub fn begin_playback(&mut self) -> Option<(AudioArtifact, u64)> {
        if self.paused || self.current_artifact.is_some() {
            return None;
        }
        let artifact = self.artifacts.pop_front()?;
        self.current_artifact = Some(artifact.clone());
        Some((artifact, self.epoch))
    }

    /// Playing → Idle on natural end of playback.
    ///
    /// Message-bound artifacts are retained for later replay/download; the
    /// newly retained id is returned so the caller can surface the controls.
    /// Stale epochs are ignored.
    pub fn complete_playback(&mut self, epoch: u64) -> Option<MessageId> {
        if epoch != self.epoch {
            return None;
        }
        let artifact = self.current_artifact.take()?;
        let id = artifact.message_id?;
        self.retained.insert(id, artifact);
        Some(id)
    }

    /// Playing → Idle after a failed playback start. Nothing is retained.
    pub fn fail_playback(&mut self, epoch: u64) {
        if epoch == self.epoch {
            self.current_artifact = None;
        }
    }

    // ── Global control ─────────────────────────────────────────────

    /// Hard reset: empty both queues, discard the in-flight job and artifact,
    /// and bump the epoch so late results from already-issued provider calls
    /// or sink callbacks are discarded.
    ///
    /// Returns the interrupted job's metadata so the caller can clear its UI
    /// indicator. Retained replay audio survives a reset (it is cleared
    /// explicitly on chat switch).
    pub fn reset(&mut self) -> Option<InFlightJob> {
        self.epoch += 1;
        self.jobs.clear();
        self.artifacts.clear();
        self.current_artifact = None;
        self.current_job.take()
    }

    /// Pause or resume both queues. In-flight items finish; nothing new is
    /// dequeued while paused.
    pub const fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Whether the pipeline is paused.
    #[must_use]
    pub const fn paused(&self) -> bool {
        self.paused
    }

    /// The current generation epoch.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether any work is queued or in flight in either queue.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        !self.jobs.is_empty()
            || !self.artifacts.is_empty()
            || self.current_job.is_some()
            || self.current_artifact.is_some()
    }

    /// Number of queued (not in-flight) narration jobs.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Number of queued (not in-flight) audio artifacts.
    #[must_use]
    pub fn queued_artifacts(&self) -> usize {
        self.artifacts.len()
    }

    // ── Retained audio ─────────────────────────────────────────────

    /// Retained narration audio for a message, if any.
    #[must_use]
    pub fn retained_artifact(&self, id: MessageId) -> Option<&AudioArtifact> {
        self.retained.get(&id)
    }

    /// Drop the retained audio for one message (message deleted).
    pub fn remove_retained(&mut self, id: MessageId) -> Option<AudioArtifact> {
        self.retained.remove(&id)
    }

    /// Drop all retained audio (chat switched).
    pub fn clear_retained(&mut self) {
        self.retained.clear();
    }

    /// Ids that currently have retained audio.
    #[must_use]
    pub fn retained_ids(&self) -> Vec<MessageId> {
        self.retained.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(text: &str) -> NarrationJob {
        NarrationJob {
            message_id: None,
            speaker: "Aria".to_string(),
            text: text.to_string(),
        }
    }

    fn artifact(id: Option<u64>) -> AudioArtifact {
        AudioArtifact {
            payload: AudioPayload::Bytes(vec![1, 2, 3]),
            speaker: "Aria".to_string(),
            message_id: id.map(MessageId),
        }
    }

    #[test]
    fn jobs_dequeue_in_fifo_order() {
        let mut state = PipelineState::new();
        state.enqueue_job(job("one"));
        state.enqueue_job(job("two"));

        let (first, epoch) = state.begin_generation().unwrap();
        assert_eq!(first.text, "one");
        assert_eq!(state.generation_state(), GenerationState::Generating);

        // Single in-flight job: a second dequeue is refused.
        assert!(state.begin_generation().is_none());

        state.finish_generation(epoch);
        let (second, _) = state.begin_generation().unwrap();
        assert_eq!(second.text, "two");
    }

    #[test]
    fn paused_pipeline_dequeues_nothing() {
        let mut state = PipelineState::new();
        state.enqueue_job(job("one"));
        state.push_artifact(0, artifact(None));
        state.set_paused(true);

        assert!(state.begin_generation().is_none());
        assert!(state.begin_playback().is_none());

        state.set_paused(false);
        assert!(state.begin_generation().is_some());
        assert!(state.begin_playback().is_some());
    }

    #[test]
    fn stale_artifacts_are_discarded() {
        let mut state = PipelineState::new();
        state.enqueue_job(job("one"));
        let (_, epoch) = state.begin_generation().unwrap();

        state.reset();

        assert!(!state.push_artifact(epoch, artifact(None)));
        assert_eq!(state.queued_artifacts(), 0);
    }

    #[test]
    fn stale_finish_does_not_clear_newer_job() {
        let mut state = PipelineState::new();
        state.enqueue_job(job("one"));
        let (_, old_epoch) = state.begin_generation().unwrap();
        state.reset();

        state.enqueue_job(job("two"));
        let (_, _new_epoch) = state.begin_generation().unwrap();

        assert!(state.finish_generation(old_epoch).is_none());
        assert_eq!(state.generation_state(), GenerationState::Generating);
    }

    #[test]
    fn playback_retains_message_bound_artifacts() {
        let mut state = PipelineState::new();
        state.push_artifact(0, artifact(Some(7)));

        let (_, epoch) = state.begin_playback().unwrap();
        assert_eq!(state.playback_state(), PlaybackState::Playing);

        let retained = state.complete_playback(epoch);
        assert_eq!(retained, Some(MessageId(7)));
        assert!(state.retained_artifact(MessageId(7)).is_some());
        assert_eq!(state.playback_state(), PlaybackState::Idle);
    }

    #[test]
    fn unbound_artifacts_are_not_retained() {
        let mut state = PipelineState::new();
        state.push_artifact(0, artifact(None));
        let (_, epoch) = state.begin_playback().unwrap();
        assert_eq!(state.complete_playback(epoch), None);
        assert!(state.retained_ids().is_empty());
        assert_eq!(state.playback_state(), PlaybackState::Idle);
    }

    #[test]
    fn failed_playback_advances_without_retaining() {
        let mut state = PipelineState::new();
        state.push_artifact(0, artifact(Some(3)));
        let (_, epoch) = state.begin_playback().unwrap();

        state.fail_playback(epoch);
        assert_eq!(state.playback_state(), PlaybackState::Idle);
        assert!(state.retained_ids().is_empty());
    }

    #[test]
    fn reset_empties_everything_in_flight() {
        let mut state = PipelineState::new();
        state.enqueue_job(job("one"));
        state.enqueue_job(job("two"));
        state.push_artifact(0, artifact(Some(1)));
        state.push_artifact(0, artifact(None));

        let (_, _) = state.begin_generation().unwrap();
        let (_, play_epoch) = state.begin_playback().unwrap();

        let interrupted = state.reset();
        assert!(interrupted.is_some());

        assert_eq!(state.queued_jobs(), 0);
        assert_eq!(state.queued_artifacts(), 0);
        assert_eq!(state.generation_state(), GenerationState::Idle);
        assert_eq!(state.playback_state(), PlaybackState::Idle);
        assert!(!state.is_processing());

        // A late completion from the interrupted playback is a no-op.
        assert_eq!(state.complete_playback(play_epoch), None);
        assert!(state.retained_ids().is_empty());
    }

    #[test]
    fn retained_audio_survives_reset_until_cleared() {
        let mut state = PipelineState::new();
        state.push_artifact(0, artifact(Some(2)));
        let (_, epoch) = state.begin_playback().unwrap();
        state.complete_playback(epoch);

        state.reset();
        assert!(state.retained_artifact(MessageId(2)).is_some());

        state.clear_retained();
        assert!(state.retained_artifact(MessageId(2)).is_none());
    }
}
