//! Telemetry collector for batched behavior events.
//!
//! The `TelemetryCollector` buffers events for one learner session and writes
//! them to the repository in ordered batches.
//!
//! ## Flush Policy
//!
//! ```text
//! track_event() ──► queue.len() >= batch_size ──► flush()
//! flush timer   ──► every flush_interval_ms   ──► flush()
//!                                                   │
//!                          insert ok ◄──────────────┤
//!                                                   └─► insert failed: batch re-queued at the front
//! ```
//!
//! Failed batches are retried on the next flush with no attempt limit.
//! Delivery is at-most-once across process crashes and at-least-once within
//! a run: a batch the repository partially applied before failing may be
//! delivered twice.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, IdGenerator};
use crate::config::TelemetryConfig;
use crate::error::{EngineError, Result};
use crate::repository::Repository;
use crate::types::{
    AssignmentId, BehaviorEvent, BehaviorEventType, EventDraft, EventId, EventMetadata, LearnerId,
    METADATA_VERSION, QuizEventData, SceneId, SessionId, VideoEventExtra,
};

/// Engagement score assigned to every dropout.
pub const DROPOUT_ENGAGEMENT_SCORE: f64 = -5.0;

/// Share of a video, from the start, in which a pause is not penalized.
const EARLY_PAUSE_FRACTION: f64 = 0.1;

/// Position as a percentage of duration, 0 when the duration is unusable.
pub fn completion_percentage(current_time_seconds: f64, duration_seconds: f64) -> f64 {
    if duration_seconds > 0.0 && current_time_seconds.is_finite() && duration_seconds.is_finite() {
        current_time_seconds / duration_seconds * 100.0
    } else {
        0.0
    }
}

/// Heuristic engagement contribution of a video event.
pub fn video_engagement_score(
    event_type: BehaviorEventType,
    current_time_seconds: f64,
    duration_seconds: f64,
) -> f64 {
    match event_type {
        BehaviorEventType::Play => 1.0,
        BehaviorEventType::Pause => {
            let fraction = completion_percentage(current_time_seconds, duration_seconds) / 100.0;
            if fraction < EARLY_PAUSE_FRACTION {
                0.0
            } else {
                -1.0
            }
        }
        BehaviorEventType::Seek => -1.0,
        BehaviorEventType::Rewind => -2.0,
        BehaviorEventType::Complete => 10.0,
        BehaviorEventType::Dropout => DROPOUT_ENGAGEMENT_SCORE,
        _ => 0.0,
    }
}

/// Heuristic engagement contribution of a quiz event.
pub fn quiz_engagement_score(event_type: BehaviorEventType) -> f64 {
    match event_type {
        BehaviorEventType::QuizPass => 10.0,
        BehaviorEventType::QuizFail => -2.0,
        BehaviorEventType::QuizAttempt => 5.0,
        _ => 0.0,
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued.
    Empty,
    /// The batch was written.
    Flushed(usize),
    /// The write failed and the batch went back to the front of the queue.
    Requeued(usize),
}

/// Counters exposed for session snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorStats {
    pub queued: usize,
    pub flushed_batches: u64,
    pub flushed_events: u64,
    pub failed_flushes: u64,
}

/// Identity stamped onto every event from one collector.
#[derive(Debug, Clone)]
pub struct EventIdentity {
    pub session_id: SessionId,
    pub learner_id: LearnerId,
    pub assignment_id: Option<AssignmentId>,
    pub scene_id: Option<SceneId>,
}

#[derive(Debug)]
struct CollectorState {
    queue: VecDeque<BehaviorEvent>,
    scene_id: Option<SceneId>,
    last_event_at: Option<DateTime<Utc>>,
    active: bool,
    stats: CollectorStats,
}

/// Buffers behavior events for one session and flushes them in batches.
pub struct TelemetryCollector {
    config: TelemetryConfig,
    session_id: SessionId,
    learner_id: LearnerId,
    assignment_id: Option<AssignmentId>,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    started_at: DateTime<Utc>,
    state: Mutex<CollectorState>,
    /// Serializes flushes so a re-queued batch always lands ahead of newer events.
    flush_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl TelemetryCollector {
    /// Create a collector. The session clock starts now.
    pub fn new(
        config: TelemetryConfig,
        identity: EventIdentity,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            config,
            session_id: identity.session_id,
            learner_id: identity.learner_id,
            assignment_id: identity.assignment_id,
            repository,
            clock,
            ids,
            started_at,
            state: Mutex::new(CollectorState {
                queue: VecDeque::new(),
                scene_id: identity.scene_id,
                last_event_at: None,
                active: true,
                stats: CollectorStats::default(),
            }),
            flush_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Switch the scene stamped onto subsequent events.
    pub async fn set_scene(&self, scene_id: Option<SceneId>) {
        self.state.lock().await.scene_id = scene_id;
    }

    pub async fn stats(&self) -> CollectorStats {
        let state = self.state.lock().await;
        CollectorStats {
            queued: state.queue.len(),
            ..state.stats
        }
    }

    /// Stamp and enqueue an event, flushing if the batch is full.
    pub async fn track_event(&self, draft: EventDraft) -> Result<BehaviorEvent> {
        let (event, batch_full) = {
            let mut state = self.state.lock().await;
            if !state.active {
                return Err(EngineError::CollectorInactive);
            }

            let now = self.clock.now();
            let since_last = state
                .last_event_at
                .map(|last| (now - last).num_milliseconds())
                .unwrap_or(0);

            let event = BehaviorEvent {
                id: EventId::from(self.ids.next_uuid()),
                session_id: self.session_id.clone(),
                learner_id: self.learner_id.clone(),
                scene_id: state.scene_id.clone(),
                assignment_id: self.assignment_id.clone(),
                event_type: draft.event_type,
                timestamp: now,
                current_time_seconds: draft.current_time_seconds,
                video_duration_seconds: draft.video_duration_seconds,
                engagement_score: draft.engagement_score,
                metadata: EventMetadata {
                    version: METADATA_VERSION,
                    session_duration_ms: (now - self.started_at).num_milliseconds(),
                    time_since_last_event_ms: since_last,
                    completion_percentage: draft.completion_percentage,
                    dropout_reason: draft.dropout_reason,
                    seek_from_seconds: draft.seek_from_seconds,
                    topic: draft.topic,
                    quiz: draft.quiz,
                },
            };

            state.last_event_at = Some(now);
            state.queue.push_back(event.clone());
            trace!(
                session_id = %self.session_id,
                event_type = ?event.event_type,
                queued = state.queue.len(),
                "Tracked behavior event"
            );
            (event, state.queue.len() >= self.config.batch_size)
        };

        if batch_full {
            self.flush().await;
        }

        Ok(event)
    }

    /// Track a video event, deriving its engagement score and completion.
    pub async fn track_video_event(
        &self,
        event_type: BehaviorEventType,
        current_time_seconds: f64,
        duration_seconds: f64,
        extra: VideoEventExtra,
    ) -> Result<BehaviorEvent> {
        let mut draft = EventDraft::new(event_type)
            .with_position(current_time_seconds, duration_seconds)
            .with_score(video_engagement_score(
                event_type,
                current_time_seconds,
                duration_seconds,
            ));
        draft.completion_percentage = Some(completion_percentage(
            current_time_seconds,
            duration_seconds,
        ));
        draft.seek_from_seconds = extra.seek_from_seconds;
        draft.topic = extra.topic;
        self.track_event(draft).await
    }

    /// Track a quiz event with its fixed engagement score.
    pub async fn track_quiz_event(
        &self,
        event_type: BehaviorEventType,
        quiz: QuizEventData,
    ) -> Result<BehaviorEvent> {
        let mut draft = EventDraft::new(event_type)
            .with_score(quiz_engagement_score(event_type))
            .with_quiz(quiz.clone());
        draft.topic = quiz.topic;
        self.track_event(draft).await
    }

    /// Track a learner leaving the video early.
    pub async fn track_dropout(
        &self,
        current_time_seconds: f64,
        duration_seconds: f64,
        reason: impl Into<String>,
    ) -> Result<BehaviorEvent> {
        let mut draft = EventDraft::new(BehaviorEventType::Dropout)
            .with_position(current_time_seconds, duration_seconds)
            .with_score(DROPOUT_ENGAGEMENT_SCORE);
        draft.completion_percentage = Some(completion_percentage(
            current_time_seconds,
            duration_seconds,
        ));
        draft.dropout_reason = Some(reason.into());
        self.track_event(draft).await
    }

    /// Write everything queued as one batch.
    pub async fn flush(&self) -> FlushOutcome {
        let _flushing = self.flush_lock.lock().await;

        let batch: Vec<BehaviorEvent> = {
            let mut state = self.state.lock().await;
            state.queue.drain(..).collect()
        };

        if batch.is_empty() {
            trace!(session_id = %self.session_id, "Nothing to flush");
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        match self.repository.insert_events(&batch).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.stats.flushed_batches += 1;
                state.stats.flushed_events += count as u64;
                debug!(session_id = %self.session_id, count, "Flushed telemetry batch");
                FlushOutcome::Flushed(count)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                for event in batch.into_iter().rev() {
                    state.queue.push_front(event);
                }
                state.stats.failed_flushes += 1;
                warn!(
                    session_id = %self.session_id,
                    count,
                    queued = state.queue.len(),
                    error = %e,
                    "Telemetry flush failed, batch re-queued"
                );
                FlushOutcome::Requeued(count)
            }
        }
    }

    /// Spawn the periodic flush timer. It stops when the collector shuts down.
    pub fn spawn_flush_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        let shutdown = self.shutdown.child_token();
        let interval = Duration::from_millis(self.config.flush_interval_ms.max(1));

        tokio::spawn(async move {
            debug!(session_id = %collector.session_id, "Flush timer started");
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,

                    _ = tokio::time::sleep(interval) => {
                        collector.flush().await;
                    }
                }
            }
            debug!(session_id = %collector.session_id, "Flush timer stopped");
        })
    }

    /// Stop the flush timer without flushing.
    pub fn cancel_flush_timer(&self) {
        self.shutdown.cancel();
    }

    /// Cancel the flush timer, attempt a final flush and stop accepting events.
    pub async fn shutdown(&self) -> FlushOutcome {
        self.shutdown.cancel();
        let outcome = self.flush().await;
        self.state.lock().await.active = false;
        debug!(session_id = %self.session_id, ?outcome, "Telemetry collector shut down");
        outcome
    }
}

impl std::fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCollector")
            .field("session_id", &self.session_id)
            .field("batch_size", &self.config.batch_size)
            .field("flush_interval_ms", &self.config.flush_interval_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SequentialIds};
    use crate::repository::InMemoryRepository;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        clock: Arc<ManualClock>,
        collector: Arc<TelemetryCollector>,
    }

    fn fixture(config: TelemetryConfig) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let clock = Arc::new(ManualClock::default());
        let collector = Arc::new(TelemetryCollector::new(
            config,
            EventIdentity {
                session_id: SessionId::from("sess-1"),
                learner_id: LearnerId::from("learner-1"),
                assignment_id: Some(AssignmentId::from("assign-1")),
                scene_id: Some(SceneId::from("scene-1")),
            },
            repo.clone(),
            clock.clone(),
            Arc::new(SequentialIds::new()),
        ));
        Fixture {
            repo,
            clock,
            collector,
        }
    }

    fn play() -> EventDraft {
        EventDraft::new(BehaviorEventType::Play).with_score(1.0)
    }

    #[tokio::test]
    async fn tenth_event_flushes_whole_batch_in_order() {
        let fx = fixture(TelemetryConfig::default());

        let mut tracked = Vec::new();
        for _ in 0..9 {
            tracked.push(fx.collector.track_event(play()).await.unwrap().id);
        }
        assert_eq!(fx.collector.stats().await.queued, 9);
        assert!(fx.repo.events().await.is_empty());

        tracked.push(fx.collector.track_event(play()).await.unwrap().id);

        let stats = fx.collector.stats().await;
        assert_eq!(stats.flushed_batches, 1);
        assert_eq!(stats.queued, 0);

        let stored: Vec<_> = fx.repo.events().await.iter().map(|e| e.id).collect();
        assert_eq!(stored, tracked);
    }

    #[tokio::test]
    async fn events_are_stamped_with_session_timing() {
        let fx = fixture(TelemetryConfig::default());

        fx.clock.advance_secs(2);
        let first = fx.collector.track_event(play()).await.unwrap();
        fx.clock.advance_millis(1500);
        let second = fx.collector.track_event(play()).await.unwrap();

        assert_eq!(first.metadata.session_duration_ms, 2000);
        assert_eq!(first.metadata.time_since_last_event_ms, 0);
        assert_eq!(second.metadata.session_duration_ms, 3500);
        assert_eq!(second.metadata.time_since_last_event_ms, 1500);
        assert_eq!(second.scene_id, Some(SceneId::from("scene-1")));
        assert_eq!(second.metadata.version, METADATA_VERSION);
    }

    #[tokio::test]
    async fn failed_flush_requeues_ahead_of_new_events() {
        let fx = fixture(TelemetryConfig {
            batch_size: 3,
            ..Default::default()
        });
        fx.repo.set_unavailable(true);

        let mut tracked = Vec::new();
        for _ in 0..3 {
            tracked.push(fx.collector.track_event(play()).await.unwrap().id);
        }
        let stats = fx.collector.stats().await;
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(stats.queued, 3);

        fx.repo.set_unavailable(false);
        tracked.push(fx.collector.track_event(play()).await.unwrap().id);

        let stored: Vec<_> = fx.repo.events().await.iter().map(|e| e.id).collect();
        assert_eq!(stored, tracked);
        assert_eq!(fx.collector.stats().await.queued, 0);
    }

    #[tokio::test]
    async fn manual_flush_reports_outcome() {
        let fx = fixture(TelemetryConfig::default());
        assert_eq!(fx.collector.flush().await, FlushOutcome::Empty);

        fx.collector.track_event(play()).await.unwrap();
        fx.repo.set_unavailable(true);
        assert_eq!(fx.collector.flush().await, FlushOutcome::Requeued(1));

        fx.repo.set_unavailable(false);
        assert_eq!(fx.collector.flush().await, FlushOutcome::Flushed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_timer_writes_partial_batch() {
        let fx = fixture(TelemetryConfig::default());
        let timer = fx.collector.spawn_flush_timer();

        for _ in 0..3 {
            fx.collector.track_event(play()).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(fx.repo.events().await.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.repo.events().await.len(), 3);

        fx.collector.shutdown().await;
        timer.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_flushes_and_rejects_new_events() {
        let fx = fixture(TelemetryConfig::default());
        fx.collector.track_event(play()).await.unwrap();

        assert_eq!(fx.collector.shutdown().await, FlushOutcome::Flushed(1));

        let err = fx.collector.track_event(play()).await.unwrap_err();
        assert!(matches!(err, EngineError::CollectorInactive));
    }

    #[tokio::test]
    async fn video_helpers_compute_score_and_completion() {
        let fx = fixture(TelemetryConfig::default());

        let early_pause = fx
            .collector
            .track_video_event(BehaviorEventType::Pause, 5.0, 100.0, VideoEventExtra::default())
            .await
            .unwrap();
        assert_eq!(early_pause.engagement_score, 0.0);
        assert_eq!(early_pause.metadata.completion_percentage, Some(5.0));

        let late_pause = fx
            .collector
            .track_video_event(BehaviorEventType::Pause, 50.0, 100.0, VideoEventExtra::default())
            .await
            .unwrap();
        assert_eq!(late_pause.engagement_score, -1.0);

        let dropout = fx
            .collector
            .track_dropout(30.0, 120.0, "closed tab")
            .await
            .unwrap();
        assert_eq!(dropout.engagement_score, DROPOUT_ENGAGEMENT_SCORE);
        assert_eq!(dropout.metadata.completion_percentage, Some(25.0));
        assert_eq!(dropout.metadata.dropout_reason.as_deref(), Some("closed tab"));
    }

    #[test]
    fn score_tables() {
        assert_eq!(video_engagement_score(BehaviorEventType::Play, 0.0, 10.0), 1.0);
        assert_eq!(video_engagement_score(BehaviorEventType::Seek, 3.0, 10.0), -1.0);
        assert_eq!(video_engagement_score(BehaviorEventType::Rewind, 3.0, 10.0), -2.0);
        assert_eq!(video_engagement_score(BehaviorEventType::Complete, 10.0, 10.0), 10.0);
        assert_eq!(quiz_engagement_score(BehaviorEventType::QuizPass), 10.0);
        assert_eq!(quiz_engagement_score(BehaviorEventType::QuizFail), -2.0);
        assert_eq!(quiz_engagement_score(BehaviorEventType::QuizAttempt), 5.0);
    }

    #[test]
    fn zero_duration_is_guarded() {
        assert_eq!(completion_percentage(12.0, 0.0), 0.0);
        assert_eq!(video_engagement_score(BehaviorEventType::Pause, 12.0, 0.0), 0.0);
    }
}
