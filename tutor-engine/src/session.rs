//! Learner session controller.
//!
//! A `LearnerSession` composes the engine components for one learner and
//! routes every event to the components that care about it:
//!
//! ```text
//! track() ────► TelemetryCollector ──► BehaviorEvent
//!                                        │
//!                  video events ─────────┼──► EngagementAggregator (heatmap, dropout rollup)
//!                  pause / seek / fail ──┴──► StruggleDetector ──► RemediationDispatcher
//!
//! process_answer() ──► AdaptiveSessionEngine ──► quiz_pass / quiz_fail event ──► (as above)
//! ```
//!
//! All methods take `&mut self`; wrap the session in a
//! [`SessionActor`](crate::actor::SessionActor) to share it across tasks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adaptive::{AdaptiveSessionEngine, AnswerOutcome, QuizDeps, QuizSummary};
use crate::clock::{Clock, IdGenerator};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::feedback::FeedbackSink;
use crate::heatmap::{EngagementAggregator, position_bucket};
use crate::question_bank::QuestionBank;
use crate::remediation::{RemediationContext, RemediationDispatcher};
use crate::repository::Repository;
use crate::struggle::{StruggleCounters, StruggleDetector, StruggleSignal};
use crate::telemetry::{CollectorStats, EventIdentity, FlushOutcome, TelemetryCollector};
use crate::types::{
    AdaptiveQuizSession, BehaviorEvent, BehaviorEventType, EventDraft, LearnerContext, Question,
    QuestionId, QuizEventData, RemediationSuggestion, SceneId, SessionId, SuggestionId,
    VideoEventExtra,
};

/// External collaborators shared by all components of a session.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn Repository>,
    pub questions: Arc<dyn QuestionBank>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl Collaborators {
    fn quiz_deps(&self) -> QuizDeps {
        QuizDeps {
            repository: Arc::clone(&self.repository),
            questions: Arc::clone(&self.questions),
            feedback: Arc::clone(&self.feedback),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// A tracked event plus any suggestions it triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOutcome {
    pub event: BehaviorEvent,
    pub suggestions: Vec<RemediationSuggestion>,
}

/// An event for [`LearnerSession::track`], in one of the shapes the
/// telemetry collector accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackRequest {
    Event(EventDraft),
    Video {
        event_type: BehaviorEventType,
        current_time_seconds: f64,
        duration_seconds: f64,
        extra: VideoEventExtra,
    },
    Quiz {
        event_type: BehaviorEventType,
        quiz: QuizEventData,
    },
    Dropout {
        current_time_seconds: f64,
        duration_seconds: f64,
        reason: String,
    },
}

impl TrackRequest {
    /// A video event with no seek origin or topic.
    pub fn video(
        event_type: BehaviorEventType,
        current_time_seconds: f64,
        duration_seconds: f64,
    ) -> Self {
        Self::Video {
            event_type,
            current_time_seconds,
            duration_seconds,
            extra: VideoEventExtra::default(),
        }
    }
}

/// Result of `get_next_question`.
#[derive(Debug, Clone, PartialEq)]
pub enum NextQuestion {
    Question(Question),
    /// The pool is exhausted and the quiz has been completed.
    Completed(QuizSummary),
}

/// A graded answer plus any suggestions it triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResult {
    pub outcome: AnswerOutcome,
    pub suggestions: Vec<RemediationSuggestion>,
}

/// Point-in-time view of a learner session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub context: LearnerContext,
    pub telemetry: CollectorStats,
    pub quiz: Option<QuizSummary>,
    pub current_question: Option<QuestionId>,
    pub struggle: StruggleCounters,
    pub active_suggestions: Vec<RemediationSuggestion>,
}

/// One learner's telemetry, quiz and remediation state.
pub struct LearnerSession {
    context: LearnerContext,
    clock: Arc<dyn Clock>,
    collector: Arc<TelemetryCollector>,
    flush_timer: Option<JoinHandle<()>>,
    heatmap: EngagementAggregator,
    quiz: AdaptiveSessionEngine,
    struggle: StruggleDetector,
    remediation: RemediationDispatcher,
}

impl LearnerSession {
    /// Start a session and its flush timer. Must be called inside a tokio runtime.
    pub fn start(
        config: EngineConfig,
        context: LearnerContext,
        collaborators: Collaborators,
    ) -> Self {
        let session_id = SessionId::from(collaborators.ids.next_uuid().to_string());

        let collector = Arc::new(TelemetryCollector::new(
            config.telemetry,
            EventIdentity {
                session_id: session_id.clone(),
                learner_id: context.learner_id.clone(),
                assignment_id: Some(context.assignment_id.clone()),
                scene_id: context.scene_id.clone(),
            },
            Arc::clone(&collaborators.repository),
            Arc::clone(&collaborators.clock),
            Arc::clone(&collaborators.ids),
        ));
        let flush_timer = Some(collector.spawn_flush_timer());

        let heatmap = EngagementAggregator::new(
            config.heatmap,
            context.module_id.clone(),
            Arc::clone(&collaborators.repository),
            Arc::clone(&collaborators.clock),
        );
        let quiz = AdaptiveSessionEngine::new(
            context.clone(),
            config.adaptive,
            config.selection,
            collaborators.quiz_deps(),
        );
        let remediation = RemediationDispatcher::new(
            RemediationContext {
                session_id: session_id.clone(),
                learner_id: context.learner_id.clone(),
                module_id: context.module_id.clone(),
                scene_id: context.scene_id.clone(),
            },
            Arc::clone(&collaborators.repository),
            Arc::clone(&collaborators.clock),
            Arc::clone(&collaborators.ids),
        );

        info!(
            session_id = %session_id,
            learner_id = %context.learner_id,
            module_id = %context.module_id,
            "Learner session started"
        );

        Self {
            context,
            clock: collaborators.clock,
            collector,
            flush_timer,
            heatmap,
            quiz,
            struggle: StruggleDetector::new(config.struggle),
            remediation,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.collector.session_id()
    }

    pub fn context(&self) -> &LearnerContext {
        &self.context
    }

    /// Switch the video scene for subsequent events.
    pub async fn set_scene(&mut self, scene_id: Option<SceneId>) {
        self.collector.set_scene(scene_id.clone()).await;
        self.remediation.set_scene(scene_id.clone());
        self.context.scene_id = scene_id;
    }

    // -- quiz ---------------------------------------------------------------

    /// Resume or create the learner's adaptive quiz.
    pub async fn initialize_session(&mut self) -> Result<AdaptiveQuizSession> {
        self.quiz.initialize().await.cloned()
    }

    /// Present the next question, completing the quiz when the pool is exhausted.
    pub async fn get_next_question(&mut self) -> Result<NextQuestion> {
        match self.quiz.select_next_question().await? {
            Some(question) => Ok(NextQuestion::Question(question)),
            None => self.complete_quiz().await.map(NextQuestion::Completed),
        }
    }

    /// Grade the outstanding question.
    ///
    /// The result is mirrored into telemetry as `quiz_pass` or `quiz_fail`,
    /// and failures feed the struggle detector.
    pub async fn process_answer(
        &mut self,
        user_answer: &str,
        is_correct: bool,
    ) -> Result<AnswerResult> {
        let outcome = self.quiz.process_answer(user_answer, is_correct).await?;

        let event_type = if is_correct {
            BehaviorEventType::QuizPass
        } else {
            BehaviorEventType::QuizFail
        };
        let quiz = QuizEventData {
            question_id: Some(outcome.question_id.clone()),
            topic: Some(outcome.topic.clone()),
            attempt: None,
        };

        let suggestions = match self.collector.track_quiz_event(event_type, quiz).await {
            Ok(event) => self.route(&event).await,
            Err(e) => {
                warn!(error = %e, "Could not track answer event");
                if is_correct {
                    Vec::new()
                } else {
                    self.observe(StruggleSignal::QuizFailure {
                        topic: Some(outcome.topic.clone()),
                        attempt: None,
                    })
                    .await
                }
            }
        };

        Ok(AnswerResult {
            outcome,
            suggestions,
        })
    }

    /// Mark the quiz completed and report its summary.
    pub async fn complete_quiz(&mut self) -> Result<QuizSummary> {
        self.quiz.complete().await
    }

    // -- telemetry ----------------------------------------------------------

    /// Stamp and queue an event, then route it to the other components.
    pub async fn track(&mut self, request: TrackRequest) -> Result<TrackOutcome> {
        let collector = &self.collector;
        let event = match request {
            TrackRequest::Event(draft) => collector.track_event(draft).await?,
            TrackRequest::Video {
                event_type,
                current_time_seconds,
                duration_seconds,
                extra,
            } => {
                collector
                    .track_video_event(event_type, current_time_seconds, duration_seconds, extra)
                    .await?
            }
            TrackRequest::Quiz { event_type, quiz } => {
                collector.track_quiz_event(event_type, quiz).await?
            }
            TrackRequest::Dropout {
                current_time_seconds,
                duration_seconds,
                reason,
            } => {
                collector
                    .track_dropout(current_time_seconds, duration_seconds, reason)
                    .await?
            }
        };
        let suggestions = self.route(&event).await;
        Ok(TrackOutcome { event, suggestions })
    }

    /// Mirror a tracked event into the heatmap and the struggle detector.
    async fn route(&mut self, event: &BehaviorEvent) -> Vec<RemediationSuggestion> {
        if event.event_type.is_video() {
            self.update_engagement(event).await;
        }

        let topic = event.metadata.topic.clone();
        let signal = match event.event_type {
            BehaviorEventType::Pause => Some(StruggleSignal::Pause { topic }),
            BehaviorEventType::Seek => event
                .metadata
                .seek_from_seconds
                .zip(event.current_time_seconds)
                .map(|(from_seconds, to_seconds)| StruggleSignal::Skip {
                    from_seconds,
                    to_seconds,
                    topic,
                }),
            BehaviorEventType::QuizFail => Some(StruggleSignal::QuizFailure {
                topic,
                attempt: event.metadata.quiz.as_ref().and_then(|q| q.attempt),
            }),
            _ => None,
        };

        match signal {
            Some(signal) => self.observe(signal).await,
            None => Vec::new(),
        }
    }

    async fn update_engagement(&mut self, event: &BehaviorEvent) {
        let position = event.current_time_seconds.unwrap_or(0.0);
        let duration = event.video_duration_seconds.unwrap_or(0.0);

        if let Some(scene_id) = &event.scene_id
            && event.current_time_seconds.is_some()
        {
            if let Err(e) = self
                .heatmap
                .update_heatmap(
                    scene_id,
                    position,
                    duration,
                    event.engagement_score,
                    event.event_type,
                )
                .await
            {
                warn!(scene_id = %scene_id, error = %e, "Heatmap update failed");
            }
        }

        if event.event_type == BehaviorEventType::Dropout {
            let session_seconds = event.metadata.session_duration_ms as f64 / 1000.0;
            if let Err(e) = self
                .heatmap
                .record_dropout(position_bucket(position, duration), session_seconds)
                .await
            {
                warn!(module_id = %self.context.module_id, error = %e, "Dropout rollup failed");
            }
        }
    }

    // -- struggle signals ---------------------------------------------------

    /// The learner explicitly asked for help.
    pub async fn record_help_request(
        &mut self,
        topic: Option<String>,
    ) -> Vec<RemediationSuggestion> {
        self.observe(StruggleSignal::HelpRequest { topic }).await
    }

    /// The learner opened the AI coach.
    pub async fn record_coach_activation(
        &mut self,
        topic: Option<String>,
    ) -> Vec<RemediationSuggestion> {
        self.observe(StruggleSignal::CoachActivation { topic }).await
    }

    async fn observe(&mut self, signal: StruggleSignal) -> Vec<RemediationSuggestion> {
        let Some(observation) = self.struggle.observe(signal, self.clock.now()) else {
            return Vec::new();
        };

        if let Err(e) = self.remediation.log_observation(&observation).await {
            warn!(
                struggle_type = ?observation.struggle_type,
                error = %e,
                "Failed to log struggle observation"
            );
        }

        match &observation.pattern {
            Some(pattern) => self.remediation.dispatch(pattern).await,
            None => Vec::new(),
        }
    }

    // -- suggestions --------------------------------------------------------

    pub async fn accept_suggestion(&mut self, id: SuggestionId) -> Result<RemediationSuggestion> {
        self.remediation.accept(id).await
    }

    pub async fn dismiss_suggestion(&mut self, id: SuggestionId) -> Result<RemediationSuggestion> {
        self.remediation.dismiss(id).await
    }

    pub fn active_suggestions(&self) -> &[RemediationSuggestion] {
        self.remediation.active()
    }

    // -- lifecycle ----------------------------------------------------------

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id().clone(),
            context: self.context.clone(),
            telemetry: self.collector.stats().await,
            quiz: self.quiz.session().map(QuizSummary::from),
            current_question: self.quiz.current_question().map(|q| q.id.clone()),
            struggle: self.struggle.counters().clone(),
            active_suggestions: self.remediation.active().to_vec(),
        }
    }

    /// Stop the flush timer, flush what is buffered and reject further events.
    ///
    /// Calling it again is harmless and reports `FlushOutcome::Empty` unless
    /// an earlier final flush failed.
    pub async fn shutdown(&mut self) -> FlushOutcome {
        let outcome = self.collector.shutdown().await;
        if let Some(timer) = self.flush_timer.take()
            && let Err(e) = timer.await
        {
            warn!(error = %e, "Flush timer task failed");
        }
        debug!(session_id = %self.session_id(), ?outcome, "Learner session shut down");
        outcome
    }
}

impl Drop for LearnerSession {
    fn drop(&mut self) {
        self.collector.cancel_flush_timer();
    }
}

impl std::fmt::Debug for LearnerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnerSession")
            .field("session_id", self.session_id())
            .field("context", &self.context)
            .field("quiz", &self.quiz)
            .field("remediation", &self.remediation)
            .finish()
    }
}
