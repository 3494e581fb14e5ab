//! Domain records shared by the engine components.
//!
//! Identifiers supplied by the host (learners, modules, questions) are string
//! newtypes. Identifiers the engine mints itself are UUID newtypes produced by
//! an injected [`IdGenerator`](crate::clock::IdGenerator).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AdaptiveRules;

/// Schema version stamped on every persisted metadata block.
pub const METADATA_VERSION: u32 = 1;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Telemetry session (one viewing session of one learner).
    SessionId
);
string_id!(LearnerId);
string_id!(ModuleId);
string_id!(SceneId);
string_id!(AssignmentId);
string_id!(CompanyId);
string_id!(QuestionId);

uuid_id!(
    /// Identifier of a buffered behavior event.
    EventId
);
uuid_id!(
    /// Identifier of a persisted adaptive quiz session.
    QuizSessionId
);
uuid_id!(SuggestionId);
uuid_id!(
    /// Identifier of an append-only log row.
    RecordId
);

/// Who is learning what. Fixed for the lifetime of a learner session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerContext {
    pub learner_id: LearnerId,
    pub company_id: CompanyId,
    pub module_id: ModuleId,
    pub assignment_id: AssignmentId,
    /// Scene currently being watched, when the module has video scenes.
    pub scene_id: Option<SceneId>,
}

impl LearnerContext {
    pub fn new(
        learner_id: impl Into<LearnerId>,
        company_id: impl Into<CompanyId>,
        module_id: impl Into<ModuleId>,
        assignment_id: impl Into<AssignmentId>,
    ) -> Self {
        Self {
            learner_id: learner_id.into(),
            company_id: company_id.into(),
            module_id: module_id.into(),
            assignment_id: assignment_id.into(),
            scene_id: None,
        }
    }

    #[must_use]
    pub fn with_scene(mut self, scene_id: impl Into<SceneId>) -> Self {
        self.scene_id = Some(scene_id.into());
        self
    }
}

// --- Telemetry ---

/// Kind of a discrete learner behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorEventType {
    Play,
    Pause,
    Seek,
    Rewind,
    QuizAttempt,
    QuizPass,
    QuizFail,
    Dropout,
    Complete,
}

impl BehaviorEventType {
    /// Whether this event describes a position within a video.
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            Self::Play | Self::Pause | Self::Seek | Self::Rewind | Self::Dropout | Self::Complete
        )
    }
}

/// Quiz details attached to quiz events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizEventData {
    pub question_id: Option<QuestionId>,
    pub topic: Option<String>,
    /// 1-based attempt number for the question, when the host tracks retries.
    pub attempt: Option<u32>,
}

/// Structured metadata stamped onto every behavior event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub version: u32,
    /// Milliseconds since the telemetry session started.
    pub session_duration_ms: i64,
    /// Milliseconds since the previous tracked event (0 for the first).
    pub time_since_last_event_ms: i64,
    pub completion_percentage: Option<f64>,
    pub dropout_reason: Option<String>,
    /// Start position of a seek, used to compute skip distance.
    pub seek_from_seconds: Option<f64>,
    pub topic: Option<String>,
    pub quiz: Option<QuizEventData>,
}

/// Immutable record of one learner behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub id: EventId,
    pub session_id: SessionId,
    pub learner_id: LearnerId,
    pub scene_id: Option<SceneId>,
    pub assignment_id: Option<AssignmentId>,
    pub event_type: BehaviorEventType,
    pub timestamp: DateTime<Utc>,
    pub current_time_seconds: Option<f64>,
    pub video_duration_seconds: Option<f64>,
    pub engagement_score: f64,
    pub metadata: EventMetadata,
}

/// Partial event as submitted by the UI layer.
///
/// The collector fills in identity, timing and id when the draft is tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: BehaviorEventType,
    pub current_time_seconds: Option<f64>,
    pub video_duration_seconds: Option<f64>,
    pub engagement_score: f64,
    pub completion_percentage: Option<f64>,
    pub dropout_reason: Option<String>,
    pub seek_from_seconds: Option<f64>,
    pub topic: Option<String>,
    pub quiz: Option<QuizEventData>,
}

impl EventDraft {
    pub fn new(event_type: BehaviorEventType) -> Self {
        Self {
            event_type,
            current_time_seconds: None,
            video_duration_seconds: None,
            engagement_score: 0.0,
            completion_percentage: None,
            dropout_reason: None,
            seek_from_seconds: None,
            topic: None,
            quiz: None,
        }
    }

    #[must_use]
    pub fn with_position(mut self, current_time_seconds: f64, duration_seconds: f64) -> Self {
        self.current_time_seconds = Some(current_time_seconds);
        self.video_duration_seconds = Some(duration_seconds);
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.engagement_score = score;
        self
    }

    #[must_use]
    pub fn with_quiz(mut self, quiz: QuizEventData) -> Self {
        self.quiz = Some(quiz);
        self
    }
}

/// Optional extras a host can attach to a video event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoEventExtra {
    /// Position the learner seeked away from.
    pub seek_from_seconds: Option<f64>,
    pub topic: Option<String>,
}

// --- Engagement heatmap ---

/// Bucket address: one percentage position within one scene of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeatmapKey {
    pub module_id: ModuleId,
    pub scene_id: SceneId,
    /// Always within `0..=100`.
    pub position_percent: u8,
}

/// Aggregated engagement for one heatmap bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementHeatmapPoint {
    pub key: HeatmapKey,
    pub engagement_score: f64,
    pub dropout_count: u32,
    pub pause_count: u32,
    pub seek_count: u32,
    pub rewatch_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Module-level dropout rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAnalytics {
    pub module_id: ModuleId,
    pub average_completion_time_seconds: f64,
    /// Running count of dropouts (kept under its historical name).
    pub dropout_rate: u64,
    /// Most recent dropout bucket positions, oldest first.
    pub dropout_points: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

// --- Adaptive quiz ---

/// Question-pool tier for a quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
}

impl Difficulty {
    /// One level up, capped at `Advanced`.
    pub fn harder(self) -> Self {
        match self {
            Self::Basic => Self::Intermediate,
            Self::Intermediate | Self::Advanced => Self::Advanced,
        }
    }

    /// One level down, floored at `Basic`.
    pub fn easier(self) -> Self {
        match self {
            Self::Advanced => Self::Intermediate,
            Self::Intermediate | Self::Basic => Self::Basic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

/// A question as served by the question bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    pub difficulty: Difficulty,
    pub topic: String,
    pub hint: Option<String>,
    pub explanation: Option<String>,
}

/// Versioned bookkeeping carried on the persisted quiz session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub version: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_time_seconds: Option<i64>,
    /// Questions presented so far, in order. Never shrinks.
    pub question_history: Vec<QuestionId>,
}

/// Persisted state of one adaptive quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveQuizSession {
    pub id: QuizSessionId,
    pub learner_id: LearnerId,
    pub module_id: ModuleId,
    pub assignment_id: AssignmentId,
    pub company_id: CompanyId,
    pub status: QuizStatus,
    pub current_difficulty: Difficulty,
    pub correct_streak: u32,
    pub incorrect_streak: u32,
    pub total_questions_answered: u32,
    /// Fraction of answers correct, within `[0, 1]`.
    pub performance_score: f64,
    pub struggle_topics: BTreeSet<String>,
    pub mastered_topics: BTreeSet<String>,
    pub adaptive_rules: AdaptiveRules,
    pub metadata: SessionMetadata,
}

impl AdaptiveQuizSession {
    pub fn is_active(&self) -> bool {
        self.status == QuizStatus::Active
    }

    pub fn has_seen(&self, question_id: &QuestionId) -> bool {
        self.metadata.question_history.contains(question_id)
    }
}

/// Why the difficulty did or did not move after an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Hold,
    Advance { from: Difficulty, to: Difficulty },
    Regress { from: Difficulty, to: Difficulty },
}

impl Transition {
    pub fn changed_level(&self) -> bool {
        match self {
            Self::Hold => false,
            Self::Advance { from, to } | Self::Regress { from, to } => from != to,
        }
    }
}

/// Append-only record of one answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAttemptLog {
    pub id: RecordId,
    pub session_id: QuizSessionId,
    pub question_id: QuestionId,
    pub difficulty_presented: Difficulty,
    pub topic: String,
    pub user_answer: String,
    pub correct: bool,
    pub time_spent_seconds: f64,
    pub adaptive_reason: Transition,
    pub answered_at: DateTime<Utc>,
}

// --- Struggle detection and remediation ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StruggleType {
    QuizFailure,
    ExcessivePauses,
    CoachActivation,
    VideoSkipping,
    HelpRequests,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

/// A detected struggle, ready to be turned into suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrugglePattern {
    pub struggle_type: StruggleType,
    pub severity: Severity,
    pub topic: Option<String>,
    /// Counter value or skip distance that crossed the threshold.
    pub observed: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationType {
    Explanation,
    Microlearning,
    Example,
    Reminder,
    PeerSupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Active,
    Accepted,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionMetadata {
    pub struggle_type: StruggleType,
    pub severity: Severity,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A contextual intervention offered to the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationSuggestion {
    pub id: SuggestionId,
    #[serde(rename = "type")]
    pub suggestion_type: RemediationType,
    pub title: String,
    pub content: String,
    pub action_label: String,
    pub metadata: SuggestionMetadata,
    pub status: SuggestionStatus,
}

/// Standalone analytics row for one observed struggle signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StruggleObservation {
    pub id: RecordId,
    pub session_id: SessionId,
    pub learner_id: LearnerId,
    pub scene_id: Option<SceneId>,
    pub struggle_type: StruggleType,
    pub topic: Option<String>,
    /// Counter value after this observation (skip distance for skips).
    pub value: f64,
    pub triggered: bool,
    pub observed_at: DateTime<Utc>,
}

/// Persisted recommendation emitted for a detected pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRecord {
    pub id: RecordId,
    pub session_id: SessionId,
    pub learner_id: LearnerId,
    pub module_id: ModuleId,
    pub scene_id: Option<SceneId>,
    pub pattern: StrugglePattern,
    pub suggestion: RemediationSuggestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    #[serde(rename = "remediation_accepted")]
    Accepted,
    #[serde(rename = "remediation_dismissed")]
    Dismissed,
}

/// Lifecycle transition of a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationEvent {
    pub id: RecordId,
    pub session_id: SessionId,
    pub suggestion_id: SuggestionId,
    pub action: RemediationAction,
    pub at: DateTime<Utc>,
}

/// Everything the engine appends through [`Repository::insert_log`](crate::repository::Repository::insert_log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Attempt(QuestionAttemptLog),
    Struggle(StruggleObservation),
    Recommendation(RemediationRecord),
    Remediation(RemediationEvent),
}
