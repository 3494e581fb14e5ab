//! tutor-engine - adaptive assessment and behavioral remediation
//!
//! This crate tracks how a learner interacts with training videos and
//! quizzes, adapts quiz difficulty to their performance, and offers
//! remediation when they appear to be struggling.
//!
//! ## Components
//!
//! - [`TelemetryCollector`] batches behavior events and writes them through
//!   the [`Repository`]
//! - [`EngagementAggregator`] folds video events into a per-position
//!   engagement heatmap and a module dropout rollup
//! - [`AdaptiveSessionEngine`] runs the difficulty state machine and picks
//!   questions from the [`QuestionBank`]
//! - [`StruggleDetector`] and [`RemediationDispatcher`] turn struggle signals
//!   into suggestions
//!
//! [`LearnerSession`] wires them together for one learner, and
//! [`SessionActor`] runs a session as a single-writer task.

pub mod actor;
pub mod adaptive;
pub mod clock;
pub mod config;
pub mod error;
pub mod feedback;
pub mod heatmap;
pub mod question_bank;
pub mod remediation;
pub mod repository;
pub mod session;
pub mod struggle;
pub mod telemetry;
pub mod types;

pub use actor::{SessionActor, SessionHandle};
pub use adaptive::{AdaptiveSessionEngine, AnswerOutcome, QuizSummary};
pub use clock::{Clock, IdGenerator, ManualClock, SequentialIds, SystemClock, UuidV7Ids};
pub use config::{
    AdaptiveRules, EngineConfig, HeatmapConfig, SelectionConfig, StruggleConfig, TelemetryConfig,
};
pub use error::{EngineError, Result};
pub use feedback::{BroadcastFeedback, Feedback, FeedbackSeverity, FeedbackSink, TracingFeedback};
pub use heatmap::{DropoutSample, EngagementAggregator, HeatmapUpdate};
pub use question_bank::{CandidateQuery, InMemoryQuestionBank, QuestionBank};
pub use remediation::RemediationDispatcher;
pub use repository::{InMemoryRepository, Repository};
pub use session::{
    AnswerResult, Collaborators, LearnerSession, NextQuestion, SessionSnapshot, TrackOutcome,
    TrackRequest,
};
pub use struggle::{StruggleDetector, StruggleSignal};
pub use telemetry::{FlushOutcome, TelemetryCollector};
pub use types::*;
