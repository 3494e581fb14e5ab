//! Adaptive quiz session engine.
//!
//! Difficulty moves one level at a time with hysteresis:
//!
//! ```text
//!            streak >= advance AND score >= mastery
//!   basic ───────────────────► intermediate ───────────────────► advanced
//!         ◄───────────────────              ◄───────────────────
//!            streak >= regress OR score < struggling
//! ```
//!
//! Advance is evaluated first; regress only applies when advance does not.
//! All state changes are computed on a copy of the session and committed only
//! after the repository accepted them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, IdGenerator};
use crate::config::{AdaptiveRules, SelectionConfig};
use crate::error::{EngineError, Result};
use crate::feedback::{Feedback, FeedbackSeverity, FeedbackSink};
use crate::question_bank::{CandidateQuery, QuestionBank};
use crate::repository::Repository;
use crate::types::{
    AdaptiveQuizSession, Difficulty, LearnerContext, METADATA_VERSION, Question,
    QuestionAttemptLog, QuestionId, QuizSessionId, QuizStatus, RecordId, SessionMetadata,
    Transition,
};

/// Decide the difficulty move for a session whose counters are already updated.
pub fn evaluate_transition(session: &AdaptiveQuizSession) -> Transition {
    let rules = &session.adaptive_rules;
    let from = session.current_difficulty;

    if session.correct_streak >= rules.correct_streak_to_advance
        && session.performance_score >= rules.mastery_threshold
    {
        Transition::Advance {
            from,
            to: from.harder(),
        }
    } else if session.incorrect_streak >= rules.incorrect_streak_to_regress
        || session.performance_score < rules.struggling_threshold
    {
        Transition::Regress {
            from,
            to: from.easier(),
        }
    } else {
        Transition::Hold
    }
}

/// Fold one answered question into the session.
///
/// Updates streaks, the running score, the difficulty level and the topic
/// sets, and returns the transition that was applied.
pub fn apply_answer(
    session: &mut AdaptiveQuizSession,
    topic: &str,
    is_correct: bool,
    time_spent_seconds: f64,
) -> Transition {
    let previous_count = session.total_questions_answered;
    session.total_questions_answered += 1;

    if is_correct {
        session.correct_streak += 1;
        session.incorrect_streak = 0;
    } else {
        session.correct_streak = 0;
        session.incorrect_streak += 1;
    }

    let hit = if is_correct { 1.0 } else { 0.0 };
    session.performance_score = (session.performance_score * f64::from(previous_count) + hit)
        / f64::from(session.total_questions_answered);

    let transition = evaluate_transition(session);
    match transition {
        Transition::Advance { to, .. } | Transition::Regress { to, .. } => {
            session.current_difficulty = to;
        }
        Transition::Hold => {}
    }

    classify_topic(session, topic, is_correct, time_spent_seconds);
    transition
}

/// Timing heuristic for the struggle and mastery topic sets.
///
/// The two sets stay disjoint: a topic moves, it is never in both.
fn classify_topic(
    session: &mut AdaptiveQuizSession,
    topic: &str,
    is_correct: bool,
    time_spent_seconds: f64,
) {
    let rules = &session.adaptive_rules;
    if !is_correct && time_spent_seconds > rules.struggle_time_seconds {
        session.mastered_topics.remove(topic);
        session.struggle_topics.insert(topic.to_string());
    } else if is_correct && time_spent_seconds < rules.mastery_time_seconds {
        session.struggle_topics.remove(topic);
        session.mastered_topics.insert(topic.to_string());
    }
}

/// Pick the next question: struggle topics first, then anything not yet
/// mastered, then whatever came first.
pub fn choose_candidate<'a>(
    candidates: &'a [Question],
    session: &AdaptiveQuizSession,
) -> Option<&'a Question> {
    let unseen = || candidates.iter().filter(|q| !session.has_seen(&q.id));

    unseen()
        .find(|q| session.struggle_topics.contains(&q.topic))
        .or_else(|| unseen().find(|q| !session.mastered_topics.contains(&q.topic)))
        .or_else(|| unseen().next())
}

/// Result of processing one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub question_id: QuestionId,
    pub topic: String,
    pub correct: bool,
    pub time_spent_seconds: f64,
    pub transition: Transition,
    pub difficulty: Difficulty,
    pub performance_score: f64,
    pub correct_streak: u32,
    pub incorrect_streak: u32,
}

/// Final report for a finished quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSummary {
    pub session_id: QuizSessionId,
    pub status: QuizStatus,
    pub total_questions_answered: u32,
    pub performance_score: f64,
    pub final_difficulty: Difficulty,
    pub total_time_seconds: Option<i64>,
    pub mastered_topics: Vec<String>,
    pub struggle_topics: Vec<String>,
}

impl From<&AdaptiveQuizSession> for QuizSummary {
    fn from(session: &AdaptiveQuizSession) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            total_questions_answered: session.total_questions_answered,
            performance_score: session.performance_score,
            final_difficulty: session.current_difficulty,
            total_time_seconds: session.metadata.total_time_seconds,
            mastered_topics: session.mastered_topics.iter().cloned().collect(),
            struggle_topics: session.struggle_topics.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct PresentedQuestion {
    question: Question,
    presented_at: chrono::DateTime<chrono::Utc>,
}

/// Collaborators the quiz engine talks to.
#[derive(Clone)]
pub struct QuizDeps {
    pub repository: Arc<dyn Repository>,
    pub questions: Arc<dyn QuestionBank>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// Owns one learner's adaptive quiz for a module assignment.
pub struct AdaptiveSessionEngine {
    context: LearnerContext,
    rules: AdaptiveRules,
    selection: SelectionConfig,
    deps: QuizDeps,
    session: Option<AdaptiveQuizSession>,
    current: Option<PresentedQuestion>,
}

impl AdaptiveSessionEngine {
    pub fn new(
        context: LearnerContext,
        rules: AdaptiveRules,
        selection: SelectionConfig,
        deps: QuizDeps,
    ) -> Self {
        Self {
            context,
            rules,
            selection,
            deps,
            session: None,
            current: None,
        }
    }

    pub fn session(&self) -> Option<&AdaptiveQuizSession> {
        self.session.as_ref()
    }

    /// The question awaiting an answer, if any.
    pub fn current_question(&self) -> Option<&Question> {
        self.current.as_ref().map(|p| &p.question)
    }

    fn report_failure(&self, title: &str, err: &EngineError) {
        self.deps
            .feedback
            .notify(Feedback::error(title, err.to_string()));
    }

    /// Resume the learner's active quiz or start a new one.
    pub async fn initialize(&mut self) -> Result<&AdaptiveQuizSession> {
        match self.load_or_create().await {
            Ok(session) => {
                self.current = None;
                Ok(self.session.insert(session))
            }
            Err(e) => {
                warn!(learner_id = %self.context.learner_id, error = %e, "Quiz initialization failed");
                self.report_failure("Could not start quiz", &e);
                Err(e)
            }
        }
    }

    async fn load_or_create(&self) -> Result<AdaptiveQuizSession> {
        let ctx = &self.context;
        if let Some(existing) = self
            .deps
            .repository
            .find_active_session(&ctx.learner_id, &ctx.module_id, &ctx.assignment_id)
            .await?
        {
            info!(
                session_id = %existing.id,
                answered = existing.total_questions_answered,
                "Resuming active quiz session"
            );
            return Ok(existing);
        }

        let session = AdaptiveQuizSession {
            id: QuizSessionId::from(self.deps.ids.next_uuid()),
            learner_id: ctx.learner_id.clone(),
            module_id: ctx.module_id.clone(),
            assignment_id: ctx.assignment_id.clone(),
            company_id: ctx.company_id.clone(),
            status: QuizStatus::Active,
            current_difficulty: Difficulty::Basic,
            correct_streak: 0,
            incorrect_streak: 0,
            total_questions_answered: 0,
            performance_score: 0.0,
            struggle_topics: Default::default(),
            mastered_topics: Default::default(),
            adaptive_rules: self.rules.clone(),
            metadata: SessionMetadata {
                version: METADATA_VERSION,
                started_at: self.deps.clock.now(),
                completed_at: None,
                total_time_seconds: None,
                question_history: Vec::new(),
            },
        };
        self.deps.repository.insert_session(&session).await?;
        info!(session_id = %session.id, learner_id = %ctx.learner_id, "Created quiz session");
        Ok(session)
    }

    fn active_session(&self) -> Result<&AdaptiveQuizSession> {
        let session = self
            .session
            .as_ref()
            .ok_or(EngineError::SessionNotInitialized)?;
        if session.is_active() {
            Ok(session)
        } else {
            Err(EngineError::SessionCompleted)
        }
    }

    /// Present the next question, or `None` when the pool is exhausted.
    pub async fn select_next_question(&mut self) -> Result<Option<Question>> {
        let session = self.active_session()?;
        let exclude = session.metadata.question_history.clone();

        let mut query = CandidateQuery {
            company_id: session.company_id.clone(),
            difficulty: Some(session.current_difficulty),
            exclude,
            limit: self.selection.candidate_limit,
        };
        let mut candidates = self.deps.questions.fetch_candidates(&query).await?;

        if candidates.is_empty() {
            debug!(
                difficulty = %session.current_difficulty,
                "No candidates at current difficulty, broadening"
            );
            query.difficulty = None;
            query.limit = self.selection.fallback_limit;
            candidates = self.deps.questions.fetch_candidates(&query).await?;
        }

        let Some(question) = choose_candidate(&candidates, session).cloned() else {
            info!(session_id = %session.id, "Question pool exhausted");
            return Ok(None);
        };

        let now = self.deps.clock.now();
        if let Some(session) = self.session.as_mut() {
            session.metadata.question_history.push(question.id.clone());
        }
        self.current = Some(PresentedQuestion {
            question: question.clone(),
            presented_at: now,
        });

        debug!(question_id = %question.id, topic = %question.topic, "Presented question");
        Ok(Some(question))
    }

    /// Grade the outstanding question and advance the state machine.
    pub async fn process_answer(
        &mut self,
        user_answer: &str,
        is_correct: bool,
    ) -> Result<AnswerOutcome> {
        let result = self.try_process_answer(user_answer, is_correct).await;
        if let Err(e) = &result {
            warn!(error = %e, "Answer processing failed");
            self.report_failure("Could not record answer", e);
        }
        result
    }

    async fn try_process_answer(
        &mut self,
        user_answer: &str,
        is_correct: bool,
    ) -> Result<AnswerOutcome> {
        let session = self.active_session()?;
        let presented = self
            .current
            .as_ref()
            .ok_or(EngineError::NoQuestionPresented)?;

        let now = self.deps.clock.now();
        let time_spent_seconds = (now - presented.presented_at).num_milliseconds() as f64 / 1000.0;
        let question = &presented.question;

        let mut next = session.clone();
        let transition = apply_answer(&mut next, &question.topic, is_correct, time_spent_seconds);

        let attempt = QuestionAttemptLog {
            id: RecordId::from(self.deps.ids.next_uuid()),
            session_id: next.id,
            question_id: question.id.clone(),
            difficulty_presented: question.difficulty,
            topic: question.topic.clone(),
            user_answer: user_answer.to_string(),
            correct: is_correct,
            time_spent_seconds,
            adaptive_reason: transition,
            answered_at: now,
        };

        self.deps.repository.record_answer(&next, attempt).await?;

        let outcome = AnswerOutcome {
            question_id: question.id.clone(),
            topic: question.topic.clone(),
            correct: is_correct,
            time_spent_seconds,
            transition,
            difficulty: next.current_difficulty,
            performance_score: next.performance_score,
            correct_streak: next.correct_streak,
            incorrect_streak: next.incorrect_streak,
        };

        self.session = Some(next);
        self.current = None;

        debug!(
            question_id = %outcome.question_id,
            correct = is_correct,
            score = outcome.performance_score,
            difficulty = %outcome.difficulty,
            "Answer processed"
        );
        self.announce(&transition);
        Ok(outcome)
    }

    fn announce(&self, transition: &Transition) {
        if !transition.changed_level() {
            return;
        }
        let feedback = match transition {
            Transition::Advance { to, .. } => Feedback::new(
                "Level up!",
                format!("Great work! Moving up to {to} questions."),
                FeedbackSeverity::Success,
            ),
            Transition::Regress { to, .. } => Feedback::new(
                "Adjusting difficulty",
                format!("Let's review with {to} questions to strengthen the foundations."),
                FeedbackSeverity::Info,
            ),
            Transition::Hold => return,
        };
        info!(?transition, "Difficulty changed");
        self.deps.feedback.notify(feedback);
    }

    /// Mark the quiz completed and report the summary.
    ///
    /// Completing an already completed quiz returns its summary unchanged.
    pub async fn complete(&mut self) -> Result<QuizSummary> {
        let session = self
            .session
            .as_ref()
            .ok_or(EngineError::SessionNotInitialized)?;
        if !session.is_active() {
            return Ok(QuizSummary::from(session));
        }

        let now = self.deps.clock.now();
        let mut next = session.clone();
        next.status = QuizStatus::Completed;
        next.metadata.completed_at = Some(now);
        next.metadata.total_time_seconds = Some((now - next.metadata.started_at).num_seconds());

        if let Err(e) = self.deps.repository.update_session(&next).await {
            warn!(session_id = %next.id, error = %e, "Quiz completion failed");
            self.report_failure("Could not complete quiz", &e);
            return Err(e);
        }

        let summary = QuizSummary::from(&next);
        self.session = Some(next);
        self.current = None;

        info!(
            session_id = %summary.session_id,
            answered = summary.total_questions_answered,
            score = summary.performance_score,
            "Quiz completed"
        );
        self.deps.feedback.notify(Feedback::new(
            "Quiz complete",
            format!(
                "You answered {} questions with a score of {:.0}%.",
                summary.total_questions_answered,
                summary.performance_score * 100.0
            ),
            FeedbackSeverity::Success,
        ));
        Ok(summary)
    }
}

impl std::fmt::Debug for AdaptiveSessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveSessionEngine")
            .field("learner_id", &self.context.learner_id)
            .field("module_id", &self.context.module_id)
            .field("session", &self.session.as_ref().map(|s| s.id))
            .field(
                "current_question",
                &self.current.as_ref().map(|p| &p.question.id),
            )
            .finish()
    }
}
