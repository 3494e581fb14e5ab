//! Remediation suggestions for detected struggle patterns.
//!
//! ```text
//! StruggleDetector.observe()
//!     │
//!     ├─ every observation ──► log_observation()  (LogRecord::Struggle)
//!     │
//!     └─ pattern detected ──► dispatch()
//!             │
//!             ├─ generate_remediation(pattern)
//!             ├─ append to active list
//!             └─ LogRecord::Recommendation per suggestion
//! ```
//!
//! Suggestions stay active until the learner accepts or dismisses them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, IdGenerator};
use crate::error::{EngineError, Result};
use crate::repository::Repository;
use crate::struggle::Observation;
use crate::types::{
    LearnerId, LogRecord, ModuleId, RecordId, RemediationAction, RemediationEvent,
    RemediationRecord, RemediationSuggestion, RemediationType, SceneId, SessionId,
    StruggleObservation, StrugglePattern, StruggleType, SuggestionId, SuggestionMetadata,
    SuggestionStatus,
};

const UNKNOWN_TOPIC: &str = "this topic";

struct Template {
    kind: RemediationType,
    title: String,
    content: String,
    action_label: &'static str,
}

fn templates(struggle_type: StruggleType, topic: &str) -> Vec<Template> {
    match struggle_type {
        StruggleType::QuizFailure => vec![
            Template {
                kind: RemediationType::Explanation,
                title: format!("Let's revisit {topic}"),
                content: format!(
                    "A few answers on {topic} didn't land. Here is a short explanation of the key idea."
                ),
                action_label: "Show explanation",
            },
            Template {
                kind: RemediationType::Microlearning,
                title: format!("Quick refresher: {topic}"),
                content: format!("Take a two-minute refresher on {topic} before trying again."),
                action_label: "Start refresher",
            },
        ],
        StruggleType::ExcessivePauses => vec![Template {
            kind: RemediationType::Explanation,
            title: format!("Need a hand with {topic}?"),
            content: format!("You've paused a few times. Here is a simpler take on {topic}."),
            action_label: "Explain it",
        }],
        StruggleType::VideoSkipping => vec![Template {
            kind: RemediationType::Reminder,
            title: "You skipped ahead".to_string(),
            content: format!("The part you skipped covers {topic}. It comes up in the quiz."),
            action_label: "Jump back",
        }],
        StruggleType::HelpRequests => vec![Template {
            kind: RemediationType::PeerSupport,
            title: format!("Others found {topic} tricky too"),
            content: format!("See how other learners worked through {topic}."),
            action_label: "Ask a peer",
        }],
        StruggleType::CoachActivation => vec![Template {
            kind: RemediationType::Example,
            title: format!("Worked example: {topic}"),
            content: format!("Walk through a real-world example of {topic} step by step."),
            action_label: "See example",
        }],
    }
}

/// Build suggestions for a pattern from the template for its struggle type.
pub fn generate_remediation(
    pattern: &StrugglePattern,
    ids: &dyn IdGenerator,
    now: DateTime<Utc>,
) -> Vec<RemediationSuggestion> {
    let topic = pattern.topic.as_deref().unwrap_or(UNKNOWN_TOPIC);
    templates(pattern.struggle_type, topic)
        .into_iter()
        .map(|t| RemediationSuggestion {
            id: SuggestionId::from(ids.next_uuid()),
            suggestion_type: t.kind,
            title: t.title,
            content: t.content,
            action_label: t.action_label.to_string(),
            metadata: SuggestionMetadata {
                struggle_type: pattern.struggle_type,
                severity: pattern.severity,
                topic: pattern.topic.clone(),
                created_at: now,
            },
            status: SuggestionStatus::Active,
        })
        .collect()
}

/// Where a suggestion was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct RemediationContext {
    pub session_id: SessionId,
    pub learner_id: LearnerId,
    pub module_id: ModuleId,
    pub scene_id: Option<SceneId>,
}

/// Owns the active suggestion list for one learner session.
pub struct RemediationDispatcher {
    context: RemediationContext,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    active: Vec<RemediationSuggestion>,
}

impl RemediationDispatcher {
    pub fn new(
        context: RemediationContext,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            context,
            repository,
            clock,
            ids,
            active: Vec::new(),
        }
    }

    pub fn set_scene(&mut self, scene_id: Option<SceneId>) {
        self.context.scene_id = scene_id;
    }

    /// Suggestions not yet accepted or dismissed, oldest first.
    pub fn active(&self) -> &[RemediationSuggestion] {
        &self.active
    }

    /// Persist one detector observation as a behavior-tracking record.
    pub async fn log_observation(&self, observation: &Observation) -> Result<()> {
        let record = StruggleObservation {
            id: RecordId::from(self.ids.next_uuid()),
            session_id: self.context.session_id.clone(),
            learner_id: self.context.learner_id.clone(),
            scene_id: self.context.scene_id.clone(),
            struggle_type: observation.struggle_type,
            topic: observation.topic.clone(),
            value: observation.value,
            triggered: observation.pattern.is_some(),
            observed_at: self.clock.now(),
        };
        self.repository
            .insert_log(LogRecord::Struggle(record))
            .await
    }

    /// Generate suggestions for a detected pattern and make them active.
    ///
    /// Suggestions are active even if persisting their recommendation record
    /// fails; the failure is logged.
    pub async fn dispatch(&mut self, pattern: &StrugglePattern) -> Vec<RemediationSuggestion> {
        let suggestions = generate_remediation(pattern, self.ids.as_ref(), self.clock.now());
        self.active.extend(suggestions.iter().cloned());

        for suggestion in &suggestions {
            let record = RemediationRecord {
                id: RecordId::from(self.ids.next_uuid()),
                session_id: self.context.session_id.clone(),
                learner_id: self.context.learner_id.clone(),
                module_id: self.context.module_id.clone(),
                scene_id: self.context.scene_id.clone(),
                pattern: pattern.clone(),
                suggestion: suggestion.clone(),
            };
            if let Err(e) = self
                .repository
                .insert_log(LogRecord::Recommendation(record))
                .await
            {
                warn!(
                    suggestion_id = %suggestion.id,
                    error = %e,
                    "Failed to persist remediation recommendation"
                );
            }
        }

        info!(
            session_id = %self.context.session_id,
            struggle_type = ?pattern.struggle_type,
            severity = ?pattern.severity,
            count = suggestions.len(),
            "Remediation suggested"
        );
        suggestions
    }

    /// Accept an active suggestion.
    pub async fn accept(&mut self, id: SuggestionId) -> Result<RemediationSuggestion> {
        self.resolve(id, RemediationAction::Accepted).await
    }

    /// Dismiss an active suggestion.
    pub async fn dismiss(&mut self, id: SuggestionId) -> Result<RemediationSuggestion> {
        self.resolve(id, RemediationAction::Dismissed).await
    }

    async fn resolve(
        &mut self,
        id: SuggestionId,
        action: RemediationAction,
    ) -> Result<RemediationSuggestion> {
        let index = self
            .active
            .iter()
            .position(|s| s.id == id)
            .ok_or(EngineError::SuggestionNotFound(id))?;

        let event = RemediationEvent {
            id: RecordId::from(self.ids.next_uuid()),
            session_id: self.context.session_id.clone(),
            suggestion_id: id,
            action,
            at: self.clock.now(),
        };
        self.repository
            .insert_log(LogRecord::Remediation(event))
            .await?;

        let mut suggestion = self.active.remove(index);
        suggestion.status = match action {
            RemediationAction::Accepted => SuggestionStatus::Accepted,
            RemediationAction::Dismissed => SuggestionStatus::Dismissed,
        };
        debug!(suggestion_id = %id, ?action, "Suggestion resolved");
        Ok(suggestion)
    }
}

impl std::fmt::Debug for RemediationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationDispatcher")
            .field("context", &self.context)
            .field("active", &self.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SequentialIds};
    use crate::repository::InMemoryRepository;
    use crate::types::Severity;

    fn pattern(struggle_type: StruggleType, topic: Option<&str>) -> StrugglePattern {
        StrugglePattern {
            struggle_type,
            severity: Severity::Medium,
            topic: topic.map(str::to_string),
            observed: 3.0,
            detected_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn dispatcher() -> (RemediationDispatcher, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        let dispatcher = RemediationDispatcher::new(
            RemediationContext {
                session_id: SessionId::from("session-1"),
                learner_id: LearnerId::from("learner-1"),
                module_id: ModuleId::from("module-1"),
                scene_id: Some(SceneId::from("scene-1")),
            },
            repo.clone(),
            Arc::new(ManualClock::default()),
            Arc::new(SequentialIds::new()),
        );
        (dispatcher, repo)
    }

    #[test]
    fn templates_match_struggle_type() {
        let ids = SequentialIds::new();
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let kinds = |t| {
            generate_remediation(&pattern(t, Some("x")), &ids, now)
                .into_iter()
                .map(|s| s.suggestion_type)
                .collect::<Vec<_>>()
        };

        assert_eq!(
            kinds(StruggleType::QuizFailure),
            vec![RemediationType::Explanation, RemediationType::Microlearning]
        );
        assert_eq!(
            kinds(StruggleType::ExcessivePauses),
            vec![RemediationType::Explanation]
        );
        assert_eq!(
            kinds(StruggleType::VideoSkipping),
            vec![RemediationType::Reminder]
        );
        assert_eq!(
            kinds(StruggleType::HelpRequests),
            vec![RemediationType::PeerSupport]
        );
        assert_eq!(
            kinds(StruggleType::CoachActivation),
            vec![RemediationType::Example]
        );
    }

    #[test]
    fn topic_is_interpolated_with_placeholder_fallback() {
        let ids = SequentialIds::new();
        let now = DateTime::<Utc>::UNIX_EPOCH;

        let named = generate_remediation(
            &pattern(StruggleType::CoachActivation, Some("fall protection")),
            &ids,
            now,
        );
        assert!(named[0].title.contains("fall protection"));

        let unnamed = generate_remediation(&pattern(StruggleType::CoachActivation, None), &ids, now);
        assert!(unnamed[0].content.contains("this topic"));
        assert_eq!(unnamed[0].metadata.topic, None);
    }

    #[tokio::test]
    async fn dispatch_activates_and_persists() {
        let (mut dispatcher, repo) = dispatcher();

        let suggestions = dispatcher
            .dispatch(&pattern(StruggleType::QuizFailure, Some("lockout")))
            .await;

        assert_eq!(suggestions.len(), 2);
        assert_eq!(dispatcher.active().len(), 2);
        let logs = repo.logs().await;
        assert_eq!(logs.len(), 2);
        let LogRecord::Recommendation(record) = &logs[0] else {
            panic!("expected recommendation record");
        };
        assert_eq!(record.scene_id, Some(SceneId::from("scene-1")));
        assert_eq!(record.pattern.struggle_type, StruggleType::QuizFailure);
    }

    #[tokio::test]
    async fn dispatch_survives_persistence_failure() {
        let (mut dispatcher, repo) = dispatcher();
        repo.set_unavailable(true);

        let suggestions = dispatcher
            .dispatch(&pattern(StruggleType::VideoSkipping, None))
            .await;

        assert_eq!(suggestions.len(), 1);
        assert_eq!(dispatcher.active().len(), 1);
    }

    #[tokio::test]
    async fn accept_and_dismiss_remove_and_log() {
        let (mut dispatcher, repo) = dispatcher();
        let suggestions = dispatcher
            .dispatch(&pattern(StruggleType::QuizFailure, None))
            .await;

        let accepted = dispatcher.accept(suggestions[0].id).await.unwrap();
        assert_eq!(accepted.status, SuggestionStatus::Accepted);
        let dismissed = dispatcher.dismiss(suggestions[1].id).await.unwrap();
        assert_eq!(dismissed.status, SuggestionStatus::Dismissed);
        assert!(dispatcher.active().is_empty());

        let actions: Vec<_> = repo
            .logs()
            .await
            .into_iter()
            .filter_map(|r| match r {
                LogRecord::Remediation(e) => Some(e.action),
                _ => None,
            })
            .collect();
        assert_eq!(
            actions,
            vec![RemediationAction::Accepted, RemediationAction::Dismissed]
        );
    }

    #[tokio::test]
    async fn unknown_suggestion_is_rejected() {
        let (mut dispatcher, _repo) = dispatcher();
        let id = SuggestionId::from(uuid::Uuid::nil());

        let err = dispatcher.accept(id).await.unwrap_err();
        assert!(matches!(err, EngineError::SuggestionNotFound(_)));
    }

    #[tokio::test]
    async fn failed_resolution_keeps_suggestion_active() {
        let (mut dispatcher, repo) = dispatcher();
        let suggestions = dispatcher
            .dispatch(&pattern(StruggleType::HelpRequests, None))
            .await;
        repo.set_unavailable(true);

        assert!(dispatcher.dismiss(suggestions[0].id).await.is_err());
        assert_eq!(dispatcher.active().len(), 1);
    }

    #[tokio::test]
    async fn observation_records_trigger_flag() {
        let (dispatcher, repo) = dispatcher();
        let observation = Observation {
            struggle_type: StruggleType::ExcessivePauses,
            topic: None,
            value: 2.0,
            pattern: None,
        };

        dispatcher.log_observation(&observation).await.unwrap();

        let logs = repo.logs().await;
        let LogRecord::Struggle(row) = &logs[0] else {
            panic!("expected struggle record");
        };
        assert!(!row.triggered);
        assert_eq!(row.value, 2.0);
    }
}
