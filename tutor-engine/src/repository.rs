//! Persistence abstraction.
//!
//! The engine only needs per-row atomic writes keyed by the entity shapes in
//! [`crate::types`]. Rows shared between learner sessions (heatmap buckets and
//! module rollups) are merged inside the store, never read and written back by
//! the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::heatmap::{DropoutSample, fold_dropout, merge_point};
use crate::types::{
    AdaptiveQuizSession, AssignmentId, BehaviorEvent, BehaviorEventType, EngagementHeatmapPoint,
    HeatmapKey, LearnerId, LogRecord, ModuleAnalytics, ModuleId, QuestionAttemptLog,
    QuizSessionId,
};

/// Store for telemetry, aggregates, quiz sessions and append-only logs.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a batch of events. Either the whole batch lands or none of it.
    async fn insert_events(&self, events: &[BehaviorEvent]) -> Result<()>;

    /// Fold one observation into its heatmap bucket, creating the bucket on
    /// first use. Must be atomic per bucket: concurrent sessions share rows.
    async fn merge_heatmap_point(
        &self,
        key: HeatmapKey,
        engagement_score: f64,
        event_type: BehaviorEventType,
        now: DateTime<Utc>,
    ) -> Result<EngagementHeatmapPoint>;

    /// Fold one dropout into the module rollup. Atomic per module.
    async fn record_module_dropout(
        &self,
        module_id: &ModuleId,
        sample: DropoutSample,
        now: DateTime<Utc>,
    ) -> Result<ModuleAnalytics>;

    /// Find the active quiz session for a learner/module/assignment triple.
    async fn find_active_session(
        &self,
        learner_id: &LearnerId,
        module_id: &ModuleId,
        assignment_id: &AssignmentId,
    ) -> Result<Option<AdaptiveQuizSession>>;

    async fn insert_session(&self, session: &AdaptiveQuizSession) -> Result<()>;

    async fn update_session(&self, session: &AdaptiveQuizSession) -> Result<()>;

    /// Replace the session row and append its attempt log together. When this
    /// fails neither write is visible.
    async fn record_answer(
        &self,
        session: &AdaptiveQuizSession,
        attempt: QuestionAttemptLog,
    ) -> Result<()>;

    /// Append a log record.
    async fn insert_log(&self, record: LogRecord) -> Result<()>;
}

#[derive(Debug, Default)]
struct Tables {
    events: Vec<BehaviorEvent>,
    heatmap: HashMap<HeatmapKey, EngagementHeatmapPoint>,
    analytics: HashMap<ModuleId, ModuleAnalytics>,
    sessions: HashMap<QuizSessionId, AdaptiveQuizSession>,
    logs: Vec<LogRecord>,
}

impl Tables {
    fn replace_session(&mut self, session: &AdaptiveQuizSession) -> Result<()> {
        match self.sessions.get_mut(&session.id) {
            Some(row) => {
                *row = session.clone();
                Ok(())
            }
            None => Err(EngineError::Repository(format!(
                "session {} not found",
                session.id
            ))),
        }
    }
}

/// In-memory implementation for tests and local simulation.
///
/// `set_unavailable(true)` makes every call fail and `reject_session_writes`
/// fails only session updates, which is how tests exercise retry and rollback
/// paths.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    reject_session_writes: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail session updates while everything else keeps working.
    pub fn reject_session_writes(&self, reject: bool) {
        self.reject_session_writes.store(reject, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(EngineError::Repository("repository unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn check_session_writable(&self) -> Result<()> {
        self.check_available()?;
        if self.reject_session_writes.load(Ordering::SeqCst) {
            Err(EngineError::Repository("session write rejected".into()))
        } else {
            Ok(())
        }
    }

    /// All persisted events in insertion order (for testing)
    pub async fn events(&self) -> Vec<BehaviorEvent> {
        self.tables.read().await.events.clone()
    }

    /// All heatmap buckets (for testing)
    pub async fn heatmap_points(&self) -> Vec<EngagementHeatmapPoint> {
        let mut points: Vec<_> = self.tables.read().await.heatmap.values().cloned().collect();
        points.sort_by(|a, b| a.key.cmp(&b.key));
        points
    }

    /// A module rollup (for testing)
    pub async fn module_analytics(&self, module_id: &ModuleId) -> Option<ModuleAnalytics> {
        self.tables.read().await.analytics.get(module_id).cloned()
    }

    /// A quiz session by id (for testing)
    pub async fn session(&self, id: &QuizSessionId) -> Option<AdaptiveQuizSession> {
        self.tables.read().await.sessions.get(id).cloned()
    }

    /// All log records in insertion order (for testing)
    pub async fn logs(&self) -> Vec<LogRecord> {
        self.tables.read().await.logs.clone()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_events(&self, events: &[BehaviorEvent]) -> Result<()> {
        self.check_available()?;
        self.tables.write().await.events.extend_from_slice(events);
        Ok(())
    }

    async fn merge_heatmap_point(
        &self,
        key: HeatmapKey,
        engagement_score: f64,
        event_type: BehaviorEventType,
        now: DateTime<Utc>,
    ) -> Result<EngagementHeatmapPoint> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let existing = tables.heatmap.remove(&key);
        let point = merge_point(existing, key, engagement_score, event_type, now);
        tables.heatmap.insert(point.key.clone(), point.clone());
        Ok(point)
    }

    async fn record_module_dropout(
        &self,
        module_id: &ModuleId,
        sample: DropoutSample,
        now: DateTime<Utc>,
    ) -> Result<ModuleAnalytics> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let existing = tables.analytics.remove(module_id);
        let analytics = fold_dropout(existing, module_id, sample, now);
        tables
            .analytics
            .insert(module_id.clone(), analytics.clone());
        Ok(analytics)
    }

    async fn find_active_session(
        &self,
        learner_id: &LearnerId,
        module_id: &ModuleId,
        assignment_id: &AssignmentId,
    ) -> Result<Option<AdaptiveQuizSession>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .find(|s| {
                s.is_active()
                    && &s.learner_id == learner_id
                    && &s.module_id == module_id
                    && &s.assignment_id == assignment_id
            })
            .cloned())
    }

    async fn insert_session(&self, session: &AdaptiveQuizSession) -> Result<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(EngineError::Repository(format!(
                "session {} already exists",
                session.id
            )));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &AdaptiveQuizSession) -> Result<()> {
        self.check_session_writable()?;
        self.tables.write().await.replace_session(session)
    }

    async fn record_answer(
        &self,
        session: &AdaptiveQuizSession,
        attempt: QuestionAttemptLog,
    ) -> Result<()> {
        self.check_session_writable()?;
        let mut tables = self.tables.write().await;
        tables.replace_session(session)?;
        tables.logs.push(LogRecord::Attempt(attempt));
        Ok(())
    }

    async fn insert_log(&self, record: LogRecord) -> Result<()> {
        self.check_available()?;
        self.tables.write().await.logs.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SceneId;

    fn key() -> HeatmapKey {
        HeatmapKey {
            module_id: ModuleId::from("m1"),
            scene_id: SceneId::from("s1"),
            position_percent: 40,
        }
    }

    #[tokio::test]
    async fn heatmap_merge_averages_into_one_bucket() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        repo.merge_heatmap_point(key(), 1.0, BehaviorEventType::Pause, now)
            .await
            .unwrap();
        let point = repo
            .merge_heatmap_point(key(), 3.0, BehaviorEventType::Pause, now)
            .await
            .unwrap();

        assert_eq!(point.engagement_score, 2.0);
        assert_eq!(point.pause_count, 2);
        assert_eq!(repo.heatmap_points().await, vec![point]);
    }

    #[tokio::test]
    async fn unavailable_repository_rejects_calls() {
        let repo = InMemoryRepository::new();
        repo.set_unavailable(true);
        let err = repo.insert_events(&[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Repository(_)));

        repo.set_unavailable(false);
        repo.insert_events(&[]).await.unwrap();
    }
}
