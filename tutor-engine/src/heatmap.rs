//! Engagement heatmap aggregation.
//!
//! Video events are folded into per-position buckets keyed by
//! `(module, scene, percent)`. Updates are throttled per session and updates
//! inside the throttle window are dropped, not queued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::HeatmapConfig;
use crate::error::Result;
use crate::repository::Repository;
use crate::telemetry::completion_percentage;
use crate::types::{
    BehaviorEventType, EngagementHeatmapPoint, HeatmapKey, ModuleAnalytics, ModuleId, SceneId,
};

/// Outcome of a heatmap update request.
#[derive(Debug, Clone, PartialEq)]
pub enum HeatmapUpdate {
    /// The bucket was written.
    Applied(EngagementHeatmapPoint),
    /// Dropped because an update was applied less than `throttle_ms` ago.
    Throttled,
}

/// Normalize a playback position to an integer bucket in `0..=100`.
pub fn position_bucket(time_position_seconds: f64, duration_seconds: f64) -> u8 {
    completion_percentage(time_position_seconds, duration_seconds)
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Fold one observation into a bucket, creating it if needed.
pub fn merge_point(
    existing: Option<EngagementHeatmapPoint>,
    key: HeatmapKey,
    engagement_score: f64,
    event_type: BehaviorEventType,
    now: DateTime<Utc>,
) -> EngagementHeatmapPoint {
    let mut point = match existing {
        Some(mut point) => {
            point.engagement_score = (point.engagement_score + engagement_score) / 2.0;
            point
        }
        None => EngagementHeatmapPoint {
            key,
            engagement_score,
            dropout_count: 0,
            pause_count: 0,
            seek_count: 0,
            rewatch_count: 0,
            updated_at: now,
        },
    };

    match event_type {
        BehaviorEventType::Dropout => point.dropout_count += 1,
        BehaviorEventType::Pause => point.pause_count += 1,
        BehaviorEventType::Seek => point.seek_count += 1,
        BehaviorEventType::Rewind => point.rewatch_count += 1,
        _ => {}
    }
    point.updated_at = now;
    point
}

/// One dropout as seen by the module rollup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropoutSample {
    pub position_percent: u8,
    pub session_duration_seconds: f64,
    /// How many recent dropout positions the rollup retains.
    pub points_kept: usize,
}

/// Fold one dropout into a module rollup, creating it if needed.
pub fn fold_dropout(
    existing: Option<ModuleAnalytics>,
    module_id: &ModuleId,
    sample: DropoutSample,
    now: DateTime<Utc>,
) -> ModuleAnalytics {
    let mut analytics = match existing {
        Some(mut existing) => {
            existing.dropout_rate += 1;
            existing.average_completion_time_seconds =
                (existing.average_completion_time_seconds + sample.session_duration_seconds) / 2.0;
            existing.dropout_points.push(sample.position_percent);
            existing
        }
        None => ModuleAnalytics {
            module_id: module_id.clone(),
            average_completion_time_seconds: sample.session_duration_seconds,
            dropout_rate: 1,
            dropout_points: vec![sample.position_percent],
            updated_at: now,
        },
    };
    let excess = analytics
        .dropout_points
        .len()
        .saturating_sub(sample.points_kept);
    analytics.dropout_points.drain(..excess);
    analytics.updated_at = now;
    analytics
}

/// Maintains the engagement heatmap and module dropout rollup for one session.
pub struct EngagementAggregator {
    config: HeatmapConfig,
    module_id: ModuleId,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    last_applied: Option<DateTime<Utc>>,
}

impl EngagementAggregator {
    pub fn new(
        config: HeatmapConfig,
        module_id: ModuleId,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            module_id,
            repository,
            clock,
            last_applied: None,
        }
    }

    fn throttled(&self, now: DateTime<Utc>) -> bool {
        self.last_applied.is_some_and(|last| {
            (now - last).num_milliseconds() < self.config.throttle_ms as i64
        })
    }

    /// Fold a video observation into its bucket, subject to throttling.
    pub async fn update_heatmap(
        &mut self,
        scene_id: &SceneId,
        time_position_seconds: f64,
        duration_seconds: f64,
        engagement_score: f64,
        event_type: BehaviorEventType,
    ) -> Result<HeatmapUpdate> {
        let now = self.clock.now();
        if self.throttled(now) {
            trace!(scene_id = %scene_id, ?event_type, "Heatmap update throttled");
            return Ok(HeatmapUpdate::Throttled);
        }

        let key = HeatmapKey {
            module_id: self.module_id.clone(),
            scene_id: scene_id.clone(),
            position_percent: position_bucket(time_position_seconds, duration_seconds),
        };

        let point = self
            .repository
            .merge_heatmap_point(key, engagement_score, event_type, now)
            .await?;
        self.last_applied = Some(now);

        trace!(
            scene_id = %scene_id,
            position = point.key.position_percent,
            score = point.engagement_score,
            "Heatmap bucket updated"
        );
        Ok(HeatmapUpdate::Applied(point))
    }

    /// Update the module rollup for a dropout. Never throttled.
    pub async fn record_dropout(
        &self,
        position_percent: u8,
        session_duration_seconds: f64,
    ) -> Result<ModuleAnalytics> {
        let now = self.clock.now();
        let sample = DropoutSample {
            position_percent,
            session_duration_seconds,
            points_kept: self.config.dropout_points_kept,
        };
        let analytics = self
            .repository
            .record_module_dropout(&self.module_id, sample, now)
            .await?;
        debug!(
            module_id = %self.module_id,
            dropout_rate = analytics.dropout_rate,
            position = position_percent,
            "Module dropout rollup updated"
        );
        Ok(analytics)
    }
}

impl std::fmt::Debug for EngagementAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngagementAggregator")
            .field("module_id", &self.module_id)
            .field("throttle_ms", &self.config.throttle_ms)
            .field("last_applied", &self.last_applied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::InMemoryRepository;

    fn aggregator(
        throttle_ms: u64,
    ) -> (EngagementAggregator, Arc<InMemoryRepository>, Arc<ManualClock>) {
        let repo = Arc::new(InMemoryRepository::new());
        let clock = Arc::new(ManualClock::default());
        let agg = EngagementAggregator::new(
            HeatmapConfig {
                throttle_ms,
                ..Default::default()
            },
            ModuleId::from("module-1"),
            repo.clone(),
            clock.clone(),
        );
        (agg, repo, clock)
    }

    #[test]
    fn position_bucket_rounds_and_clamps() {
        assert_eq!(position_bucket(33.4, 100.0), 33);
        assert_eq!(position_bucket(33.6, 100.0), 34);
        assert_eq!(position_bucket(150.0, 100.0), 100);
        assert_eq!(position_bucket(-5.0, 100.0), 0);
        assert_eq!(position_bucket(10.0, 0.0), 0);
    }

    #[tokio::test]
    async fn new_bucket_starts_counter_at_one() {
        let (mut agg, repo, _clock) = aggregator(5000);
        let scene = SceneId::from("scene-1");

        let update = agg
            .update_heatmap(&scene, 50.0, 100.0, -1.0, BehaviorEventType::Pause)
            .await
            .unwrap();

        let HeatmapUpdate::Applied(point) = update else {
            panic!("expected applied update");
        };
        assert_eq!(point.key.position_percent, 50);
        assert_eq!(point.engagement_score, -1.0);
        assert_eq!(point.pause_count, 1);
        assert_eq!(point.seek_count + point.dropout_count + point.rewatch_count, 0);
        assert_eq!(repo.heatmap_points().await.len(), 1);
    }

    #[tokio::test]
    async fn updates_inside_window_are_dropped() {
        let (mut agg, repo, clock) = aggregator(5000);
        let scene = SceneId::from("scene-1");

        agg.update_heatmap(&scene, 10.0, 100.0, 1.0, BehaviorEventType::Play)
            .await
            .unwrap();
        clock.advance_millis(4999);
        let update = agg
            .update_heatmap(&scene, 10.0, 100.0, -2.0, BehaviorEventType::Rewind)
            .await
            .unwrap();
        assert_eq!(update, HeatmapUpdate::Throttled);

        clock.advance_millis(1);
        let update = agg
            .update_heatmap(&scene, 10.0, 100.0, -2.0, BehaviorEventType::Rewind)
            .await
            .unwrap();
        assert!(matches!(update, HeatmapUpdate::Applied(_)));

        let points = repo.heatmap_points().await;
        assert_eq!(points[0].rewatch_count, 1);
        assert_eq!(points[0].engagement_score, -0.5);
    }

    #[tokio::test]
    async fn bucket_score_stays_within_input_range() {
        let (mut agg, repo, _clock) = aggregator(0);
        let scene = SceneId::from("scene-1");
        let inputs = [1.0, -2.0, 10.0, -1.0, 0.0, 5.0, -5.0, 10.0];

        for score in inputs {
            agg.update_heatmap(&scene, 42.0, 100.0, score, BehaviorEventType::Seek)
                .await
                .unwrap();
            let point = &repo.heatmap_points().await[0];
            assert!(point.engagement_score >= -5.0 && point.engagement_score <= 10.0);
        }

        let point = &repo.heatmap_points().await[0];
        assert_eq!(point.seek_count, inputs.len() as u32);
    }

    #[tokio::test]
    async fn non_counter_events_increment_nothing() {
        let (mut agg, repo, _clock) = aggregator(0);
        let scene = SceneId::from("scene-1");

        agg.update_heatmap(&scene, 99.0, 100.0, 10.0, BehaviorEventType::Complete)
            .await
            .unwrap();

        let point = &repo.heatmap_points().await[0];
        assert_eq!(
            point.pause_count + point.seek_count + point.dropout_count + point.rewatch_count,
            0
        );
    }

    #[tokio::test]
    async fn dropout_rollup_increments_and_keeps_recent_points() {
        let (agg, _repo, _clock) = aggregator(5000);

        let first = agg.record_dropout(10, 60.0).await.unwrap();
        assert_eq!(first.dropout_rate, 1);
        assert_eq!(first.average_completion_time_seconds, 60.0);

        let second = agg.record_dropout(20, 120.0).await.unwrap();
        assert_eq!(second.dropout_rate, 2);
        assert_eq!(second.average_completion_time_seconds, 90.0);

        let mut last = second;
        for i in 0..12u8 {
            last = agg.record_dropout(30 + i, 90.0).await.unwrap();
        }
        assert_eq!(last.dropout_rate, 14);
        assert_eq!(last.dropout_points.len(), 10);
        assert_eq!(last.dropout_points.first(), Some(&32));
        assert_eq!(last.dropout_points.last(), Some(&41));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_share_buckets_without_lost_updates() {
        let repo = Arc::new(InMemoryRepository::new());
        let clock = Arc::new(ManualClock::default());
        let module = ModuleId::from("module-1");
        let learners: u32 = 16;

        let tasks: Vec<_> = (0..learners)
            .map(|_| {
                let mut agg = EngagementAggregator::new(
                    HeatmapConfig::default(),
                    module.clone(),
                    repo.clone(),
                    clock.clone(),
                );
                tokio::spawn(async move {
                    let scene = SceneId::from("scene-1");
                    agg.update_heatmap(&scene, 50.0, 100.0, -1.0, BehaviorEventType::Pause)
                        .await
                        .unwrap();
                    agg.record_dropout(50, 60.0).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let points = repo.heatmap_points().await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].pause_count, learners);
        let rollup = repo.module_analytics(&module).await.unwrap();
        assert_eq!(rollup.dropout_rate, u64::from(learners));
        assert_eq!(rollup.dropout_points.len(), 10);
    }

    #[tokio::test]
    async fn joined_sessions_both_count() {
        let (mut a, repo, clock) = aggregator(5000);
        let mut b = EngagementAggregator::new(
            HeatmapConfig::default(),
            ModuleId::from("module-1"),
            repo.clone(),
            clock,
        );
        let scene = SceneId::from("scene-1");

        let (ra, rb) = tokio::join!(
            a.update_heatmap(&scene, 50.0, 100.0, -1.0, BehaviorEventType::Pause),
            b.update_heatmap(&scene, 50.0, 100.0, -1.0, BehaviorEventType::Pause),
        );
        ra.unwrap();
        rb.unwrap();
        let (da, db) = tokio::join!(a.record_dropout(50, 60.0), b.record_dropout(70, 60.0));
        da.unwrap();
        db.unwrap();

        assert_eq!(repo.heatmap_points().await[0].pause_count, 2);
        let rollup = repo.module_analytics(&ModuleId::from("module-1")).await.unwrap();
        assert_eq!(rollup.dropout_rate, 2);
        assert_eq!(rollup.dropout_points.len(), 2);
    }
}
