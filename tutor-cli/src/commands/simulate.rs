use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, ensure};
use chrono::Utc;
use clap::Args;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;
use tutor_engine::{
    BehaviorEventType, Collaborators, Difficulty, InMemoryQuestionBank, InMemoryRepository,
    LearnerContext, LearnerSession, ManualClock, NextQuestion, Question, QuestionId, QuestionType,
    QuizSummary, RemediationSuggestion, SequentialIds, SessionSnapshot, TrackRequest,
    TracingFeedback, VideoEventExtra,
};

use super::config::load_config;

const COMPANY: &str = "sim-company";
const TOPICS: &[&str] = &["load limits", "mast tilt", "pedestrian zones", "battery care"];

/// Seconds of video between simulated observations.
const STEP_SECONDS: f64 = 5.0;

#[derive(Args)]
pub struct SimulateArgs {
    /// Configuration file to load
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seed for the simulated learner
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Probability that the learner answers a question correctly
    #[arg(long, default_value_t = 0.7)]
    pub accuracy: f64,

    /// Questions generated per difficulty level
    #[arg(long, default_value_t = 6)]
    pub questions_per_level: usize,

    /// Length of the training video in seconds
    #[arg(long, default_value_t = 300.0)]
    pub video_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub session: SessionSnapshot,
    pub quiz: QuizSummary,
    pub suggestions_offered: usize,
    pub events_persisted: usize,
    pub heatmap_buckets: usize,
    pub log_records: usize,
}

pub async fn run(args: SimulateArgs) -> Result<()> {
    let report = simulate(args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn question_bank(per_level: usize) -> Vec<Question> {
    [Difficulty::Basic, Difficulty::Intermediate, Difficulty::Advanced]
        .into_iter()
        .flat_map(|difficulty| {
            (0..per_level).map(move |i| {
                let topic = TOPICS[i % TOPICS.len()];
                Question {
                    id: QuestionId::new(format!("{difficulty}-{i}")),
                    text: format!("{difficulty} question about {topic}"),
                    question_type: QuestionType::MultipleChoice,
                    options: vec!["a".into(), "b".into(), "c".into()],
                    correct_answer: "a".into(),
                    difficulty,
                    topic: topic.to_string(),
                    hint: None,
                    explanation: None,
                }
            })
        })
        .collect()
}

/// Drives one simulated learner through a video and an adaptive quiz.
struct Learner {
    session: LearnerSession,
    clock: Arc<ManualClock>,
    rng: StdRng,
    offered: usize,
}

impl Learner {
    async fn watch_video(&mut self, duration: f64) -> Result<()> {
        let mut position = 0.0;
        while position < duration {
            position = (position + STEP_SECONDS).min(duration);
            self.clock.advance_secs(STEP_SECONDS as i64);
            let index = (position / duration * TOPICS.len() as f64) as usize;
            let topic = TOPICS[index % TOPICS.len()];

            let roll: f64 = self.rng.gen_range(0.0..1.0);
            let (event_type, seek_from_seconds) = if roll < 0.01 {
                let request = TrackRequest::Dropout {
                    current_time_seconds: position,
                    duration_seconds: duration,
                    reason: "simulated exit".into(),
                };
                let outcome = self.session.track(request).await?;
                self.resolve(outcome.suggestions).await?;
                info!(position, "Learner dropped out of the video");
                return Ok(());
            } else if roll < 0.12 {
                (BehaviorEventType::Pause, None)
            } else if roll < 0.16 {
                let from = position;
                position = (position + self.rng.gen_range(20.0..150.0)).min(duration);
                (BehaviorEventType::Seek, Some(from))
            } else {
                (BehaviorEventType::Play, None)
            };

            let request = TrackRequest::Video {
                event_type,
                current_time_seconds: position,
                duration_seconds: duration,
                extra: VideoEventExtra {
                    seek_from_seconds,
                    topic: Some(topic.to_string()),
                },
            };
            let outcome = self.session.track(request).await?;
            self.resolve(outcome.suggestions).await?;
        }

        let request = TrackRequest::video(BehaviorEventType::Complete, duration, duration);
        self.session.track(request).await?;
        Ok(())
    }

    async fn take_quiz(&mut self, accuracy: f64) -> Result<QuizSummary> {
        self.session.initialize_session().await?;
        loop {
            let question = match self.session.get_next_question().await? {
                NextQuestion::Question(question) => question,
                NextQuestion::Completed(summary) => return Ok(summary),
            };

            self.clock.advance_secs(self.rng.gen_range(5..45));
            let correct = self.rng.gen_bool(accuracy);
            let answer = if correct { "a" } else { "b" };
            let result = self.session.process_answer(answer, correct).await?;
            self.resolve(result.suggestions).await?;

            if !correct && self.rng.gen_bool(0.2) {
                let topic = Some(question.topic.clone());
                let suggestions = self.session.record_coach_activation(topic).await;
                self.resolve(suggestions).await?;
            }
        }
    }

    /// Accepts about half of what is offered and dismisses the rest.
    async fn resolve(&mut self, suggestions: Vec<RemediationSuggestion>) -> Result<()> {
        for suggestion in suggestions {
            self.offered += 1;
            if self.rng.gen_bool(0.5) {
                self.session.accept_suggestion(suggestion.id).await?;
            } else {
                self.session.dismiss_suggestion(suggestion.id).await?;
            }
        }
        Ok(())
    }
}

/// Run one simulated learner session end to end.
pub async fn simulate(args: SimulateArgs) -> Result<SimulationReport> {
    ensure!(
        (0.0..=1.0).contains(&args.accuracy),
        "accuracy must be between 0 and 1, got {}",
        args.accuracy
    );
    ensure!(args.video_seconds > 0.0, "video length must be positive");

    let config = load_config(args.config.as_deref())?;
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let bank =
        InMemoryQuestionBank::with_questions(COMPANY, question_bank(args.questions_per_level));
    let collaborators = Collaborators {
        repository: repo.clone(),
        questions: Arc::new(bank),
        feedback: Arc::new(TracingFeedback),
        clock: clock.clone(),
        ids: Arc::new(SequentialIds::new()),
    };
    let context = LearnerContext::new("sim-learner", COMPANY, "sim-module", "sim-assignment")
        .with_scene("scene-1");

    let mut learner = Learner {
        session: LearnerSession::start(config, context, collaborators),
        clock,
        rng: StdRng::seed_from_u64(args.seed),
        offered: 0,
    };
    info!(seed = args.seed, session_id = %learner.session.session_id(), "Starting simulation");

    learner.watch_video(args.video_seconds).await?;
    let quiz = learner.take_quiz(args.accuracy).await?;
    learner.session.shutdown().await;

    Ok(SimulationReport {
        seed: args.seed,
        session: learner.session.snapshot().await,
        quiz,
        suggestions_offered: learner.offered,
        events_persisted: repo.events().await.len(),
        heatmap_buckets: repo.heatmap_points().await.len(),
        log_records: repo.logs().await.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_engine::QuizStatus;

    fn args(seed: u64) -> SimulateArgs {
        SimulateArgs {
            config: None,
            seed,
            accuracy: 0.7,
            questions_per_level: 4,
            video_seconds: 300.0,
        }
    }

    #[tokio::test]
    async fn simulation_exhausts_the_bank() {
        let report = simulate(args(7)).await.unwrap();

        let quiz = report.quiz;
        assert_eq!(quiz.status, QuizStatus::Completed);
        assert_eq!(quiz.total_questions_answered, 12);
        assert!(report.events_persisted > 0);
        assert!(report.heatmap_buckets > 0);
        assert_eq!(report.session.telemetry.queued, 0);
        assert!(report.session.active_suggestions.is_empty());
    }

    #[tokio::test]
    async fn same_seed_gives_same_outcome() {
        let a = simulate(args(42)).await.unwrap();
        let b = simulate(args(42)).await.unwrap();

        assert_eq!(a.events_persisted, b.events_persisted);
        assert_eq!(a.suggestions_offered, b.suggestions_offered);
        assert_eq!(a.quiz.performance_score, b.quiz.performance_score);
    }

    #[tokio::test]
    async fn rejects_out_of_range_accuracy() {
        let err = simulate(SimulateArgs {
            accuracy: 1.5,
            ..args(1)
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("accuracy"));
    }
}
