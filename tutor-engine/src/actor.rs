//! Single-writer task wrapper for a learner session.
//!
//! `SessionActor::spawn` moves a [`LearnerSession`] into its own tokio task.
//! Every [`SessionHandle`] call becomes a command on an mpsc channel and gets
//! its reply over a oneshot, so operations on one session never interleave.
//! The task exits on `shutdown` or when the last handle is dropped; in both
//! cases the session is shut down first.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::adaptive::QuizSummary;
use crate::error::{EngineError, Result};
use crate::session::{
    AnswerResult, LearnerSession, NextQuestion, SessionSnapshot, TrackOutcome, TrackRequest,
};
use crate::telemetry::FlushOutcome;
use crate::types::{
    AdaptiveQuizSession, RemediationAction, RemediationSuggestion, SceneId, SuggestionId,
};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug, Clone, Copy)]
enum Assist {
    HelpRequest,
    CoachActivation,
}

/// Commands accepted by the session task.
#[derive(Debug)]
enum Command {
    Initialize(Reply<Result<AdaptiveQuizSession>>),
    NextQuestion(Reply<Result<NextQuestion>>),
    Answer {
        answer: String,
        correct: bool,
        reply: Reply<Result<AnswerResult>>,
    },
    Complete(Reply<Result<QuizSummary>>),
    Track(TrackRequest, Reply<Result<TrackOutcome>>),
    SetScene(Option<SceneId>, Reply<()>),
    Assist {
        kind: Assist,
        topic: Option<String>,
        reply: Reply<Vec<RemediationSuggestion>>,
    },
    Resolve {
        id: SuggestionId,
        action: RemediationAction,
        reply: Reply<Result<RemediationSuggestion>>,
    },
    Snapshot(Reply<SessionSnapshot>),
    Shutdown(Reply<FlushOutcome>),
}

/// Owns a `LearnerSession` inside a spawned task.
pub struct SessionActor {
    session: LearnerSession,
    rx: mpsc::Receiver<Command>,
}

impl SessionActor {
    /// Spawn the session task and return a handle to it.
    pub fn spawn(session: LearnerSession) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = Self { session, rx };
        let task = tokio::spawn(actor.run());
        (SessionHandle { tx }, task)
    }

    async fn run(mut self) {
        debug!(session_id = %self.session.session_id(), "Session actor started");

        while let Some(command) = self.rx.recv().await {
            trace!(?command, "Session command");
            let session = &mut self.session;

            // Send failures mean the caller stopped waiting; nothing to do.
            match command {
                Command::Initialize(reply) => {
                    let _ = reply.send(session.initialize_session().await);
                }
                Command::NextQuestion(reply) => {
                    let _ = reply.send(session.get_next_question().await);
                }
                Command::Answer {
                    answer,
                    correct,
                    reply,
                } => {
                    let _ = reply.send(session.process_answer(&answer, correct).await);
                }
                Command::Complete(reply) => {
                    let _ = reply.send(session.complete_quiz().await);
                }
                Command::Track(request, reply) => {
                    let _ = reply.send(session.track(request).await);
                }
                Command::SetScene(scene_id, reply) => {
                    session.set_scene(scene_id).await;
                    let _ = reply.send(());
                }
                Command::Assist { kind, topic, reply } => {
                    let suggestions = match kind {
                        Assist::HelpRequest => session.record_help_request(topic).await,
                        Assist::CoachActivation => session.record_coach_activation(topic).await,
                    };
                    let _ = reply.send(suggestions);
                }
                Command::Resolve { id, action, reply } => {
                    let result = match action {
                        RemediationAction::Accepted => session.accept_suggestion(id).await,
                        RemediationAction::Dismissed => session.dismiss_suggestion(id).await,
                    };
                    let _ = reply.send(result);
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(session.snapshot().await);
                }
                Command::Shutdown(reply) => {
                    let _ = reply.send(session.shutdown().await);
                    debug!(session_id = %session.session_id(), "Session actor received shutdown");
                    return;
                }
            }
        }

        // Every handle dropped
        self.session.shutdown().await;
        debug!(session_id = %self.session.session_id(), "Session actor stopped");
    }
}

/// Cloneable handle to a running [`SessionActor`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| EngineError::ActorStopped)?;
        rx.await.map_err(|_| EngineError::ActorStopped)
    }

    pub async fn initialize_session(&self) -> Result<AdaptiveQuizSession> {
        self.request(Command::Initialize).await?
    }

    pub async fn get_next_question(&self) -> Result<NextQuestion> {
        self.request(Command::NextQuestion).await?
    }

    pub async fn process_answer(
        &self,
        answer: impl Into<String>,
        correct: bool,
    ) -> Result<AnswerResult> {
        let answer = answer.into();
        self.request(|reply| Command::Answer {
            answer,
            correct,
            reply,
        })
        .await?
    }

    pub async fn complete_quiz(&self) -> Result<QuizSummary> {
        self.request(Command::Complete).await?
    }

    pub async fn track(&self, request: TrackRequest) -> Result<TrackOutcome> {
        self.request(|reply| Command::Track(request, reply)).await?
    }

    pub async fn set_scene(&self, scene_id: Option<SceneId>) -> Result<()> {
        self.request(|reply| Command::SetScene(scene_id, reply)).await
    }

    pub async fn record_help_request(
        &self,
        topic: Option<String>,
    ) -> Result<Vec<RemediationSuggestion>> {
        self.assist(Assist::HelpRequest, topic).await
    }

    pub async fn record_coach_activation(
        &self,
        topic: Option<String>,
    ) -> Result<Vec<RemediationSuggestion>> {
        self.assist(Assist::CoachActivation, topic).await
    }

    async fn assist(
        &self,
        kind: Assist,
        topic: Option<String>,
    ) -> Result<Vec<RemediationSuggestion>> {
        self.request(|reply| Command::Assist { kind, topic, reply })
            .await
    }

    pub async fn accept_suggestion(&self, id: SuggestionId) -> Result<RemediationSuggestion> {
        self.resolve(id, RemediationAction::Accepted).await
    }

    pub async fn dismiss_suggestion(&self, id: SuggestionId) -> Result<RemediationSuggestion> {
        self.resolve(id, RemediationAction::Dismissed).await
    }

    async fn resolve(
        &self,
        id: SuggestionId,
        action: RemediationAction,
    ) -> Result<RemediationSuggestion> {
        self.request(|reply| Command::Resolve { id, action, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Shut the session down and stop the task.
    pub async fn shutdown(&self) -> Result<FlushOutcome> {
        self.request(Command::Shutdown).await
    }
}
