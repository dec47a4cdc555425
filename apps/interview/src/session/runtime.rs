//! Session runtime: one tokio task per interview session.
//!
//! The task owns the [`SessionController`] and is the only place it is
//! mutated. It selects over:
//! - the 1 s tick and the 30 s reconcile interval,
//! - user commands arriving through a [`SessionHandle`],
//! - results of network calls, which run in spawned tasks and report back
//!   on an internal channel.
//!
//! Every iteration publishes a fresh [`SessionSnapshot`] on a watch channel.
//! The loop ends once finalization has run, the interview turns out to be
//! gone, or every handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api_client::{ApiError, InterviewApi, SubmitOutcome};
use crate::models::interview::{InterviewData, InterviewId};
use crate::models::question::QuestionId;
use crate::session::clock::Clock;
use crate::session::controller::{SessionController, SessionError, SessionSnapshot, SubmissionEffect};
use crate::session::gate::Finalization;
use crate::session::timer::{RECONCILE_INTERVAL_SECS, TICK_INTERVAL_SECS};
use crate::session::SessionSettings;

const COMMAND_BUFFER: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    SetText {
        question_id: QuestionId,
        text: String,
        reply: Reply<()>,
    },
    SetNotes {
        question_id: QuestionId,
        notes: String,
        reply: Reply<()>,
    },
    Select {
        question_id: QuestionId,
        reply: Reply<()>,
    },
    Submit {
        reply: Reply<()>,
    },
    Exit {
        reply: Reply<()>,
    },
    Dispose,
}

enum Internal {
    Loaded(Result<InterviewData, ApiError>),
    Submitted(Result<SubmitOutcome, ApiError>),
    Refetched {
        target: QuestionId,
        result: Result<InterviewData, ApiError>,
    },
    CompletionDelayElapsed,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    interview_id: InterviewId,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn interview_id(&self) -> InterviewId {
        self.interview_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request(&self, command: impl FnOnce(Reply<()>) -> Command) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Stopped)?;
        response.await.map_err(|_| SessionError::Stopped)?
    }

    pub async fn set_answer_text(
        &self,
        question_id: QuestionId,
        text: String,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::SetText {
            question_id,
            text,
            reply,
        })
        .await
    }

    pub async fn set_answer_notes(
        &self,
        question_id: QuestionId,
        notes: String,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::SetNotes {
            question_id,
            notes,
            reply,
        })
        .await
    }

    pub async fn select_question(&self, question_id: QuestionId) -> Result<(), SessionError> {
        self.request(|reply| Command::Select { question_id, reply })
            .await
    }

    /// Starts submitting the current answer. Returns as soon as the request is
    /// in flight; a second call before the verdict arrives is refused.
    pub async fn submit(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Submit { reply }).await
    }

    /// Ends the session at the user's request. Returns once finalization has
    /// run. Exiting an already finished session is a no-op.
    pub async fn exit(&self) -> Result<(), SessionError> {
        if self.snapshot().navigate_away {
            return Ok(());
        }
        self.request(|reply| Command::Exit { reply }).await
    }

    /// Stops the runtime without finalizing (navigation away).
    pub async fn dispose(&self) {
        let _ = self.commands.send(Command::Dispose).await;
    }
}

/// Spawns the runtime for one interview and starts loading its data.
pub fn spawn_session(
    interview_id: InterviewId,
    api: Arc<dyn InterviewApi>,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::loading(
        interview_id,
        settings.budget_seconds,
    ));

    let runtime = SessionRuntime {
        controller: SessionController::new(interview_id, settings, clock),
        api,
        commands: command_rx,
        internal_tx,
        internal_rx,
        snapshots: snapshot_tx,
        stopping: false,
    };
    tokio::spawn(runtime.run());

    SessionHandle {
        interview_id,
        commands: command_tx,
        snapshots: snapshot_rx,
    }
}

struct SessionRuntime {
    controller: SessionController,
    api: Arc<dyn InterviewApi>,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshots: watch::Sender<SessionSnapshot>,
    stopping: bool,
}

impl SessionRuntime {
    async fn run(mut self) {
        let interview_id = self.controller.interview_id();
        info!("Session runtime started for interview {interview_id}");
        self.spawn_fetch(None);

        let mut tick = periodic(TICK_INTERVAL_SECS);
        let mut reconcile = periodic(RECONCILE_INTERVAL_SECS);

        while !self.stopping {
            tokio::select! {
                _ = tick.tick() => {
                    let fired = self.controller.tick();
                    self.finalize(fired).await;
                }
                _ = reconcile.tick() => {
                    let fired = self.controller.reconcile();
                    self.finalize(fired).await;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Dispose) | None => {
                        debug!("Session {interview_id} disposed");
                        self.stopping = true;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.internal_rx.recv() => self.handle_internal(event).await,
            }

            if self.controller.should_navigate_away() {
                self.stopping = true;
            }
            self.publish();
        }

        info!(
            "Session runtime stopped for interview {interview_id} ({})",
            self.controller.status()
        );
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.controller.snapshot());
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetText {
                question_id,
                text,
                reply,
            } => {
                let _ = reply.send(self.controller.set_answer_text(question_id, text));
            }
            Command::SetNotes {
                question_id,
                notes,
                reply,
            } => {
                let _ = reply.send(self.controller.set_answer_notes(question_id, notes));
            }
            Command::Select { question_id, reply } => {
                let _ = reply.send(self.controller.select_question(question_id));
            }
            Command::Submit { reply } => match self.controller.begin_submission() {
                Ok(request) => {
                    let api = self.api.clone();
                    let events = self.internal_tx.clone();
                    tokio::spawn(async move {
                        let result = request.send(api.as_ref()).await;
                        let _ = events.send(Internal::Submitted(result));
                    });
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    debug!("Submit refused: {e}");
                    let _ = reply.send(Err(e));
                }
            },
            Command::Exit { reply } => {
                let result = self.controller.exit();
                match result {
                    Ok(fired) => {
                        self.finalize(fired).await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Dispose => self.stopping = true,
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Loaded(Ok(data)) => match self.controller.load(data) {
                Ok(fired) => self.finalize(fired).await,
                Err(e) => warn!("Ignoring interview data: {e}"),
            },
            Internal::Loaded(Err(e)) => self.controller.abandon_load(&e),
            Internal::Submitted(result) => {
                let effect = self.controller.complete_submission(result);
                self.apply_effect(effect);
            }
            Internal::Refetched { target, result } => {
                let effect = self.controller.apply_refresh(result, target);
                self.apply_effect(effect);
            }
            Internal::CompletionDelayElapsed => {
                let fired = self.controller.finish_completion();
                self.finalize(fired).await;
            }
        }
    }

    fn apply_effect(&mut self, effect: SubmissionEffect) {
        match effect {
            SubmissionEffect::Refetch { target } => self.spawn_fetch(Some(target)),
            SubmissionEffect::FinalizeAfter(delay) => {
                let events = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(Internal::CompletionDelayElapsed);
                });
            }
            SubmissionEffect::NavigateAway => self.stopping = true,
            SubmissionEffect::None
            | SubmissionEffect::Ignored
            | SubmissionEffect::Retry { .. }
            | SubmissionEffect::Rejected { .. }
            | SubmissionEffect::SessionExpired => {}
        }
    }

    /// Fetches interview data; with a target this is a refetch after an unknown verdict target.
    fn spawn_fetch(&self, target: Option<QuestionId>) {
        let api = self.api.clone();
        let events = self.internal_tx.clone();
        let interview_id = self.controller.interview_id();
        tokio::spawn(async move {
            let result = api.fetch_interview(interview_id).await;
            let event = match target {
                Some(target) => Internal::Refetched { target, result },
                None => Internal::Loaded(result),
            };
            let _ = events.send(event);
        });
    }

    async fn finalize(&mut self, fired: Option<Finalization>) {
        let Some(finalization) = fired else {
            return;
        };
        let reason = finalization
            .execute(self.api.as_ref(), self.controller.interview_id())
            .await;
        self.controller.mark_finalized();
        info!(
            "Interview {} finalized: {}",
            self.controller.interview_id(),
            reason.as_str()
        );
    }
}

fn periodic(every_secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(every_secs);
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
