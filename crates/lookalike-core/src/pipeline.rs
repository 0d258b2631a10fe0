//! Submission pipeline: encode → analyze → resolve, published as a
//! [`PipelineState`] on a watch channel.
//!
//! One submission runs at a time. Entering `Loading` is an atomic
//! check-and-set on the state channel, so a submit that arrives while a run
//! is in flight is ignored instead of starting a second run.

use crate::inference::{AnalysisError, InferenceClient};
use crate::resolver::{IdentityResolver, LookupError};
use crate::types::{EncodedImage, PipelineState, ProfileImage};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

pub const MSG_NO_IMAGE: &str = "이미지를 선택해주세요.";
pub const MSG_ANALYSIS_PREFIX: &str = "이미지 분석 중 오류가 발생했습니다";
pub const MSG_LOOKUP_FAILED: &str = "TMDB API 요청 중 오류가 발생했습니다.";
pub const MSG_NOT_FOUND: &str = "연예인 이미지를 찾을 수 없습니다.";
pub const MSG_TIMEOUT: &str = "요청 시간이 초과되었습니다.";
pub const MSG_CANCELLED: &str = "요청이 취소되었습니다.";

const DEFAULT_ANALYZE_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_RESOLVE_DEADLINE: Duration = Duration::from_secs(10);

/// The two network-bound stages of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Analyze,
    Resolve,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Analyze => "analyze",
            Stage::Resolve => "resolve",
        })
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no image selected")]
    NoImageSelected,
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("no profile image found for {name:?}")]
    NotFound { name: String },
    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
    #[error("{stage} stage cancelled")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    /// The single line shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::NoImageSelected => MSG_NO_IMAGE.to_string(),
            PipelineError::Analysis(e) => format!("{MSG_ANALYSIS_PREFIX}: {e}"),
            PipelineError::Lookup(_) => MSG_LOOKUP_FAILED.to_string(),
            PipelineError::NotFound { .. } => MSG_NOT_FOUND.to_string(),
            PipelineError::Timeout { .. } => MSG_TIMEOUT.to_string(),
            PipelineError::Cancelled { .. } => MSG_CANCELLED.to_string(),
        }
    }
}

/// Upper bound on each network stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDeadlines {
    pub analyze: Duration,
    pub resolve: Duration,
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self {
            analyze: DEFAULT_ANALYZE_DEADLINE,
            resolve: DEFAULT_RESOLVE_DEADLINE,
        }
    }
}

/// Result of a `select` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected,
    /// A submission is in flight; the selection was not applied.
    Busy,
}

/// Result of a `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A run was already loading; nothing happened.
    Ignored,
    /// The submission reached a terminal state.
    Finished(PipelineState),
}

/// Orchestrates the inference and lookup stages and owns the pipeline state.
pub struct PipelineController {
    inference: Arc<dyn InferenceClient>,
    resolver: Arc<dyn IdentityResolver>,
    deadlines: StageDeadlines,
    state: watch::Sender<PipelineState>,
}

impl PipelineController {
    pub fn new(inference: Arc<dyn InferenceClient>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            inference,
            resolver,
            deadlines: StageDeadlines::default(),
            state: watch::Sender::new(PipelineState::default()),
        }
    }

    pub fn with_deadlines(mut self, deadlines: StageDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Observe every state transition.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Bind the subject image used by the next submission.
    ///
    /// An error stays on screen with the new subject; a success is cleared.
    pub fn select(&self, image: EncodedImage) -> SelectOutcome {
        let mut outcome = SelectOutcome::Busy;
        self.state.send_if_modified(|state| {
            match *state {
                PipelineState::Loading { .. } => return false,
                PipelineState::Idle { ref mut subject }
                | PipelineState::Error { ref mut subject, .. } => {
                    *subject = Some(image);
                }
                PipelineState::Success { .. } => {
                    *state = PipelineState::Idle {
                        subject: Some(image),
                    };
                }
            }
            outcome = SelectOutcome::Selected;
            true
        });
        outcome
    }

    /// Run one submission to completion.
    pub async fn submit(&self) -> SubmitOutcome {
        self.submit_with(&CancellationToken::new()).await
    }

    /// Run one submission, aborting at the next stage boundary once `cancel` fires.
    pub async fn submit_with(&self, cancel: &CancellationToken) -> SubmitOutcome {
        let Some(begin) = self.begin() else {
            tracing::debug!("submit ignored: a submission is already loading");
            return SubmitOutcome::Ignored;
        };

        let subject = match begin {
            Ok(subject) => subject,
            Err(err) => {
                tracing::warn!(error = %err, "submit rejected");
                return SubmitOutcome::Finished(self.state());
            }
        };

        let guard = LoadingGuard {
            state: &self.state,
            armed: true,
        };

        let id = Uuid::new_v4();
        let span = tracing::info_span!("submission", %id);
        let result = self.run(&subject, cancel).instrument(span).await;

        let terminal = match result {
            Ok((name, image)) => {
                tracing::info!(%id, name = %name, url = %image.url, "submission succeeded");
                PipelineState::Success {
                    subject,
                    name,
                    image,
                }
            }
            Err(err) => {
                tracing::warn!(%id, error = %err, "submission failed");
                let candidate = self.state.borrow().candidate().map(str::to_string);
                PipelineState::Error {
                    subject: Some(subject),
                    candidate,
                    message: err.user_message(),
                }
            }
        };

        guard.finish(terminal.clone());
        SubmitOutcome::Finished(terminal)
    }

    /// Validate and enter `Loading` atomically.
    ///
    /// Returns `None` when already loading, `Some(Err)` when there is no
    /// subject (the state has moved to `Error`), `Some(Ok)` otherwise.
    fn begin(&self) -> Option<Result<EncodedImage, PipelineError>> {
        let mut started = None;
        self.state.send_if_modified(|state| {
            if state.is_loading() {
                return false;
            }
            match state.subject().cloned() {
                Some(subject) => {
                    *state = PipelineState::Loading {
                        subject: subject.clone(),
                        candidate: None,
                    };
                    started = Some(Ok(subject));
                }
                None => {
                    let err = PipelineError::NoImageSelected;
                    *state = PipelineState::Error {
                        subject: None,
                        candidate: None,
                        message: err.user_message(),
                    };
                    started = Some(Err(err));
                }
            }
            true
        });
        started
    }

    async fn run(
        &self,
        subject: &EncodedImage,
        cancel: &CancellationToken,
    ) -> Result<(String, ProfileImage), PipelineError> {
        let name = bounded(
            Stage::Analyze,
            self.deadlines.analyze,
            cancel,
            self.inference.analyze(subject),
        )
        .await?;

        tracing::info!(candidate = %name, "analysis complete");
        self.state.send_modify(|state| {
            if let PipelineState::Loading { candidate, .. } = state {
                *candidate = Some(name.clone());
            }
        });

        let image = bounded(
            Stage::Resolve,
            self.deadlines.resolve,
            cancel,
            self.resolver.resolve(&name),
        )
        .await?
        .ok_or_else(|| PipelineError::NotFound { name: name.clone() })?;

        Ok((name, image))
    }
}

/// Leaves `Loading` for `Error` if a submission future is dropped before
/// reaching its terminal state.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<PipelineState>,
    armed: bool,
}

impl LoadingGuard<'_> {
    fn finish(mut self, terminal: PipelineState) {
        self.armed = false;
        self.state.send_replace(terminal);
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.state.send_if_modified(|state| {
            let PipelineState::Loading { subject, candidate } = &mut *state else {
                return false;
            };
            tracing::warn!("submission dropped while loading");
            let next = PipelineState::Error {
                subject: Some(subject.clone()),
                candidate: candidate.take(),
                message: MSG_CANCELLED.to_string(),
            };
            *state = next;
            true
        });
    }
}

/// Await one stage under its deadline and the submission's cancel token.
async fn bounded<T, E>(
    stage: Stage,
    deadline: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, PipelineError>
where
    PipelineError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage }),
        res = tokio::time::timeout(deadline, fut) => match res {
            Ok(out) => out.map_err(PipelineError::from),
            Err(_) => Err(PipelineError::Timeout { stage, after: deadline }),
        },
    }
}
