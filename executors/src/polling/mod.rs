pub mod http;
pub mod status;

use std::{fmt, sync::Arc, time::Duration};

use alloy::primitives::B256;
use rand::Rng;
use relay_core::error::{PendingReason, RelayError, TransactionPendingError};
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

pub use http::HttpStatusChecker;
pub use status::{PollStatus, RelayerResponse, StatusCheckRequest, StatusChecker};

/// Consecutive transient check failures tolerated before giving up
pub const MAX_CONSECUTIVE_TRANSIENT_ERRORS: u32 = 5;

const JITTER_RATIO: f64 = 0.2;

pub type StatusChangeHook = Arc<dyn Fn(&PollStatus) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Overall budget for one `start_polling` call
    pub timeout: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 1.5,
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Default)]
pub struct PollingOptions {
    /// Cancelling stops the session at its next suspension point
    pub cancel: Option<CancellationToken>,
    pub on_status_change: Option<StatusChangeHook>,
    pub backoff: BackoffConfig,
}

impl PollingOptions {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_on_status_change(mut self, hook: impl Fn(&PollStatus) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Arc::new(hook));
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

impl fmt::Debug for PollingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingOptions")
            .field("cancel", &self.cancel.is_some())
            .field("on_status_change", &self.on_status_change.is_some())
            .field("backoff", &self.backoff)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollingOutcome {
    pub hash: B256,
    pub receipt: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum PollingError {
    /// Timed out or cancelled; the operation id can be polled again later
    #[error(transparent)]
    Pending(#[from] TransactionPendingError),

    #[error("operation {operation_id} failed: {reason}")]
    Failed { operation_id: String, reason: String },

    #[error("status check for {operation_id} failed {attempts} times in a row: {last_error}")]
    TooManyTransientErrors {
        operation_id: String,
        attempts: u32,
        last_error: RelayError,
    },

    #[error("status check for {operation_id} failed: {source}")]
    Check {
        operation_id: String,
        #[source]
        source: RelayError,
    },
}

impl From<PollingError> for RelayError {
    fn from(err: PollingError) -> Self {
        match err {
            PollingError::Pending(pending) => RelayError::TransactionPending(pending),
            PollingError::Failed { reason, .. } => RelayError::Relayer {
                message: reason,
                status: None,
                body: None,
            },
            PollingError::TooManyTransientErrors { last_error, .. } => last_error,
            PollingError::Check { source, .. } => source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    Checking,
    Done,
    Cancelled,
    TimedOut,
}

/// State for one resolution call; rebuilt on every `start_polling`.
struct PollingSession<'a> {
    operation_id: &'a str,
    state: SessionState,
    interval: Duration,
    last_status: Option<PollStatus>,
    consecutive_errors: u32,
    deadline: Instant,
    cancel: CancellationToken,
}

impl<'a> PollingSession<'a> {
    fn new(operation_id: &'a str, options: &PollingOptions) -> Self {
        // Child token: a timeout cancels this session without touching the caller's token
        let cancel = options
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        Self {
            operation_id,
            state: SessionState::Waiting,
            interval: options.backoff.initial_interval,
            last_status: None,
            consecutive_errors: 0,
            deadline: Instant::now() + options.backoff.timeout,
            cancel,
        }
    }

    fn interrupt(&mut self, state: SessionState) -> PollingError {
        self.state = state;
        let reason = match state {
            SessionState::TimedOut => {
                self.cancel.cancel();
                PendingReason::TimedOut
            }
            _ => PendingReason::Cancelled,
        };

        tracing::warn!(
            operation_id = self.operation_id,
            last_status = self.last_status.as_ref().map(PollStatus::kind),
            state = ?self.state,
            %reason,
            "Polling stopped before the operation resolved"
        );

        PollingError::Pending(TransactionPendingError {
            operation_id: self.operation_id.to_string(),
            last_status: self.last_status.as_ref().map(|s| s.kind().to_string()),
            reason,
        })
    }

    fn next_delay(&self) -> Duration {
        let jitter = rand::rng().random_range(-JITTER_RATIO..=JITTER_RATIO);
        self.interval.mul_f64(1.0 + jitter)
    }

    fn grow_interval(&mut self, backoff: &BackoffConfig) {
        self.interval = self.interval.mul_f64(backoff.multiplier).min(backoff.max_interval);
    }
}

/// Client-side resolver for operations processed asynchronously by a relayer.
pub struct PollingManager<C> {
    checker: Arc<C>,
}

impl<C: StatusChecker> PollingManager<C> {
    pub fn new(checker: Arc<C>) -> Self {
        Self { checker }
    }

    /// Polls until the operation is confirmed or failed.
    ///
    /// On timeout or cancellation returns [`PollingError::Pending`] with the
    /// last observed status, so the caller can persist the id and resume.
    #[tracing::instrument(skip_all, fields(operation_id = operation_id))]
    pub async fn start_polling(
        &self,
        operation_id: &str,
        options: PollingOptions,
    ) -> Result<PollingOutcome, PollingError> {
        let mut session = PollingSession::new(operation_id, &options);

        loop {
            if session.cancel.is_cancelled() {
                return Err(session.interrupt(SessionState::Cancelled));
            }

            session.state = SessionState::Checking;
            let checked = tokio::select! {
                biased;
                _ = session.cancel.cancelled() => {
                    return Err(session.interrupt(SessionState::Cancelled));
                }
                _ = sleep_until(session.deadline) => {
                    return Err(session.interrupt(SessionState::TimedOut));
                }
                result = self.checker.check_status(operation_id) => result,
            };

            match checked.and_then(PollStatus::try_from) {
                Ok(status) => {
                    session.consecutive_errors = 0;

                    if status.is_change_from(session.last_status.as_ref()) {
                        tracing::debug!(status = status.kind(), "Operation status changed");
                        if let Some(hook) = &options.on_status_change {
                            hook(&status);
                        }
                    }
                    session.last_status = Some(status.clone());

                    match status {
                        PollStatus::Confirmed { hash, receipt } => {
                            session.state = SessionState::Done;
                            return Ok(PollingOutcome { hash, receipt });
                        }
                        PollStatus::Failed { reason } => {
                            session.state = SessionState::Done;
                            return Err(PollingError::Failed {
                                operation_id: operation_id.to_string(),
                                reason,
                            });
                        }
                        _ => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    session.consecutive_errors += 1;
                    tracing::warn!(
                        attempt = session.consecutive_errors,
                        error = %e,
                        "Transient status check failure"
                    );
                    if session.consecutive_errors >= MAX_CONSECUTIVE_TRANSIENT_ERRORS {
                        session.state = SessionState::Done;
                        return Err(PollingError::TooManyTransientErrors {
                            operation_id: operation_id.to_string(),
                            attempts: session.consecutive_errors,
                            last_error: e,
                        });
                    }
                }
                Err(e) => {
                    session.state = SessionState::Done;
                    return Err(PollingError::Check {
                        operation_id: operation_id.to_string(),
                        source: e,
                    });
                }
            }

            session.state = SessionState::Waiting;
            let delay = session.next_delay();
            tokio::select! {
                biased;
                _ = session.cancel.cancelled() => {
                    return Err(session.interrupt(SessionState::Cancelled));
                }
                _ = sleep_until(session.deadline) => {
                    return Err(session.interrupt(SessionState::TimedOut));
                }
                _ = sleep(delay) => {}
            }
            session.grow_interval(&options.backoff);
        }
    }
}
