use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::{ApiError, QueryApi};
use crate::models::{FormattedContent, QueryResponse};

/// Upper bound on one query round-trip before it is failed locally.
/// Generous because natural-language queries can take a while server-side.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

/// Shown for every transport-level failure; the cause goes to the logs.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to process query. Please try again.";

/// Outcome of one settled submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum QueryResult {
    Success(FormattedContent),
    Failure(String),
}

/// Published state of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum QueryState {
    Idle,
    Pending { text: String },
    Settled { result: QueryResult },
}

impl QueryState {
    pub fn settled(result: QueryResult) -> Self {
        QueryState::Settled { result }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Query is empty")]
    EmptyQuery,
}

/// What happened to one call of [`QueryController::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Not sent; the state did not change
    Rejected(ValidationError),
    /// This submission's outcome is now the published state
    Settled(QueryResult),
    /// A newer submission (or a reset) replaced this one; its outcome was discarded
    Superseded,
}

#[derive(Default)]
struct Inner {
    /// Sequence number of the latest submission; completions for any other
    /// number are stale
    seq: u64,
    in_flight: Option<CancellationToken>,
    last_error: Option<ApiError>,
}

/// Drives free-text queries through their lifecycle.
///
/// The controller is shared by reference: `submit` takes `&self`, so a
/// front-end can start a new query while an older one is still awaiting
/// the network. The older one is cancelled and its completion ignored.
pub struct QueryController {
    api: Arc<dyn QueryApi>,
    timeout: Duration,
    state: watch::Sender<QueryState>,
    inner: Mutex<Inner>,
}

impl QueryController {
    pub fn new(api: Arc<dyn QueryApi>) -> Self {
        Self::with_timeout(api, Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS))
    }

    pub fn with_timeout(api: Arc<dyn QueryApi>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(QueryState::Idle);
        Self {
            api,
            timeout,
            state,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> QueryState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.state.subscribe()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), QueryState::Pending { .. })
    }

    /// The cause of the most recent generic failure, for diagnostics.
    /// Cleared when read and when a new submission starts.
    pub fn take_last_error(&self) -> Option<ApiError> {
        self.lock().last_error.take()
    }

    /// Submit a query and wait for its outcome.
    pub async fn submit(&self, raw_text: &str) -> Submission {
        let text = raw_text.trim();
        if text.is_empty() {
            debug!("Ignoring empty query");
            return Submission::Rejected(ValidationError::EmptyQuery);
        }

        let (seq, cancel) = self.begin(text);
        info!(seq, "Submitting query");

        let outcome = match tokio::time::timeout(self.timeout, self.api.submit_query(text, &cancel)).await {
            Ok(Ok(response)) => Self::interpret(response),
            Ok(Err(ApiError::Cancelled)) => {
                debug!(seq, "Query cancelled");
                return Submission::Superseded;
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                cancel.cancel();
                Err(ApiError::Timeout(self.timeout))
            }
        };

        self.settle(seq, outcome)
    }

    /// Cancel anything in flight and return to `Idle`.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.seq += 1;
        if let Some(cancel) = inner.in_flight.take() {
            cancel.cancel();
        }
        inner.last_error = None;
        self.state.send_replace(QueryState::Idle);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, text: &str) -> (u64, CancellationToken) {
        let mut inner = self.lock();
        inner.seq += 1;
        if let Some(previous) = inner.in_flight.take() {
            debug!(seq = inner.seq, "Superseding in-flight query");
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        inner.in_flight = Some(cancel.clone());
        inner.last_error = None;
        self.state.send_replace(QueryState::Pending {
            text: text.to_string(),
        });

        (inner.seq, cancel)
    }

    /// Map a wire response to a result. A non-empty `error` wins over
    /// `formatted`; a response with neither is malformed.
    fn interpret(response: QueryResponse) -> Result<QueryResult, ApiError> {
        if let Some(message) = response.error.filter(|m| !m.is_empty()) {
            return Ok(QueryResult::Failure(message));
        }
        match response.formatted {
            Some(formatted) => Ok(QueryResult::Success(FormattedContent::new(formatted))),
            None => Err(ApiError::InvalidResponse(
                "Query response had neither `formatted` nor `error`".to_string(),
            )),
        }
    }

    fn settle(&self, seq: u64, outcome: Result<QueryResult, ApiError>) -> Submission {
        let mut inner = self.lock();
        if inner.seq != seq {
            debug!(seq, latest = inner.seq, "Discarding stale query result");
            return Submission::Superseded;
        }
        inner.in_flight = None;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, seq, "Query failed");
                inner.last_error = Some(e);
                QueryResult::Failure(GENERIC_FAILURE_MESSAGE.to_string())
            }
        };

        self.state.send_replace(QueryState::settled(result.clone()));
        Submission::Settled(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::api::ApiResult;

    enum Behavior {
        Formatted(&'static str),
        SemanticError(&'static str),
        Fault,
        Empty,
        Hang,
        /// Echo the text back as `formatted`; "slow" takes longer than anything else
        Echo,
        /// Signal `entered`, then wait for `release` before answering
        Gated { entered: Notify, release: Notify },
    }

    struct StubQuery {
        behavior: Behavior,
        honor_cancel: bool,
        calls: AtomicUsize,
        cancelled: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl StubQuery {
        fn new(behavior: Behavior) -> Arc<Self> {
            Self::build(behavior, true)
        }

        fn ignoring_cancel(behavior: Behavior) -> Arc<Self> {
            Self::build(behavior, false)
        }

        fn build(behavior: Behavior, honor_cancel: bool) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                honor_cancel,
                calls: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn formatted(html: &str) -> QueryResponse {
            QueryResponse {
                formatted: Some(html.to_string()),
                ..Default::default()
            }
        }

        async fn reply(&self, text: &str) -> ApiResult<QueryResponse> {
            match &self.behavior {
                Behavior::Formatted(html) => Ok(Self::formatted(html)),
                Behavior::SemanticError(message) => Ok(QueryResponse {
                    error: Some(message.to_string()),
                    ..Default::default()
                }),
                Behavior::Fault => Err(ApiError::ServerError("boom".to_string())),
                Behavior::Empty => Ok(QueryResponse::default()),
                Behavior::Hang => std::future::pending().await,
                Behavior::Echo => {
                    let delay = if text == "slow" { 200 } else { 10 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(Self::formatted(text))
                }
                Behavior::Gated { entered, release } => {
                    entered.notify_one();
                    release.notified().await;
                    Ok(Self::formatted("<p>ok</p>"))
                }
            }
        }
    }

    #[async_trait]
    impl QueryApi for StubQuery {
        async fn submit_query(&self, text: &str, cancel: &CancellationToken) -> ApiResult<QueryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(text.to_string());

            if !self.honor_cancel {
                return self.reply(text).await;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Cancelled)
                }
                result = self.reply(text) => result,
            }
        }
    }

    fn success(html: &str) -> QueryResult {
        QueryResult::Success(FormattedContent::new(html))
    }

    fn generic_failure() -> QueryResult {
        QueryResult::Failure(GENERIC_FAILURE_MESSAGE.to_string())
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_empty_query_is_rejected_without_call() {
        let api = StubQuery::new(Behavior::Formatted("<p>ok</p>"));
        let controller = QueryController::new(api.clone());

        assert_eq!(controller.submit("").await, Submission::Rejected(ValidationError::EmptyQuery));
        assert_eq!(controller.submit("   ").await, Submission::Rejected(ValidationError::EmptyQuery));
        assert_eq!(controller.submit("\n\t").await, Submission::Rejected(ValidationError::EmptyQuery));
        assert_eq!(controller.state(), QueryState::Idle);
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn test_query_text_is_trimmed() {
        let api = StubQuery::new(Behavior::Formatted("<p>ok</p>"));
        let controller = QueryController::new(api.clone());

        controller.submit("  top startups \n").await;
        assert_eq!(*api.seen.lock().unwrap(), vec!["top startups".to_string()]);
    }

    // -------------------------------------------------------------------------
    // Settling
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_success_passes_through_pending() {
        let api = StubQuery::new(Behavior::Gated {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let controller = QueryController::new(api.clone());
        let Behavior::Gated { entered, release } = &api.behavior else {
            unreachable!()
        };

        let observe = async {
            entered.notified().await;
            assert_eq!(
                controller.state(),
                QueryState::Pending {
                    text: "valid text".to_string()
                }
            );
            assert!(controller.is_pending());
            release.notify_one();
        };
        let (submission, ()) = tokio::join!(controller.submit("valid text"), observe);

        assert_eq!(submission, Submission::Settled(success("<p>ok</p>")));
        assert_eq!(controller.state(), QueryState::settled(success("<p>ok</p>")));
        assert!(!controller.is_pending());
    }

    #[tokio::test]
    async fn test_semantic_error_is_surfaced_verbatim() {
        let controller = QueryController::new(StubQuery::new(Behavior::SemanticError("bad syntax")));

        let submission = controller.submit("valid text").await;
        assert_eq!(submission, Submission::Settled(QueryResult::Failure("bad syntax".to_string())));
        assert_eq!(
            controller.state(),
            QueryState::settled(QueryResult::Failure("bad syntax".to_string()))
        );
        assert!(controller.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_transport_fault_is_generic_and_logged() {
        let controller = QueryController::new(StubQuery::new(Behavior::Fault));

        controller.submit("valid text").await;
        assert_eq!(controller.state(), QueryState::settled(generic_failure()));

        let cause = controller.take_last_error().unwrap();
        assert!(matches!(cause, ApiError::ServerError(ref body) if body == "boom"));
        assert!(controller.take_last_error().is_none());
    }

    #[tokio::test]
    async fn test_response_without_payload_is_generic_failure() {
        let controller = QueryController::new(StubQuery::new(Behavior::Empty));

        controller.submit("valid text").await;
        assert_eq!(controller.state(), QueryState::settled(generic_failure()));
        assert!(matches!(controller.take_last_error(), Some(ApiError::InvalidResponse(_))));
    }

    #[test]
    fn test_interpret_error_wins_unless_empty() {
        let both = QueryController::interpret(QueryResponse {
            formatted: Some("<p>ok</p>".to_string()),
            error: Some("bad syntax".to_string()),
            ..Default::default()
        });
        assert_eq!(both.unwrap(), QueryResult::Failure("bad syntax".to_string()));

        let empty_error = QueryController::interpret(QueryResponse {
            formatted: Some("<p>ok</p>".to_string()),
            error: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(empty_error.unwrap(), success("<p>ok</p>"));
    }

    #[test]
    fn test_state_serializes_for_front_ends() {
        let pending = serde_json::to_value(QueryState::Pending {
            text: "top startups".to_string(),
        })
        .unwrap();
        assert_eq!(pending, serde_json::json!({"status": "pending", "text": "top startups"}));

        let settled = serde_json::to_value(QueryState::settled(success("<p>ok</p>"))).unwrap();
        assert_eq!(
            settled,
            serde_json::json!({"status": "settled", "result": {"kind": "success", "value": "<p>ok</p>"}})
        );
    }

    #[tokio::test]
    async fn test_hung_request_times_out() {
        let api = StubQuery::new(Behavior::Hang);
        let controller = QueryController::with_timeout(api, Duration::from_millis(50));

        let submission = controller.submit("valid text").await;
        assert_eq!(submission, Submission::Settled(generic_failure()));
        assert!(matches!(controller.take_last_error(), Some(ApiError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_resubmission_after_settle() {
        let controller = QueryController::new(StubQuery::new(Behavior::Echo));

        controller.submit("first").await;
        assert_eq!(controller.state(), QueryState::settled(success("first")));

        controller.submit("second").await;
        assert_eq!(controller.state(), QueryState::settled(success("second")));
    }

    // -------------------------------------------------------------------------
    // Overlapping submissions
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_later_submission_wins_over_slow_earlier_one() {
        let api = StubQuery::new(Behavior::Echo);
        let controller = QueryController::new(api.clone());

        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.submit("fast").await
        };
        let (first, second) = tokio::join!(controller.submit("slow"), second);

        assert_eq!(first, Submission::Superseded);
        assert_eq!(second, Submission::Settled(success("fast")));
        assert_eq!(controller.state(), QueryState::settled(success("fast")));
        assert_eq!(api.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded_even_without_cancellation() {
        let api = StubQuery::ignoring_cancel(Behavior::Echo);
        let controller = QueryController::new(api.clone());

        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.submit("fast").await
        };
        let (first, second) = tokio::join!(controller.submit("slow"), second);

        // "slow" completes last but must not overwrite "fast"
        assert_eq!(first, Submission::Superseded);
        assert_eq!(second, Submission::Settled(success("fast")));
        assert_eq!(controller.state(), QueryState::settled(success("fast")));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_reset_cancels_in_flight_query() {
        let api = StubQuery::new(Behavior::Echo);
        let controller = QueryController::new(api.clone());

        let reset = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.reset();
        };
        let (submission, ()) = tokio::join!(controller.submit("slow"), reset);

        assert_eq!(submission, Submission::Superseded);
        assert_eq!(controller.state(), QueryState::Idle);
        assert_eq!(api.cancelled.load(Ordering::SeqCst), 1);
    }
}
