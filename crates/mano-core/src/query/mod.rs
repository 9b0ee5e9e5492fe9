//! Free-text query pipeline.
//!
//! `QueryController` drives one query at a time through
//! `Idle -> Pending -> Settled(Success | Failure)`. A newer submission
//! cancels and supersedes the one in flight, so only the latest outcome
//! is ever published.

pub mod controller;

pub use controller::{
    QueryController, QueryResult, QueryState, Submission, ValidationError,
    DEFAULT_QUERY_TIMEOUT_SECS, GENERIC_FAILURE_MESSAGE,
};
