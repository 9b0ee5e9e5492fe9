//! REST API client module for the Mano analytics backend.
//!
//! This module provides the `ApiClient` for logging in, submitting
//! free-text queries, and fetching dashboard metrics, plus the trait
//! seams (`AuthApi`, `QueryApi`) the session manager and
//! query controller depend on.
//!
//! The API uses bearer token authentication obtained from `POST /token`.
//! The token is read from the credential store on every request.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthApi, QueryApi};
pub use error::{ApiError, ApiResult};
