//! Core library for the Mano dashboard.
//!
//! This crate owns everything in the dashboard with real state-transition
//! logic: the credential store, the session lifecycle, the authenticated
//! HTTP transport, and the free-text query pipeline. Front-ends (the `mano`
//! CLI, a browser shell via the `ts` feature bindings) only render the
//! view-models published here.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod query;
pub mod utils;

pub use api::{ApiClient, ApiError, ApiResult};
pub use auth::{
    Credential, CredentialStore, FileCredentialStore, Identity, KeyringCredentialStore,
    LoginError, MemoryCredentialStore, RevocableCredentialStore, Session, SessionManager,
    SessionState,
};
pub use config::{Config, CredentialBackend};
pub use query::{QueryController, QueryResult, QueryState, Submission, ValidationError};
