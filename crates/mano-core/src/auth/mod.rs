//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: durable persistence of the bearer token and the
//!   subject it was issued to (file, OS keyring, or in-memory backends)
//! - `SessionManager`: the `Unresolved -> Anonymous/Authenticated`
//!   lifecycle, published to collaborators over a watch channel
//!
//! The transport reads the store on every request, so the store is the
//! single source of truth for "which token goes out". Wrapping the backend
//! in `RevocableCredentialStore` keeps that true when a clear fails.

pub mod credentials;
pub mod session;

pub use credentials::{
    Credential, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore, OsKeychain, RevocableCredentialStore, SecretStore,
};
pub use session::{Identity, LoginError, Session, SessionManager, SessionState};
