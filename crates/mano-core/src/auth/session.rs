use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, AuthApi};

use super::{Credential, CredentialStore};

/// The authenticated subject as collaborators see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Identity {
    pub email: String,
}

/// Lifecycle of the single client-side session.
///
/// `Unresolved` is left exactly once, by the startup resolution in
/// [`SessionManager::restore`], and never re-entered. `login` and `logout`
/// run that resolution first when it has not happened yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "identity", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    Unresolved,
    Anonymous,
    Authenticated(Identity),
}

/// Read-only session view published to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub state: SessionState,
    /// True until the credential store has been consulted once
    pub loading: bool,
}

impl Session {
    fn unresolved() -> Self {
        Self {
            state: SessionState::Unresolved,
            loading: true,
        }
    }

    fn resolved(state: SessionState) -> Self {
        Self {
            state,
            loading: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Email and password required")]
    MissingCredentials,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Unable to reach server: {0}")]
    Network(#[source] ApiError),

    #[error("Failed to persist credential: {0}")]
    Storage(String),
}

impl LoginError {
    /// Fixed, user-facing text for a failed login.
    pub fn user_message(&self) -> &'static str {
        match self {
            LoginError::MissingCredentials => "Email and password required.",
            LoginError::InvalidCredentials => "Login failed. Please check your credentials.",
            LoginError::Network(_) => "Unable to connect to server. Please try again.",
            LoginError::Storage(_) => "Logged in, but the session could not be saved. Please try again.",
        }
    }
}

/// Owns the authenticated-identity lifecycle.
///
/// The current [`Session`] lives in a watch channel: collaborators read it
/// with [`session`](Self::session) or follow it with
/// [`subscribe`](Self::subscribe). Only this type writes the credential
/// store.
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    auth: Arc<dyn AuthApi>,
    session: watch::Sender<Session>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, auth: Arc<dyn AuthApi>) -> Self {
        let (session, _) = watch::channel(Session::unresolved());
        Self {
            store,
            auth,
            session,
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_authenticated()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.borrow().identity().cloned()
    }

    /// One-shot startup resolution from the credential store.
    ///
    /// Only the first call reads the store; later calls return the current
    /// session untouched.
    pub fn restore(&self) -> Session {
        if !self.session.borrow().loading {
            return self.session();
        }

        let state = self.stored_state();

        // Another caller may have resolved the session while the store was read
        self.session.send_if_modified(|session| {
            if session.loading {
                *session = Session::resolved(state);
                true
            } else {
                false
            }
        });

        self.session()
    }

    /// Exchange email and password for a token and start a session.
    ///
    /// A rejected or unreachable login changes neither the store nor the
    /// session. When the token cannot be persisted the session is re-derived
    /// from whatever the store still holds.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, LoginError> {
        self.restore();

        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(LoginError::MissingCredentials);
        }

        let token = match self.auth.login(email, password).await {
            Ok(response) => response.access_token,
            Err(e) if e.is_auth_rejected() => {
                warn!(error = %e, "Login rejected");
                return Err(LoginError::InvalidCredentials);
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                return Err(LoginError::Network(e));
            }
        };

        let credential = Credential::new(token, email);
        if let Err(e) = self.store.save(&credential) {
            error!(error = %e, "Failed to save credential");
            let state = self.stored_state();
            self.session.send_if_modified(|session| {
                if session.state == state {
                    false
                } else {
                    session.state = state;
                    true
                }
            });
            return Err(LoginError::Storage(format!("{:#}", e)));
        }

        let identity = Identity {
            email: email.to_string(),
        };
        self.session
            .send_replace(Session::resolved(SessionState::Authenticated(identity.clone())));

        info!("Login successful");
        Ok(identity)
    }

    /// End the session locally; no network call.
    ///
    /// The session always becomes `Anonymous`. An error means the stored
    /// credential could not be removed: a revocable store withholds it for
    /// the rest of the process, but it may come back after a restart.
    pub fn logout(&self) -> anyhow::Result<()> {
        self.restore();

        let cleared = self.store.clear();
        self.session
            .send_replace(Session::resolved(SessionState::Anonymous));

        match cleared {
            Ok(()) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Logged out, but the stored credential could not be removed");
                Err(e)
            }
        }
    }

    /// Drop a credential the backend no longer accepts.
    ///
    /// Returns false (and changes nothing) unless the session was
    /// authenticated.
    pub fn expire(&self) -> bool {
        if !self.is_authenticated() {
            return false;
        }

        if let Err(e) = self.store.clear() {
            error!(error = %e, "Failed to clear expired credential");
        }
        self.session
            .send_replace(Session::resolved(SessionState::Anonymous));
        warn!("Session expired, credential cleared");
        true
    }

    fn stored_state(&self) -> SessionState {
        match self.store.load() {
            Some(credential) => {
                debug!(subject = %credential.subject, "Found stored credential");
                SessionState::Authenticated(Identity {
                    email: credential.subject,
                })
            }
            None => {
                debug!("No stored credential");
                SessionState::Anonymous
            }
        }
    }
}
