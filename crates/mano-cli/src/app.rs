//! Command dispatch and service wiring for the Mano CLI.
//!
//! `App` owns one instance of each core service: the configuration, the
//! transport, the session manager and the query controller. Commands only
//! call into those services and print the view-models they publish.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use mano_core::models::MetricsSnapshot;
use mano_core::utils::truncate_string;
use mano_core::{
    ApiClient, ApiError, Config, QueryController, QueryResult, SessionManager, SessionState,
    Submission,
};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable supplying the login email
const EMAIL_ENV: &str = "MANO_EMAIL";

/// Environment variable supplying the login password
const PASSWORD_ENV: &str = "MANO_PASSWORD";

/// Prompt shown by the interactive query shell
const SHELL_PROMPT: &str = "mano> ";

/// Maximum width for echoing a query back in status lines
const MAX_ECHO_LENGTH: usize = 60;

pub const USAGE: &str = "\
Usage: mano <command>

Commands:
  login [email]    Log in (prompts for anything not given or set in the environment)
  logout           Clear the stored session
  status           Show who is logged in
  metrics          Fetch the dashboard overview metrics
  query <text...>  Run one free-text query
  shell            Interactive query shell (:metrics, :status, :quit)
  help             Show this message

Environment:
  MANO_API_URL     Backend address (default http://localhost:8000)
  MANO_EMAIL       Login email
  MANO_PASSWORD    Login password
  RUST_LOG         Log filter (default warn)";

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login(Option<String>),
    Logout,
    Status,
    Metrics,
    Query(String),
    Shell,
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Help);
        };

        match name.as_str() {
            "login" => Ok(Command::Login(rest.first().cloned())),
            "logout" => Ok(Command::Logout),
            "status" => Ok(Command::Status),
            "metrics" => Ok(Command::Metrics),
            "query" => {
                let text = rest.join(" ");
                if text.trim().is_empty() {
                    anyhow::bail!("query needs some text, e.g. mano query \"top 10 startups by score\"");
                }
                Ok(Command::Query(text))
            }
            "shell" => Ok(Command::Shell),
            "help" | "-h" | "--help" => Ok(Command::Help),
            other => anyhow::bail!("Unknown command '{}'. Run `mano help` for usage.", other),
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Terminal rendering of a settled query. Server HTML is never printed raw.
pub fn render_result(result: &QueryResult) -> String {
    match result {
        QueryResult::Success(content) if content.is_empty() => "(no results)".to_string(),
        QueryResult::Success(content) => content.plain_text(),
        QueryResult::Failure(message) => format!("Error: {}", message),
    }
}

pub fn render_metrics(snapshot: &MetricsSnapshot) -> String {
    let m = &snapshot.metrics;
    let mut lines = vec![
        format!("Active deals:       {}", m.active_deals),
        format!("Pending reminders:  {}", m.pending_reminders),
        format!("New this week:      {}", m.new_this_week),
    ];
    if !m.pipeline_data.is_empty() {
        let stages: Vec<String> = m.pipeline_data.iter().map(u64::to_string).collect();
        lines.push(format!(
            "Pipeline:           {} (total {})",
            stages.join(" / "),
            m.pipeline_total()
        ));
    }
    for (key, value) in &m.extra {
        lines.push(format!("{:<20}{}", format!("{}:", key), value));
    }
    lines.push(format!("Fetched {}", snapshot.age_display()));
    lines.join("\n")
}

pub fn render_session(state: &SessionState) -> String {
    match state {
        SessionState::Unresolved => "Session not resolved".to_string(),
        SessionState::Anonymous => "Not logged in".to_string(),
        SessionState::Authenticated(identity) => format!("Logged in as {}", identity.email),
    }
}

// ============================================================================
// Main Application Struct
// ============================================================================

pub struct App {
    pub config: Config,
    pub api: Arc<ApiClient>,
    pub session: SessionManager,
    pub queries: QueryController,
}

impl App {
    /// Wire the core services and resolve the stored session.
    pub fn new(config: Config) -> Result<Self> {
        let store = config.credential_store();
        let api = Arc::new(
            ApiClient::from_config(&config, store.clone()).context("Failed to build HTTP client")?,
        );

        let session = SessionManager::new(store, api.clone());
        let queries = QueryController::with_timeout(api.clone(), config.query_timeout());

        let restored = session.restore();
        debug!(authenticated = restored.is_authenticated(), "Session restored");

        Ok(Self {
            config,
            api,
            session,
            queries,
        })
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Login(email) => self.login(email).await,
            Command::Logout => {
                let cleared = self.session.logout();
                println!("Logged out");
                cleared.context("The stored credential could not be removed and may be restored on next start")
            }
            Command::Status => {
                println!("{}", render_session(&self.session.session().state));
                println!("Backend: {}", self.api.base_url());
                Ok(())
            }
            Command::Metrics => self.metrics().await,
            Command::Query(text) => self.query(&text).await,
            Command::Shell => self.shell().await,
            Command::Help => {
                println!("{}", USAGE);
                Ok(())
            }
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email.or_else(|| std::env::var(EMAIL_ENV).ok()) {
            Some(email) => email,
            None => self.prompt_email()?,
        };
        let password = match std::env::var(PASSWORD_ENV) {
            Ok(password) => password,
            Err(_) => rpassword::prompt_password("Password: ")?,
        };

        match self.session.login(&email, &password).await {
            Ok(identity) => {
                self.config.last_email = Some(identity.email.clone());
                if let Err(e) = self.config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                println!("Logged in as {}", identity.email);
                Ok(())
            }
            Err(e) => {
                let message = e.user_message();
                Err(anyhow::Error::new(e).context(message))
            }
        }
    }

    fn prompt_email(&self) -> Result<String> {
        match &self.config.last_email {
            Some(last) => print!("Email [{}]: ", last),
            None => print!("Email: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        Ok(match (&self.config.last_email, input.is_empty()) {
            (Some(last), true) => last.clone(),
            _ => input.to_string(),
        })
    }

    /// Expire the session when the backend refused the stored token.
    fn handle_api_error(&self, error: &ApiError) {
        if error.is_unauthorized() && self.session.expire() {
            eprintln!("Session expired. Run `mano login` to sign in again.");
        }
    }

    // =========================================================================
    // Metrics / Queries
    // =========================================================================

    async fn metrics(&self) -> Result<()> {
        match self.api.fetch_metrics_snapshot().await {
            Ok(snapshot) => {
                println!("{}", render_metrics(&snapshot));
                Ok(())
            }
            Err(e) => {
                self.handle_api_error(&e);
                Err(anyhow::Error::new(e).context("Failed to fetch dashboard metrics"))
            }
        }
    }

    async fn query(&self, text: &str) -> Result<()> {
        if !self.session.is_authenticated() {
            eprintln!("Not logged in; sending the query without credentials.");
        }
        info!(query = %truncate_string(text.trim(), MAX_ECHO_LENGTH), "Running query");

        match self.queries.submit(text).await {
            Submission::Settled(result) => {
                if let Some(cause) = self.queries.take_last_error() {
                    self.handle_api_error(&cause);
                }
                match result {
                    QueryResult::Success(_) => {
                        println!("{}", render_result(&result));
                        Ok(())
                    }
                    QueryResult::Failure(message) => Err(anyhow::anyhow!(message)),
                }
            }
            Submission::Rejected(e) => Err(e.into()),
            Submission::Superseded => Ok(()),
        }
    }

    async fn shell(&self) -> Result<()> {
        println!("{}", render_session(&self.session.session().state));
        println!("Type a question, or :metrics, :status, :quit");

        let stdin = io::stdin();
        loop {
            print!("{}", SHELL_PROMPT);
            io::stdout().flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break; // EOF
            }

            match line.trim() {
                "" => continue,
                ":quit" | ":q" | ":exit" => break,
                ":status" => println!("{}", render_session(&self.session.session().state)),
                ":metrics" => {
                    if let Err(e) = self.metrics().await {
                        eprintln!("{:#}", e);
                    }
                }
                text => {
                    println!("Running: {}", truncate_string(text, MAX_ECHO_LENGTH));
                    if let Err(e) = self.query(text).await {
                        eprintln!("{}", render_result(&QueryResult::Failure(format!("{:#}", e))));
                    }
                }
            }
        }

        Ok(())
    }
}
