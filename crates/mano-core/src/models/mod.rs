//! Wire and view models for the Mano backend.
//!
//! - `TokenResponse`: the `/token` login payload
//! - `QueryRequest`, `QueryResponse`, `FormattedContent`: the free-text
//!   query exchange
//! - `DashboardMetrics`, `MetricsSnapshot`: the overview panel figures

pub mod metrics;
pub mod query;
pub mod token;

pub use metrics::{DashboardMetrics, MetricsSnapshot};
pub use query::{FormattedContent, QueryRequest, QueryResponse};
pub use token::TokenResponse;
