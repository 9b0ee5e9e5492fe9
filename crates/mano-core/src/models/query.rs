use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::strip_html;

/// Request body of `POST /api/query`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest<'a> {
    pub query: &'a str,
}

/// Response body of `POST /api/query`.
///
/// A semantic failure carries `error`; a success carries `formatted`.
/// Anything else the server sends is kept in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub formatted: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server-rendered HTML fragment for a successful query.
///
/// The fragment is not sanitized. Front-ends either render
/// [`plain_text`](Self::plain_text) or opt in to the raw markup through
/// [`untrusted_html`](Self::untrusted_html) and sanitize it themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FormattedContent(String);

impl FormattedContent {
    pub fn new(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    /// The fragment exactly as the server sent it.
    pub fn untrusted_html(&self) -> &str {
        &self.0
    }

    /// The fragment with markup removed, safe to print anywhere.
    pub fn plain_text(&self) -> String {
        strip_html(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}
