//! Location descriptor codec.
//!
//! Backends whose delete call needs state that cannot be recovered from the
//! public URL (a provider deletion token, an object key) historically returned
//! a single string `"{url}@@@{token}"`. Uploaders now return the two fields
//! separately and they are persisted in separate columns; this codec remains
//! for callers that still exchange the compound form and for rows written
//! before the split.

use serde::{Deserialize, Serialize};

/// Separator between the URL and the delete identifier. Not expected to occur in URLs.
pub const DESCRIPTOR_SEPARATOR: &str = "@@@";

/// Where an uploaded object can be reached and how to delete it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDescriptor {
    pub url: String,
    pub delete_identifier: Option<String>,
}

impl LocationDescriptor {
    pub fn new(url: impl Into<String>, delete_identifier: Option<String>) -> Self {
        Self {
            url: url.into(),
            delete_identifier: delete_identifier.filter(|id| !id.is_empty()),
        }
    }

    /// Encode as `url@@@token`, or just `url` when there is no token.
    pub fn encode(&self) -> String {
        match self.delete_identifier.as_deref() {
            Some(token) if !token.is_empty() => {
                format!("{}{}{}", self.url, DESCRIPTOR_SEPARATOR, token)
            }
            _ => self.url.clone(),
        }
    }

    /// Split a compound descriptor. Anything without exactly one separator is a bare URL.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(DESCRIPTOR_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(url), Some(token), None) => Self::new(url, Some(token.to_string())),
            _ => Self::new(raw, None),
        }
    }
}
