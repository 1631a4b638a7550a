//! Identifiers for units of work flowing through a throttle.

use serde::{Deserialize, Serialize};

/// Unique identifier minted by the throttle for one admitted unit of work.
///
/// UUID v4 rather than the caller's request id: request ids are client supplied and may be
/// reused across distinct requests, a token is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkToken(uuid::Uuid);

impl WorkToken {
    pub(crate) fn mint() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Parse a token that a transport carried as text (e.g. in a header).
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl std::fmt::Display for WorkToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied metadata describing a unit of work.
///
/// Handed to observers and to the rejection factory. Never used for correlation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkDescriptor {
    /// Operation name, e.g. `"POST /predictions"`.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl WorkDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl std::fmt::Display for WorkDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.request_id {
            Some(id) => write!(f, "{} ({})", self.name, id),
            None => f.write_str(&self.name),
        }
    }
}
