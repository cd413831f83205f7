/// Shared types used across the codebase

use serde::{Deserialize, Serialize};

/// An untyped row: column name to value. The shape is whatever the target table defines.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Identity of the caller of an operation, when one is known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub email: String,
    pub superuser: bool,
}

impl Caller {
    pub fn new(email: impl Into<String>, superuser: bool) -> Self {
        Self { email: email.into(), superuser }
    }

    /// Anonymous callers are never privileged
    pub fn is_privileged(caller: Option<&Caller>) -> bool {
        caller.map(|c| c.superuser).unwrap_or(false)
    }
}
