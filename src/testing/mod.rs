//! Fixtures shared by unit tests

use std::sync::Arc;

use serde_json::Value;

use crate::database::{MemoryStore, TableExecutor};
use crate::types::{Caller, Record};

/// Executor over a fresh in-memory store
pub fn memory_executor() -> TableExecutor {
    TableExecutor::new(Arc::new(MemoryStore::new()))
}

/// Rows from a JSON array of objects
pub fn records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => panic!("expected an object, got {}", other),
            })
            .collect(),
        other => panic!("expected an array, got {}", other),
    }
}

pub fn superuser() -> Caller {
    Caller::new("admin@example.com", true)
}

pub fn user() -> Caller {
    Caller::new("analyst@example.com", false)
}
