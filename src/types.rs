use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque payload carried by a work unit.
///
/// The scheduler never interprets the value; it only encodes it for the
/// durable queue and hands it back to the attempt action. Mappings are
/// kept in a `BTreeMap` so that equal values always encode identically,
/// which is what gives a value its identity in the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkValue {
    Integer(i64),
    Text(String),
    Sequence(Vec<WorkValue>),
    Mapping(BTreeMap<String, WorkValue>),
}

impl WorkValue {
    /// Borrow the text content, if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WorkValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Return the integer content, if this is an `Integer` value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            WorkValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<i64> for WorkValue {
    fn from(value: i64) -> Self {
        WorkValue::Integer(value)
    }
}

impl From<i32> for WorkValue {
    fn from(value: i32) -> Self {
        WorkValue::Integer(value.into())
    }
}

impl From<&str> for WorkValue {
    fn from(value: &str) -> Self {
        WorkValue::Text(value.to_string())
    }
}

impl From<String> for WorkValue {
    fn from(value: String) -> Self {
        WorkValue::Text(value)
    }
}

impl From<Vec<WorkValue>> for WorkValue {
    fn from(values: Vec<WorkValue>) -> Self {
        WorkValue::Sequence(values)
    }
}

impl From<BTreeMap<String, WorkValue>> for WorkValue {
    fn from(map: BTreeMap<String, WorkValue>) -> Self {
        WorkValue::Mapping(map)
    }
}

/// A value plus the epoch millisecond at which it becomes eligible for
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub value: WorkValue,

    /// Epoch milliseconds; this is the score in the durable queue.
    pub scheduled_time: i64,
}

impl WorkUnit {
    pub fn new(value: impl Into<WorkValue>, scheduled_time: i64) -> Self {
        Self {
            value: value.into(),
            scheduled_time,
        }
    }
}
