// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Buffered Records
//!
//! The journal stores any serde type that can yield an integer id. The id is
//! the only field the journal looks at; the rest is opaque payload once
//! encoded.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value the journal can buffer and later replay.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Identifier matched against commit markers during replay.
    fn id(&self) -> i64;
}

/// Field value of an [`Entry`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// General-purpose record: an id plus arbitrarily keyed fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub fields: BTreeMap<String, Value>,
}

impl Entry {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl Record for Entry {
    fn id(&self) -> i64 {
        self.id
    }
}
