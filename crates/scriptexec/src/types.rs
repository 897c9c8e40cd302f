//! Foundational public types for the scriptexec library.
//!
//! This module defines the core data structures used throughout the library:
//! - [`Value`] — the recursive host-side "bag" passed into and out of scripts
//! - [`ExecutionOptions`] — per-call timeout/memory configuration
//! - [`ExecutionError`] / [`ErrorKind`] — the structured, serializable error
//!   surface returned by [`crate::execute`] and [`crate::validate`]

use serde::{Deserialize, Serialize};

/// A key in a [`Value::Map`]: either a string or an integer, mirroring the
/// two key types Lua tables actually use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl Key {
    /// Render the key as it should appear once stringified for the host
    /// (§4.3.2: "otherwise keys are stringified").
    pub fn to_host_string(&self) -> String {
        match self {
            Key::Str(s) => s.clone(),
            Key::Int(i) => i.to_string(),
        }
    }
}

/// The recursive host-side "bag" value described by spec §3.
///
/// A `Vec` of pairs (not a `HashMap`) backs [`Value::Map`]: mapping-key order
/// is not semantically significant, but deterministic iteration makes golden
/// round-trip tests reproducible, and scripts are short enough that linear
/// lookup cost during marshalling is immaterial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Value>),
    Map(Vec<(Key, Value)>),
}

impl Value {
    /// Convenience constructor for an empty mapping, used by tests and by
    /// the CLI when no `--context` is supplied.
    pub fn empty_map() -> Self {
        Value::Map(Vec::new())
    }

    /// Look up a string key in a `Map` value. Returns `None` for any other
    /// variant or a missing key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find_map(|(k, v)| match k {
                Key::Str(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }
}

/// Configuration that governs a single `execute()` call (spec §6 `opts`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Wall-clock ceiling in milliseconds. Default: 30,000 (spec §4.5).
    pub timeout_ms: u64,
    /// Resident-memory ceiling in bytes. Default: 10,000,000 (spec §4.5).
    pub memory_bytes: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            memory_bytes: 10_000_000,
        }
    }
}

/// The stable error-kind discriminant, exactly the values enumerated in
/// spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingEntry,
    DangerousConstruct,
    LoadFailed,
    MarshalFailed,
    RuntimeError,
    Timeout,
    MemoryExceeded,
    ConvertFailed,
    SandboxBuildFailed,
}

/// The error shape returned by [`crate::execute`] / [`crate::validate`]:
/// `Err({kind, message})` per spec §6, flattened into one struct rather than
/// a per-variant payload enum because spec.md's own interface description
/// gives every kind the identical two-field shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ExecutionError {}
