//! Sandbox tightness: every dangerous global stripped by the sandbox
//! builder must observe as nil, not an accessible facility.
//!
//! Run with: `cargo test -p scriptexec --test sandbox_tightness`

use std::sync::Arc;

use scriptexec::{execute, ErrorKind, ExecutionOptions, HostConfig, Value};

const STRIPPED_GLOBALS: &[&str] = &[
    "os",
    "io",
    "require",
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "getfenv",
    "setfenv",
    "debug",
];

/// Every name the sandbox builder is documented to strip must resolve to
/// `nil` on a freshly built interpreter (spec §8 "Sandbox tightness").
#[test]
fn test_every_stripped_global_is_nil_on_a_fresh_sandbox() {
    let config = Arc::new(HostConfig::default());
    let lua = scriptexec::sandbox::build(config).expect("sandbox build should succeed");
    for name in STRIPPED_GLOBALS {
        let value: mlua::Value = lua.globals().get(*name).expect("globals().get should not error");
        assert!(matches!(value, mlua::Value::Nil), "{name} should be nil in a fresh sandbox");
    }
}

/// Because every stripped global is also a forbidden identifier, scripts
/// referencing them by name are rejected by the validator before the
/// sandbox is even built — the validator and the sandbox enforce the same
/// boundary from two different layers (spec §9 "Validator vs. sandbox").
#[test]
fn test_execute_rejects_scripts_that_reference_stripped_globals() {
    for name in STRIPPED_GLOBALS {
        let source = format!("function run(c) return {name} end");
        let result = execute(&source, Value::empty_map(), ExecutionOptions::default());
        let err = result.unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::DangerousConstruct,
            "expected {name} to be rejected by the validator"
        );
    }
}

/// Computational facilities that aren't part of the stripped capability
/// list remain usable inside the sandbox.
#[test]
fn test_non_capability_globals_remain_usable() {
    let result = execute(
        "function run(c) return string.upper('ok') .. tostring(#({1,2,3})) end",
        Value::empty_map(),
        ExecutionOptions::default(),
    );
    assert_eq!(result, Ok(Value::Str("OK3".to_string())));
}
