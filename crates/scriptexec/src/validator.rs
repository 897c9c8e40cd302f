//! Static validator: a cheap textual screen run before a script ever reaches
//! the sandbox (spec §4.1).
//!
//! This is deliberately *not* a real Lua parser. It is a defense-in-depth
//! layer: the sandbox (§4.2) is the authoritative barrier, and this module
//! exists only to reject scripts that can't possibly succeed (no entry
//! point) or that advertise clear intent to bypass the sandbox, so callers
//! get a fast, specific diagnostic instead of waiting for the interpreter to
//! reject them. It never panics on malformed input.

use crate::types::{ErrorKind, ExecutionError};

/// Capability namespaces the sandbox strips (spec §4.2 step 2). Referencing
/// any of these as a bare identifier is treated as a direct bypass attempt.
const FORBIDDEN_IDENTIFIERS: &[&str] = &[
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

/// Obfuscated-access primitives: reaching the global table directly, or
/// inspecting it via raw getters / metatables, rather than naming a
/// capability identifier outright.
const FORBIDDEN_GLOBAL_ACCESS: &[&str] = &["rawget", "rawset", "getmetatable", "setmetatable"];

/// Validate `source` per spec §4.1.
///
/// Returns `Ok(())` iff the source contains a `function run(` entry
/// declaration (whitespace-tolerant) and none of the forbidden patterns
/// match. Checks forbidden patterns first: a script with both a missing
/// entry point and a dangerous construct is reported as
/// `DangerousConstruct`, since that is the more actionable diagnostic.
pub fn validate(source: &str) -> Result<(), ExecutionError> {
    if let Some(reason) = find_forbidden_pattern(source) {
        return Err(ExecutionError::new(
            ErrorKind::DangerousConstruct,
            format!("script references a stripped capability: {reason}"),
        ));
    }

    if !has_run_entry(source) {
        return Err(ExecutionError::new(
            ErrorKind::MissingEntry,
            "script does not declare a `function run(ctx)` entry point",
        ));
    }

    Ok(())
}

/// Detect `function run(` allowing arbitrary whitespace (including
/// newlines) between `function`, `run`, and `(`.
fn has_run_entry(source: &str) -> bool {
    let bytes = source.as_bytes();
    let mut i = 0;
    while let Some(offset) = find_word(source, "function", i) {
        let mut j = offset + "function".len();
        j = skip_ws(bytes, j);
        if source[j..].starts_with("run") {
            let after_run = j + 3;
            // "run" must end at a word boundary (not "runner(").
            if after_run < bytes.len() && is_ident_byte(bytes[after_run]) {
                i = offset + 1;
                continue;
            }
            let k = skip_ws(bytes, after_run);
            if source[k..].starts_with('(') {
                return true;
            }
        }
        i = offset + 1;
    }
    false
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find the next occurrence of `word` in `source` at or after byte offset
/// `from`, such that it is not part of a larger identifier (word-boundary
/// match on both sides).
fn find_word(source: &str, word: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut start = from;
    while start <= source.len().saturating_sub(word.len()) {
        match source[start..].find(word) {
            None => return None,
            Some(rel) => {
                let pos = start + rel;
                let before_ok = pos == 0 || !is_ident_byte(bytes[pos - 1]);
                let after = pos + word.len();
                let after_ok = after >= bytes.len() || !is_ident_byte(bytes[after]);
                if before_ok && after_ok {
                    return Some(pos);
                }
                start = pos + 1;
            }
        }
    }
    None
}

fn contains_word(source: &str, word: &str) -> bool {
    find_word(source, word, 0).is_some()
}

/// Returns a human-readable description of the first forbidden pattern
/// found, or `None` if the source is clean.
fn find_forbidden_pattern(source: &str) -> Option<String> {
    for name in FORBIDDEN_IDENTIFIERS {
        if contains_word(source, name) {
            return Some(format!("reference to `{name}`"));
        }
    }
    for name in FORBIDDEN_GLOBAL_ACCESS {
        if contains_word(source, name) {
            return Some(format!("use of `{name}`"));
        }
    }
    if contains_word(source, "_G") || contains_word(source, "_ENV") {
        return Some("indexing of the global table (`_G`/`_ENV`)".to_string());
    }
    if let Some(word) = find_fragmented_identifier(source) {
        return Some(format!(
            "string-concatenation pattern that can reassemble `{word}`"
        ));
    }
    None
}

/// Detects `"prefix" .. "suffix"` patterns that reassemble one of the
/// forbidden identifiers, e.g. `"o" .. "s"` building `"os"`. This catches
/// the simplest obfuscation without needing a real lexer: for every split
/// point of the word, look for its two quoted halves joined by `..` with
/// only whitespace/comments in between.
fn find_fragmented_identifier(source: &str) -> Option<&'static str> {
    let candidates = FORBIDDEN_IDENTIFIERS
        .iter()
        .chain(FORBIDDEN_GLOBAL_ACCESS.iter());
    for word in candidates {
        if word.len() < 2 {
            continue;
        }
        for split in 1..word.len() {
            let (prefix, suffix) = word.split_at(split);
            let needle_prefix = format!("\"{prefix}\"");
            let needle_suffix = format!("\"{suffix}\"");
            if let Some(p_pos) = source.find(&needle_prefix) {
                let after_prefix = p_pos + needle_prefix.len();
                let tail = &source[after_prefix..];
                let trimmed = tail.trim_start();
                if let Some(rest) = trimmed.strip_prefix("..") {
                    if rest.trim_start().starts_with(&needle_suffix) {
                        return Some(word);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_with_simple_entry() {
        assert!(validate("function run(c) return c end").is_ok());
    }

    #[test]
    fn test_ok_with_whitespace_variation() {
        assert!(validate("function   run (c)\n  return c\nend").is_ok());
    }

    #[test]
    fn test_missing_entry() {
        let err = validate("function other(c) return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEntry);
    }

    #[test]
    fn test_missing_entry_on_unparseable_garbage() {
        let err = validate("this is not lua at all {{{").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEntry);
    }

    #[test]
    fn test_dangerous_os_execute() {
        let err = validate("function run(c) os.execute('x') return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_dangerous_io_open() {
        let err = validate("function run(c) io.open('/etc/passwd') return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_dangerous_require() {
        let err = validate("function run(c) require('socket') return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_dangerous_global_table_index_string() {
        let err = validate("function run(c) local x = _G['os'] return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_dangerous_global_table_index_dot() {
        let err = validate("function run(c) local x = _G.os return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_dangerous_rawget() {
        let err = validate("function run(c) local x = rawget(_G, 'os') return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_dangerous_getmetatable() {
        let err = validate("function run(c) getmetatable(_G) return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_dangerous_fragmented_identifier() {
        let err = validate("function run(c) local n = \"o\" .. \"s\" return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_benign_string_concatenation_is_allowed() {
        assert!(validate("function run(c) local s = 'a' .. 'b' return c end").is_ok());
    }

    #[test]
    fn test_identifier_boundary_does_not_false_positive() {
        // "loader" and "iostream" should not trigger on "load"/"io".
        assert!(validate("function run(c) local loader = 1; local iostream = 2 return c end").is_ok());
    }

    #[test]
    fn test_entry_name_boundary_does_not_match_runner() {
        let err = validate("function runner(c) return c end").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEntry);
    }

    #[test]
    fn test_dangerous_takes_priority_over_missing_entry() {
        let err = validate("os.execute('x')").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DangerousConstruct);
    }

    #[test]
    fn test_validate_is_pure_and_idempotent() {
        let source = "function run(c) return c end";
        assert_eq!(validate(source), validate(source));
    }

    #[test]
    fn test_empty_source_is_missing_entry() {
        let err = validate("").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEntry);
    }
}
