//! Value marshaller: bidirectional conversion between the host [`Value`] bag
//! and live Lua values inside a sandboxed interpreter (spec §4.3).
//!
//! Grounded on the teacher's `vm::extract_return_value` / JSON-bridging
//! helpers for the general shape of "walk a dynamic value, build the other
//! side's representation" — the walk itself is new, since the teacher never
//! had a host-side `Value` bag to marshal (it shuttled Python objects through
//! string serialization instead).

use std::collections::HashSet;

use mlua::{Lua, Table, Value as LuaValue};

use crate::types::{ErrorKind, ExecutionError, Key, Value};

/// Convert a host [`Value`] into a Lua value inside `lua`.
///
/// Sequences become 1-based integer-keyed tables; mappings become tables
/// populated via `Table::set` directly (so keys with special characters are
/// preserved unconditionally — no literal-source generation is involved,
/// which is what spec §4.3.1's "unquoted vs bracketed" key-emission concern
/// was guarding against).
pub fn to_interp(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Int(i) => Ok(LuaValue::Integer(*i)),
        Value::Float(f) => Ok(LuaValue::Number(*f)),
        Value::Str(s) => lua.create_string(s).map(LuaValue::String),
        Value::Seq(items) => {
            let table = lua.create_table()?;
            for (idx, item) in items.iter().enumerate() {
                table.set((idx + 1) as i64, to_interp(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Map(pairs) => {
            let table = lua.create_table()?;
            for (key, val) in pairs {
                let lua_val = to_interp(lua, val)?;
                match key {
                    Key::Str(s) => table.set(s.as_str(), lua_val)?,
                    Key::Int(i) => table.set(*i, lua_val)?,
                }
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// `to_interp`, but returning an `mlua::Result<LuaValue>` directly — used by
/// tool callbacks (e.g. `json.decode`) that already hold a `Lua` reference
/// and need to hand the result straight back to the interpreter.
pub fn to_interp_result(lua: &Lua, value: Value) -> mlua::Result<LuaValue> {
    to_interp(lua, &value)
}

/// Convert a live Lua value back into a host [`Value`] (spec §4.3.2).
///
/// Detects table cycles via `Table::to_pointer()` identity: a table visited
/// a second time along the same walk is replaced with
/// `{"__circular_ref": <id>}` rather than recursing forever.
///
/// Returns `Err(ConvertFailed)` if `value`, or anything nested inside it,
/// is a function, userdata, thread, or light userdata — none of those have
/// a host-side representation, and spec §7 classifies "entry returned a
/// non-marshallable value" as a marshal failure rather than something to
/// paper over as `Null`.
pub fn from_interp(lua: &Lua, value: LuaValue) -> Result<Value, ExecutionError> {
    let mut visiting = HashSet::new();
    from_interp_inner(lua, &value, &mut visiting)
}

fn non_marshallable(what: &str) -> ExecutionError {
    ExecutionError::new(
        ErrorKind::ConvertFailed,
        format!("entry returned a non-marshallable value ({what})"),
    )
}

fn from_interp_inner(
    lua: &Lua,
    value: &LuaValue,
    visiting: &mut HashSet<usize>,
) -> Result<Value, ExecutionError> {
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(*b)),
        LuaValue::Integer(i) => Ok(Value::Int(*i)),
        LuaValue::Number(n) => Ok(Value::Float(*n)),
        LuaValue::String(s) => Ok(Value::Str(s.to_str().unwrap_or_default().to_string())),
        LuaValue::Table(t) => from_table(lua, t, visiting),
        LuaValue::Function(_) => Err(non_marshallable("function")),
        LuaValue::Thread(_) => Err(non_marshallable("thread")),
        LuaValue::UserData(_) => Err(non_marshallable("userdata")),
        LuaValue::LightUserData(_) => Err(non_marshallable("light userdata")),
        _ => Err(non_marshallable("unsupported value")),
    }
}

fn from_table(
    lua: &Lua,
    table: &Table,
    visiting: &mut HashSet<usize>,
) -> Result<Value, ExecutionError> {
    let ptr = table.to_pointer() as usize;
    if visiting.contains(&ptr) {
        return Ok(Value::Map(vec![(
            Key::Str("__circular_ref".to_string()),
            Value::Int(ptr as i64),
        )]));
    }
    visiting.insert(ptr);

    let result = (|| {
        if let Some(seq) = try_as_sequence(lua, table, visiting)? {
            return Ok(seq);
        }
        let mut pairs = Vec::new();
        for entry in table.clone().pairs::<LuaValue, LuaValue>() {
            let (k, v) = match entry {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let key = lua_key_to_host_string(&k);
            let val = from_interp_inner(lua, &v, visiting)?;
            pairs.push((Key::Str(key), val));
        }
        Ok(Value::Map(pairs))
    })();

    visiting.remove(&ptr);
    result
}

/// If `table`'s integer keys form a contiguous `1..=N` run with no other
/// keys, return `Some(Value::Seq)`; `None` if the keys don't form such a run
/// (spec §4.3.2: "1..N key-sequence promotion; gapped or non-integer keys
/// are emitted as a stringified mapping instead"). `Err` only propagates a
/// nested non-marshallable value.
fn try_as_sequence(
    lua: &Lua,
    table: &Table,
    visiting: &mut HashSet<usize>,
) -> Result<Option<Value>, ExecutionError> {
    let len = table.raw_len() as i64;
    if len == 0 {
        // An empty table is ambiguous between an empty sequence and an empty
        // mapping; only treat it as a sequence if it truly has no keys at
        // all (raw_len() == 0 and pairs() is empty covers the common case,
        // e.g. {}). If it holds any non-integer key, fall through to a map.
        if table.clone().pairs::<LuaValue, LuaValue>().next().is_some() {
            return Ok(None);
        }
        return Ok(Some(Value::Seq(Vec::new())));
    }

    let mut seen_keys = 0i64;
    for entry in table.clone().pairs::<LuaValue, LuaValue>() {
        let (k, _) = match entry {
            Ok(pair) => pair,
            Err(_) => return Ok(None),
        };
        match k {
            LuaValue::Integer(i) if i >= 1 && i <= len => seen_keys += 1,
            _ => return Ok(None),
        }
    }
    if seen_keys != len {
        return Ok(None);
    }

    let mut items = Vec::with_capacity(len as usize);
    for i in 1..=len {
        let v: LuaValue = match table.get(i) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        items.push(from_interp_inner(lua, &v, visiting)?);
    }
    Ok(Some(Value::Seq(items)))
}

fn lua_key_to_host_string(key: &LuaValue) -> String {
    match key {
        LuaValue::String(s) => s.to_str().unwrap_or_default().to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        _ => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_primitives() {
        let lua = Lua::new();
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::Float(1.5),
            Value::Str("hi".to_string()),
        ] {
            let lua_v = to_interp(&lua, &v).unwrap();
            let back = from_interp(&lua, lua_v).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn test_sequence_round_trip() {
        let lua = Lua::new();
        let v = Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let lua_v = to_interp(&lua, &v).unwrap();
        let back = from_interp(&lua, lua_v).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_empty_sequence_round_trip() {
        let lua = Lua::new();
        let v = Value::Seq(Vec::new());
        let lua_v = to_interp(&lua, &v).unwrap();
        let back = from_interp(&lua, lua_v).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_map_round_trip() {
        let lua = Lua::new();
        let v = Value::Map(vec![
            (Key::Str("name".to_string()), Value::Str("ash".to_string())),
            (Key::Str("level".to_string()), Value::Int(5)),
        ]);
        let lua_v = to_interp(&lua, &v).unwrap();
        let back = from_interp(&lua, lua_v).unwrap();
        match back {
            Value::Map(pairs) => {
                assert_eq!(pairs.len(), 2);
            }
            other => panic!("expected Map, got {other:?}"),
        }
    }

    #[test]
    fn test_gapped_integer_keys_become_map() {
        let lua = Lua::new();
        let table = lua.create_table().unwrap();
        table.set(1, "a").unwrap();
        table.set(3, "c").unwrap();
        let v = from_interp(&lua, LuaValue::Table(table)).unwrap();
        match v {
            Value::Map(pairs) => assert_eq!(pairs.len(), 2),
            other => panic!("expected Map for gapped keys, got {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_keys_become_stringified_map() {
        let lua = Lua::new();
        let table = lua.create_table().unwrap();
        table.set("x", 1).unwrap();
        table.set("y", 2).unwrap();
        let v = from_interp(&lua, LuaValue::Table(table)).unwrap();
        match v {
            Value::Map(pairs) => {
                assert!(pairs.iter().any(|(k, _)| k.to_host_string() == "x"));
                assert!(pairs.iter().any(|(k, _)| k.to_host_string() == "y"));
            }
            other => panic!("expected Map, got {other:?}"),
        }
    }

    #[test]
    fn test_circular_reference_yields_placeholder() {
        let lua = Lua::new();
        let table = lua.create_table().unwrap();
        table.set("self", table.clone()).unwrap();
        let v = from_interp(&lua, LuaValue::Table(table)).unwrap();
        match v {
            Value::Map(pairs) => {
                let (_, inner) = pairs.into_iter().next().expect("has self key");
                match inner {
                    Value::Map(ref p) => {
                        assert_eq!(p[0].0, Key::Str("__circular_ref".to_string()));
                    }
                    other => panic!("expected circular placeholder map, got {other:?}"),
                }
            }
            other => panic!("expected Map, got {other:?}"),
        }
    }

    #[test]
    fn test_nil_values_omitted_is_caller_responsibility() {
        // Lua's table.set(k, nil) removes the key outright, so a nil-valued
        // field never appears in pairs() in the first place (spec §4.3.2:
        // "scripts assigning nil to a context field remove it").
        let lua = Lua::new();
        let table = lua.create_table().unwrap();
        table.set("x", 1).unwrap();
        table.set("x", LuaValue::Nil).unwrap();
        let v = from_interp(&lua, LuaValue::Table(table)).unwrap();
        match v {
            Value::Seq(items) => assert!(items.is_empty()),
            Value::Map(pairs) => assert!(pairs.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_function_is_a_convert_failure() {
        let lua = Lua::new();
        let f = lua.create_function(|_, ()| Ok(())).unwrap();
        let err = from_interp(&lua, LuaValue::Function(f)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConvertFailed);
    }

    #[test]
    fn test_nested_function_is_a_convert_failure() {
        let lua = Lua::new();
        let table = lua.create_table().unwrap();
        let f = lua.create_function(|_, ()| Ok(())).unwrap();
        table.set("cb", f).unwrap();
        let err = from_interp(&lua, LuaValue::Table(table)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConvertFailed);
    }
}
