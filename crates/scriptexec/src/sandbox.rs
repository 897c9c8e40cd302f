//! Sandbox builder: constructs a fresh, capability-stripped Lua interpreter
//! per invocation and installs the host-callback tool surface (spec §4.2).
//!
//! Grounded on the teacher's `vm::build_interpreter` / `vm::install_*`
//! pattern: one function builds a bare interpreter, a second installs hooks
//! on top of it, both called fresh for every execution — no interpreter is
//! ever reused across calls (spec §3 Lifecycle).

use std::sync::Arc;

use mlua::{Lua, Value as LuaValue};

use crate::tool::{self, HostConfig};
use crate::types::{ErrorKind, ExecutionError};

/// Capability globals stripped by setting them to `nil` (spec §4.2 step 2).
/// Clearing a name that doesn't exist is not an error — only a name that
/// exists and then fails to clear would be.
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

/// Build a fresh sandboxed Lua state: a bare interpreter with dangerous
/// globals stripped and `http`/`json` tool tables installed.
pub fn build(config: Arc<HostConfig>) -> Result<Lua, ExecutionError> {
    let lua = Lua::new();

    strip_globals(&lua)?;
    install_tools(&lua, config)?;

    Ok(lua)
}

fn strip_globals(lua: &Lua) -> Result<(), ExecutionError> {
    let globals = lua.globals();
    for name in STRIPPED_GLOBALS {
        globals.set(*name, LuaValue::Nil).map_err(|e| {
            ExecutionError::new(
                ErrorKind::SandboxBuildFailed,
                format!("failed to clear global `{name}`: {e}"),
            )
        })?;
    }
    Ok(())
}

/// Install the `http` and `json` callback tables (spec §4.2 step 3).
fn install_tools(lua: &Lua, config: Arc<HostConfig>) -> Result<(), ExecutionError> {
    let build_err = |what: &str, e: mlua::Error| {
        ExecutionError::new(
            ErrorKind::SandboxBuildFailed,
            format!("failed to install {what}: {e}"),
        )
    };

    let http_table = lua.create_table().map_err(|e| build_err("http table", e))?;

    let get_config = Arc::clone(&config);
    let http_get = lua
        .create_function(move |_, url: String| Ok(tool::http_get(&get_config, &url)))
        .map_err(|e| build_err("http.get", e))?;
    http_table
        .set("get", http_get)
        .map_err(|e| build_err("http.get", e))?;

    let post_config = Arc::clone(&config);
    let http_post = lua
        .create_function(
            move |lua, (url, opts): (String, Option<mlua::Table>)| {
                let headers = opts
                    .as_ref()
                    .and_then(|o| o.get::<_, Option<mlua::Table>>("headers").ok().flatten());
                let body = opts
                    .as_ref()
                    .and_then(|o| o.get::<_, Option<String>>("body").ok().flatten());
                let headers = headers.map(|t| table_to_string_map(lua, &t)).transpose()?;
                Ok(tool::http_post(&post_config, &url, headers, body))
            },
        )
        .map_err(|e| build_err("http.post", e))?;
    http_table
        .set("post", http_post)
        .map_err(|e| build_err("http.post", e))?;

    lua.globals()
        .set("http", http_table)
        .map_err(|e| build_err("http table", e))?;

    let json_table = lua.create_table().map_err(|e| build_err("json table", e))?;

    let essential = Arc::clone(&config);
    let json_decode = lua
        .create_function(move |lua, s: String| {
            let decoded = tool::json_decode(&essential, &s);
            crate::marshal::to_interp_result(lua, decoded)
        })
        .map_err(|e| build_err("json.decode", e))?;
    json_table
        .set("decode", json_decode)
        .map_err(|e| build_err("json.decode", e))?;

    let json_encode = lua
        .create_function(move |lua, v: LuaValue| {
            // json.encode never throws (spec §4.4): a value this marshaller
            // can't represent (a function, userdata, ...) surfaces as a
            // `JSON encode error:` string, the same as any other encode
            // failure, rather than as an executor-level ConvertFailed.
            match crate::marshal::from_interp(lua, v) {
                Ok(host_value) => Ok(tool::json_encode(&host_value)),
                Err(e) => Ok(format!("JSON encode error: {}", e.message)),
            }
        })
        .map_err(|e| build_err("json.encode", e))?;
    json_table
        .set("encode", json_encode)
        .map_err(|e| build_err("json.encode", e))?;

    lua.globals()
        .set("json", json_table)
        .map_err(|e| build_err("json table", e))?;

    Ok(())
}

/// Convert a plain Lua table of string→string pairs (HTTP headers) into a
/// host-side `Vec<(String, String)>`.
fn table_to_string_map(
    _lua: &Lua,
    table: &mlua::Table,
) -> mlua::Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for pair in table.clone().pairs::<String, String>() {
        let (k, v) = pair?;
        out.push((k, v));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<HostConfig> {
        Arc::new(HostConfig::default())
    }

    #[test]
    fn test_build_succeeds() {
        assert!(build(test_config()).is_ok());
    }

    #[test]
    fn test_stripped_globals_are_nil() {
        let lua = build(test_config()).unwrap();
        for name in STRIPPED_GLOBALS {
            let v: LuaValue = lua.globals().get(*name).unwrap();
            assert!(matches!(v, LuaValue::Nil), "expected {name} to be nil");
        }
    }

    #[test]
    fn test_http_and_json_tables_installed() {
        let lua = build(test_config()).unwrap();
        let http: LuaValue = lua.globals().get("http").unwrap();
        assert!(matches!(http, LuaValue::Table(_)));
        let json: LuaValue = lua.globals().get("json").unwrap();
        assert!(matches!(json, LuaValue::Table(_)));
    }

    #[test]
    fn test_computation_facilities_left_intact() {
        let lua = build(test_config()).unwrap();
        let result: i64 = lua.load("return 1 + 2").eval().unwrap();
        assert_eq!(result, 3);
    }

    #[test]
    fn test_json_encode_decode_round_trip() {
        let lua = build(test_config()).unwrap();
        let ok: bool = lua
            .load(
                r#"
                local encoded = json.encode({1, 2, 3})
                local decoded = json.decode(encoded)
                return decoded[1] == 1 and decoded[2] == 2 and decoded[3] == 3
                "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
    }
}
