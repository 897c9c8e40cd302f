//! Execute agent-generated Lua source through the sandboxed interpreter.
//!
//! This module is the top-level orchestrator for a single invocation (spec
//! §4.6):
//! 1. Runs [`crate::validator::validate`] against the raw source.
//! 2. Builds a fresh sandbox via [`crate::sandbox::build`].
//! 3. Loads the script, reusing cached bytecode when the source has been
//!    seen before, and falling back to a full parse on a cache miss or a
//!    dump/load failure.
//! 4. Marshals `context` into the sandbox and calls `run(context)` on a
//!    dedicated worker thread bounded by [`crate::governor::run_bounded`].
//! 5. Marshals the Lua return value back into a host [`Value`].
//!
//! ## Thread safety
//!
//! Each call to [`execute`] is fully independent: it builds a brand-new
//! `Lua` instance and spawns its own worker thread. The cache singleton is
//! internally synchronized. The function is safe to call from many threads
//! simultaneously, and no state survives from one call to the next (spec §3
//! Lifecycle).

use mlua::Lua;

use crate::cache::{cache_key, BytecodeCache};
use crate::governor;
use crate::marshal;
use crate::sandbox;
use crate::tool::HostConfig;
use crate::types::{ErrorKind, ExecutionError, ExecutionOptions, Value};
use crate::validator;



/// Run `source` with `context` as the argument to its `run` entry point,
/// per spec §4.6's `execute(source, context, opts) -> Ok(bag) | Err({kind,
/// message})` contract.
pub fn execute(source: &str, context: Value, opts: ExecutionOptions) -> Result<Value, ExecutionError> {
    validator::validate(source)?;

    let source = source.to_string();
    let config = HostConfig::global();

    governor::run_bounded(move || run_in_sandbox(&source, context, config), opts)
}

/// Build the sandbox, load the script, marshal `context` in, call `run`,
/// and marshal the result back out. Runs entirely inside the governor's
/// worker thread.
fn run_in_sandbox(
    source: &str,
    context: Value,
    config: std::sync::Arc<HostConfig>,
) -> Result<Value, ExecutionError> {
    let lua = sandbox::build(config)?;

    let run_fn: mlua::Function = load_entry_point(&lua, source)?;

    let lua_context = marshal::to_interp(&lua, &context)
        .map_err(|e| ExecutionError::new(ErrorKind::MarshalFailed, format!("{e}")))?;

    let result: mlua::Value = run_fn
        .call(lua_context)
        .map_err(|e| ExecutionError::new(ErrorKind::RuntimeError, format!("{e}")))?;

    marshal::from_interp(&lua, result)
}

/// Load `source` into `lua` and return its `run` global, using the bytecode
/// cache to skip re-parsing identical source text. A cache hit loads the
/// stored bytecode directly; on a miss (or if loading cached bytecode fails,
/// e.g. after a crate upgrade changes the bytecode format) the source is
/// compiled fresh and the result cached for next time.
fn load_entry_point(lua: &Lua, source: &str) -> Result<mlua::Function, ExecutionError> {
    let key = cache_key(source);
    let cache = BytecodeCache::global();

    if let Some(bytecode) = cache.get(&key) {
        if lua.load(&bytecode[..]).exec().is_ok() {
            return fetch_run_global(lua);
        }
        // Fall through to a fresh compile; a corrupt or stale cache entry
        // is not fatal to the caller.
    }

    let chunk = lua.load(source);
    chunk.exec().map_err(|e| {
        ExecutionError::new(ErrorKind::LoadFailed, format!("failed to load script: {e}"))
    })?;

    if let Ok(func) = lua.load(source).into_function() {
        cache.insert(key, func.dump(false));
    }

    fetch_run_global(lua)
}

fn fetch_run_global(lua: &Lua) -> Result<mlua::Function, ExecutionError> {
    lua.globals().get::<_, mlua::Function>("run").map_err(|e| {
        ExecutionError::new(
            ErrorKind::MissingEntry,
            format!("script does not define a callable `run` global: {e}"),
        )
    })
}
