//! scriptexec: sandboxed executor for agent-generated Lua scripts.

pub mod cache;
pub mod executor;
pub mod governor;
pub mod marshal;
pub mod sandbox;
pub mod tool;
pub mod types;
pub mod validator;

pub use cache::BytecodeCache;
pub use executor::execute;
pub use tool::HostConfig;
pub use types::{ErrorKind, ExecutionError, ExecutionOptions, Key, Value};
pub use validator::validate;
