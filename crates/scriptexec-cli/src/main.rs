use std::io::{self, Read as _};

use clap::Parser;
use scriptexec::{execute, ExecutionOptions, Value};

/// Execute a sandboxed Lua script and emit its JSON result.
#[derive(Parser, Debug)]
#[command(name = "scriptexec-cli", about = "Execute a sandboxed Lua script and emit its JSON result")]
struct Args {
    /// Read script source from file instead of stdin
    #[arg(long)]
    file: Option<std::path::PathBuf>,

    /// JSON object passed to the script's `run(context)` entry point
    #[arg(long)]
    context: Option<String>,

    /// Timeout in milliseconds (default: 30000)
    #[arg(long, default_value_t = 30_000u64)]
    timeout_ms: u64,

    /// Resident memory ceiling in bytes (default: 10000000)
    #[arg(long, default_value_t = 10_000_000u64)]
    memory_bytes: u64,
}

fn main() {
    let args = Args::parse();

    let source = if let Some(path) = args.file {
        std::fs::read_to_string(&path).unwrap_or_else(|e| {
            eprintln!("Error reading file: {e}");
            std::process::exit(1);
        })
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).unwrap_or_else(|e| {
            eprintln!("Error reading stdin: {e}");
            std::process::exit(1);
        });
        buf
    };

    let context = match args.context {
        Some(raw) => serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            eprintln!("Error parsing --context as JSON: {e}");
            std::process::exit(1);
        }),
        None => Value::empty_map(),
    };

    let opts = ExecutionOptions {
        timeout_ms: args.timeout_ms,
        memory_bytes: args.memory_bytes,
    };

    let result = execute(&source, context, opts);

    let json = serde_json::to_string(&result).expect("execute() result is always serializable");
    println!("{json}");
    // Exit 0 always — errors are encoded in the JSON, not the exit code.
}
