//! Resource governor: bounds a single script invocation by wall-clock time
//! and resident memory, forcefully abandoning the worker thread on breach
//! (spec §4.5).
//!
//! Grounded on the teacher's `timeout::run_with_timeout` for the
//! channel-plus-`recv_timeout` shape and its "why no SIGALRM" rationale
//! (SIGALRM isn't thread-safe with a multi-threaded runtime; `process::exit`
//! would kill the caller too; thread abandonment is the only portable
//! option for interrupting a tight loop that never yields). Memory sampling
//! is new: grounded on `r3e-network-neo-rs`'s use of `sysinfo` for
//! process-level resource sampling, adapted to a polling loop since mlua
//! gives no hook to interrupt a running chunk from outside.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{PidExt, ProcessExt, System, SystemExt};

use crate::types::{ErrorKind, ExecutionError, ExecutionOptions};

/// How often the governor wakes to check the deadline and sample memory.
/// Short enough that a breach is caught promptly, long enough not to
/// dominate CPU on a tight polling loop.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Sample the current process' resident memory and fail with
/// `MemoryExceeded` if it has already crossed `memory_bytes`. A missing pid
/// or an unreadable process entry is treated as "can't tell", not a breach.
fn check_memory(
    sys: &mut System,
    pid: Option<sysinfo::Pid>,
    memory_bytes: u64,
) -> Result<(), ExecutionError> {
    let Some(pid) = pid else {
        return Ok(());
    };
    sys.refresh_process(pid);
    if let Some(process) = sys.process(pid) {
        // sysinfo reports memory in KiB.
        let rss_bytes = process.memory().saturating_mul(1024);
        if rss_bytes > memory_bytes {
            return Err(ExecutionError::new(
                ErrorKind::MemoryExceeded,
                format!(
                    "process resident memory {rss_bytes} bytes exceeded the {memory_bytes}-byte ceiling"
                ),
            ));
        }
    }
    Ok(())
}

/// Run `f` on a dedicated worker thread, bounded by `opts`.
///
/// Returns `f`'s own result if it completes within budget. Returns
/// `Err(Timeout)` if the wall-clock ceiling is reached, or
/// `Err(MemoryExceeded)` if the process' resident memory crosses
/// `opts.memory_bytes` first. In either breach case the worker thread is
/// abandoned, not joined — per spec §4.5 this is forceful cancellation, and
/// whatever the thread was doing (including a Lua interpreter mid-loop) is
/// simply left to die with the process's own thread-local state, never
/// observed by the caller again.
///
/// Memory is sampled before the worker is dispatched, on every poll tick
/// while it runs, and once more the instant its result arrives — so a
/// script that blows the ceiling and returns before the first poll tick
/// fires is still caught, per spec §4.5 "before and after the call."
pub fn run_bounded<F, T>(f: F, opts: ExecutionOptions) -> Result<T, ExecutionError>
where
    F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
    T: Send + 'static,
{
    let mut sys = System::new();
    let pid = sysinfo::get_current_pid().ok();

    check_memory(&mut sys, pid, opts.memory_bytes)?;

    let (tx, rx) = mpsc::channel::<Result<T, ExecutionError>>();

    thread::Builder::new()
        .name("scriptexec-worker".to_string())
        .spawn(move || {
            let result = f();
            let _ = tx.send(result);
        })
        .expect("failed to spawn script worker thread");

    let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecutionError::new(
                ErrorKind::Timeout,
                format!("script exceeded the {}ms timeout", opts.timeout_ms),
            ));
        }

        match rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(result) => {
                check_memory(&mut sys, pid, opts.memory_bytes)?;
                return result;
            }
            Err(RecvTimeoutError::Timeout) => {
                check_memory(&mut sys, pid, opts.memory_bytes)?;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ExecutionError::new(
                    ErrorKind::RuntimeError,
                    "script worker thread terminated unexpectedly",
                ));
            }
        }
    }
}
