//! Process-wide shutdown coordination: a single atomic flag, settable by
//! a signal handler, a worker-mode stdin monitor thread, or a test-only
//! reset, and observed by every loop at its natural suspension points.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

/// A handle to the process-wide shutdown flag. Cheap to clone; all clones
/// share the same underlying atomic.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        ShutdownFlag(Arc::new(AtomicBool::new(false)))
    }

    /// Relaxed load, safe to call at any suspension point.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Test-only entry point: force the flag set, e.g. to unblock an
    /// accept loop running on another thread at the end of a test.
    pub fn set_for_test(&self) {
        self.set();
    }

    /// Test-only entry point: clear the flag so a fresh scenario can be
    /// exercised in the same process.
    pub fn reset_for_test(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a handler for termination and interrupt signals that does only
/// an atomic store into `flag`. The handler body must never log, allocate,
/// or call into anything that is not async-signal-safe; `ctrlc`'s closure
/// is invoked from that restricted context, so it carries exactly the one
/// store the contract allows.
pub fn install_signal_handler(flag: ShutdownFlag) -> Result<()> {
    ctrlc::set_handler(move || flag.set()).context("failed to install signal handler")
}

/// Spawn the worker-mode standard-input monitor: a detached thread that
/// blocks reading one byte from stdin and sets `flag` on EOF, on any read
/// error, or if the parent unexpectedly sends data (the worker contract
/// forbids the parent writing anything). The thread is never joined; it
/// outlives its caller's interest in it by design.
pub fn spawn_stdin_monitor(flag: ShutdownFlag) {
    spawn_stdin_monitor_from(flag, std::io::stdin());
}

/// Same monitor as `spawn_stdin_monitor`, reading from `source` instead of
/// the process's real stdin. Exposed so tests can exercise the EOF/error/
/// unexpected-data handling against a pipe they control, without touching
/// file descriptor 0.
pub fn spawn_stdin_monitor_from<R: Read + Send + 'static>(flag: ShutdownFlag, mut source: R) {
    std::thread::spawn(move || {
        let mut byte = [0u8; 1];
        match source.read(&mut byte) {
            Ok(0) => tracing::info!("stdin closed (parent died), shutting down"),
            Ok(_) => tracing::warn!("unexpected data on stdin, shutting down"),
            Err(e) => tracing::warn!(error = %e, "stdin read error, shutting down"),
        }
        flag.set();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
    }

    #[test]
    fn monotonic_until_reset() {
        let flag = ShutdownFlag::new();
        flag.set();
        assert!(flag.is_set());
        assert!(flag.is_set());
        flag.reset_for_test();
        assert!(!flag.is_set());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();
        clone.set();
        assert!(flag.is_set());
    }

    #[test]
    fn stdin_monitor_sets_flag_when_pipe_closes() {
        let (read_end, write_end) = std::os::unix::net::UnixStream::pair().unwrap();
        let flag = ShutdownFlag::new();
        spawn_stdin_monitor_from(flag.clone(), read_end);

        drop(write_end);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !flag.is_set() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(flag.is_set(), "flag should be set once the stdin pipe closes");
    }

    #[test]
    fn stdin_monitor_sets_flag_on_unexpected_data() {
        let (read_end, mut write_end) = std::os::unix::net::UnixStream::pair().unwrap();
        let flag = ShutdownFlag::new();
        spawn_stdin_monitor_from(flag.clone(), read_end);

        std::io::Write::write_all(&mut write_end, b"x").unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !flag.is_set() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(flag.is_set(), "flag should be set if the parent unexpectedly writes");
    }
}
