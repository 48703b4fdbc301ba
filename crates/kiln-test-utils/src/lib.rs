//! Test fixtures for Kiln development.
//!
//! The runtime is a process-wide singleton, so every test that touches it
//! takes [`serial`] first. Tests that expect the process to abort run
//! themselves in a child process through [`run_in_child`].
//!
//! Allocator and destructor fixtures live in [`fixtures`].

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod fixtures;

use std::process::{Command, Output};
use std::sync::{Mutex, MutexGuard, PoisonError};

use kiln_runtime::memsys;

static RUNTIME_LOCK: Mutex<()> = Mutex::new(());

/// Hold the runtime exclusively and reset it with `init`.
///
/// A test that panicked while holding the guard does not poison later
/// tests: the lock is recovered and the runtime re-initialised.
pub fn serial() -> MutexGuard<'static, ()> {
    let guard = RUNTIME_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    memsys().init();
    guard
}

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Environment variable marking a re-executed child test.
pub const CHILD_ENV: &str = "KILN_CHILD_TEST";

/// Whether this process is a child spawned by [`run_in_child`].
pub fn in_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Re-run the single test `test_name` of the current test binary in a
/// child process and collect its output.
///
/// The child sees [`CHILD_ENV`] set, so the test body can branch on
/// [`in_child`] to perform the aborting action only there.
pub fn run_in_child(test_name: &str) -> Output {
    let exe = std::env::current_exe().expect("test binary path");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .expect("spawn child test process")
}

/// Assert the child died abnormally and printed `needle` on stderr.
pub fn assert_aborted(output: &Output, needle: &str) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !output.status.success(),
        "child exited successfully, stderr:\n{stderr}"
    );
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert!(
            output.status.signal().is_some(),
            "child exited with {:?} instead of a signal, stderr:\n{stderr}",
            output.status
        );
    }
    assert!(
        stderr.contains(needle),
        "expected {needle:?} in child stderr:\n{stderr}"
    );
}
