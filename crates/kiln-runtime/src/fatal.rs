//! Process termination on contract violations.

use std::io::Write;

use kiln_core::ContractViolation;

/// Print `violation` to stderr and abort the process.
///
/// The message is written straight to the stderr handle rather than through
/// the logger or the `eprintln!` capture used by the test harness, so it is
/// visible even when no logger is installed.
#[cold]
#[inline(never)]
pub fn fatal(violation: ContractViolation) -> ! {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "kiln: fatal error: {violation}");
    let _ = err.flush();
    std::process::abort()
}
