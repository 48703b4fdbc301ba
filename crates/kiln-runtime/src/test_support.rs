//! Serialisation for unit tests that touch the process-wide runtime.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::memsys::memsys;

static LOCK: Mutex<()> = Mutex::new(());

/// Hold the runtime exclusively and reset it to a fresh `init` state.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    memsys().init();
    guard
}
