//! Debug trace macro.
//!
//! With the `debug-trace` feature, `kiln_trace!` forwards to `log::trace!`
//! under the `kiln` target. Without it the arguments are still type-checked
//! but sit behind `if false`, so nothing is formatted or evaluated.

#[cfg(feature = "debug-trace")]
macro_rules! kiln_trace {
    ($($arg:tt)*) => {
        ::log::trace!(target: "kiln", $($arg)*)
    };
}

#[cfg(not(feature = "debug-trace"))]
macro_rules! kiln_trace {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}
