//! Poison byte patterns written by the debug ("safe") allocation variants.

/// Written over every payload byte right after a safe allocation.
///
/// Reading it back means the payload was used before initialisation.
pub const UNINIT: u8 = 0xCB;

/// Written over every payload byte after a safe destructor has run.
///
/// Reading it back means the payload was used after its handle died.
pub const FREED: u8 = 0xDE;

const _: () = assert!(UNINIT != FREED);
