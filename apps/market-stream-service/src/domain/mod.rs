//! Domain Layer - Price model and admission control.
//!
//! Pure types with no I/O. Everything here is usable from synchronous code
//! and tests without a runtime.

/// Price records and snapshots.
pub mod price;

/// Sliding-window admission control.
pub mod admission;
