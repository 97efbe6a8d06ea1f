//! Session-level concurrency control.

pub mod gate;

pub use gate::{GateError, SessionGate, SessionGuard};
