//! Network impairment control for the gauntlet harness.
//!
//! Applies and clears `tc netem` qdiscs on a named interface to emulate
//! degraded network conditions (loss, delay, jitter) during test runs.
//! Rules never compose: applying is always clear-then-set, so one scenario
//! can never measure under a residual rule from an earlier one.

pub mod iface;
pub mod impairment;
pub mod test_util;

pub use impairment::{apply, clear, status, ImpairmentError, ImpairmentRule};
