//! Gauntlet — network-impairment test orchestrator.
//!
//! Drives repeatable multi-process experiments against the Grid Clash
//! client/server under controlled synthetic degradation:
//!
//! - **supervisor** — spawn / liveness / graceful-then-forceful stop for
//!   every subprocess (server, clients, capture)
//! - **capture** — best-effort `tcpdump` packet traces per scenario
//! - **scenario** — the per-scenario state machine, from impairment apply
//!   through merge and unconditional impairment clear
//! - **merge** — combines per-client CSVs into one per-scenario dataset
//! - **runlock** — single-instance lock, crash recovery, exit guard
//! - **run** — pre-flight checks and the sequential scenario loop
//!
//! Impairment itself lives in the `gauntlet-netem` crate.

pub mod capture;
pub mod config;
pub mod layout;
pub mod merge;
pub mod run;
pub mod runlock;
pub mod scenario;
pub mod summary;
pub mod supervisor;
