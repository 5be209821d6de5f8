//! Run controller: pre-flight checks and the sequential scenario loop.
//!
//! Pre-flight failures (missing privilege, missing `tc`, unknown
//! interface, invalid catalog, another harness instance running) abort
//! before any scenario starts. Once the loop is entered, the run always
//! completes the catalog: individual scenarios degrade or abort themselves,
//! but never the run.

use std::sync::Arc;

use anyhow::bail;
use gauntlet_netem::{iface, ImpairmentError};

use crate::config::RunConfig;
use crate::layout::RunPaths;
use crate::runlock::RunLock;
use crate::scenario::{ScenarioReport, ScenarioRunner, ScenarioSpec};
use crate::summary;

/// Everything that must hold before the first scenario is allowed to run.
///
/// The privilege probe is a real `clear` on the run interface: it is
/// idempotent, the first scenario would clear anyway, and it surfaces a
/// missing binary or missing privilege up front instead of ten seconds
/// into scenario one — while also guaranteeing the run starts from a
/// clean interface.
pub fn preflight(cfg: &RunConfig) -> anyhow::Result<()> {
    cfg.validate()?;

    if !iface::interface_exists(&cfg.interface) {
        bail!("interface `{}` does not exist", cfg.interface);
    }

    match gauntlet_netem::clear(&cfg.interface) {
        Ok(()) => {}
        Err(ImpairmentError::ToolMissing) => {
            bail!("`tc` is required but not found on PATH");
        }
        Err(ImpairmentError::PermissionDenied { .. }) => {
            bail!(
                "modifying qdiscs on `{}` requires elevated privilege",
                cfg.interface
            );
        }
        Err(e) => {
            bail!("tc probe on `{}` failed: {e}", cfg.interface);
        }
    }

    Ok(())
}

/// Execute every scenario in catalog order, strictly sequentially, and
/// write the run summary.
///
/// Once this loop is entered, nothing aborts the run: degraded scenarios
/// and even a failed summary write are logged, not propagated, so a run
/// that completed its catalog always exits zero.
pub fn execute(
    cfg: &RunConfig,
    specs: &[ScenarioSpec],
    paths: &RunPaths,
    lock: &Arc<RunLock>,
    run_ts: &str,
) -> Vec<ScenarioReport> {
    let mut reports = Vec::with_capacity(specs.len());
    for (idx, spec) in specs.iter().enumerate() {
        tracing::info!(
            scenario = %spec.name,
            position = idx + 1,
            total = specs.len(),
            "running scenario"
        );
        let mut runner = ScenarioRunner::new(cfg, paths, lock);
        reports.push(runner.run(spec));
    }

    let summary_path = paths.summary();
    match summary::write_summary(&summary_path, cfg, run_ts, &reports) {
        Ok(()) => tracing::info!(summary = %summary_path.display(), "run complete"),
        Err(e) => tracing::error!(summary = %summary_path.display(), error = %e, "failed to write summary"),
    }

    reports
}
