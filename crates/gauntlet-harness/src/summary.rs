//! Run summary.
//!
//! A plain-text enumeration of every scenario: record counts, where the
//! artifacts went, and any degradation flags picked up along the way. The
//! summary is advisory documentation for whoever analyzes the datasets —
//! it is not a pass/fail gate.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::config::RunConfig;
use crate::scenario::{CaptureDisposition, ScenarioReport};

pub fn write_summary(
    path: &Path,
    cfg: &RunConfig,
    run_ts: &str,
    reports: &[ScenarioReport],
) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    writeln!(w, "GAUNTLET TEST RUN SUMMARY")?;
    writeln!(w, "=========================")?;
    writeln!(w, "run:        {run_ts}")?;
    writeln!(w, "interface:  {}", cfg.interface)?;
    writeln!(w, "clients:    {}", cfg.num_clients)?;
    writeln!(w, "duration:   {}s per scenario", cfg.duration_secs)?;
    writeln!(w, "scenarios:  {}", reports.len())?;
    writeln!(w)?;

    for report in reports {
        writeln!(w, "[{}]", report.name)?;
        writeln!(w, "  rule:            {}", report.rule)?;
        writeln!(w, "  prefix:          {}", report.output_prefix)?;
        writeln!(
            w,
            "  impairment:      {}",
            if report.impairment_confirmed {
                "confirmed"
            } else {
                "NOT CONFIRMED"
            }
        )?;
        writeln!(
            w,
            "  capture:         {}",
            match report.capture {
                CaptureDisposition::Recorded => "recorded",
                CaptureDisposition::Unavailable => "unavailable",
                CaptureDisposition::Failed => "failed",
            }
        )?;
        writeln!(
            w,
            "  server:          {}",
            if report.server_started {
                "started"
            } else {
                "FAILED TO START"
            }
        )?;
        writeln!(
            w,
            "  clients:         {} spawned, {} completed, {} killed at deadline",
            report.clients_spawned, report.clients_completed, report.clients_killed
        )?;
        writeln!(
            w,
            "  merged:          {} file(s), {} data row(s){}",
            report.merged_files,
            report.data_rows,
            if report.merged_written {
                ""
            } else {
                " (no merged file written)"
            }
        )?;
        writeln!(w, "  elapsed:         {}s", report.elapsed.as_secs())?;
        if report.warnings.is_empty() {
            writeln!(w, "  flags:           none")?;
        } else {
            writeln!(w, "  flags:")?;
            for warning in &report.warnings {
                writeln!(w, "    - {warning}")?;
            }
        }
        writeln!(w)?;
    }

    let degraded = reports.iter().filter(|r| r.degraded()).count();
    writeln!(
        w,
        "{} of {} scenario(s) degraded; see flags above.",
        degraded,
        reports.len()
    )?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioState;
    use std::path::PathBuf;
    use std::time::Duration;

    fn report(name: &str, warnings: Vec<String>) -> ScenarioReport {
        ScenarioReport {
            name: name.to_string(),
            rule: "loss_2".to_string(),
            output_prefix: format!("20260101_120000_{name}"),
            impairment_confirmed: warnings.is_empty(),
            capture: CaptureDisposition::Unavailable,
            server_started: true,
            clients_spawned: 2,
            clients_completed: 2,
            clients_killed: 0,
            merged_files: 2,
            data_rows: 40,
            skipped_files: Vec::new(),
            merged_written: true,
            warnings,
            elapsed: Duration::from_secs(35),
            state: ScenarioState::Done,
        }
    }

    #[test]
    fn summary_lists_every_scenario_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_summary.txt");
        let cfg = RunConfig {
            interface: "lo".into(),
            num_clients: 2,
            duration_secs: 30,
            port: 12000,
            base_dir: PathBuf::from("."),
            server_cmd: vec!["true".into()],
            client_cmd: vec!["true".into()],
            capture_cmd: "tcpdump".into(),
        };
        let reports = vec![
            report("baseline", vec![]),
            report("loss_2", vec!["impairment not confirmed: boom".into()]),
        ];

        write_summary(&path, &cfg, "20260101_120000", &reports).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[baseline]"));
        assert!(text.contains("[loss_2]"));
        assert!(text.contains("impairment not confirmed: boom"));
        assert!(text.contains("1 of 2 scenario(s) degraded"));
    }
}
