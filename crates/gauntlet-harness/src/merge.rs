//! Per-scenario artifact merging.
//!
//! Combines N per-client CSV files into one dataset: the header line from
//! the first file that exists and is non-empty, then every file's data rows
//! in client-index order. A pure function over the filesystem — it never
//! fabricates rows, never fails on a missing client file, and writes no
//! output at all when no input exists.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// What a merge actually did, for the scenario report and run summary.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Inputs that contributed rows.
    pub merged_files: usize,
    /// Inputs skipped because they were missing or empty.
    pub skipped: Vec<PathBuf>,
    /// Data rows written (header excluded).
    pub data_rows: usize,
    /// False when no input existed and no output file was created.
    pub wrote_output: bool,
}

/// Merge `inputs` (in index order) into `output`.
pub fn merge(inputs: &[PathBuf], output: &Path) -> io::Result<MergeReport> {
    let mut report = MergeReport::default();

    // Partition up front so the output file is only created when there is
    // at least one contributing input.
    let mut contents: Vec<(usize, String)> = Vec::new();
    for (idx, path) in inputs.iter().enumerate() {
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => contents.push((idx, text)),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "skipping empty client file");
                report.skipped.push(path.clone());
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "skipping missing client file");
                report.skipped.push(path.clone());
            }
        }
    }

    if contents.is_empty() {
        tracing::warn!(output = %output.display(), "no client files to merge, no output written");
        return Ok(report);
    }

    let mut writer = BufWriter::new(File::create(output)?);

    let header = contents[0].1.lines().next().unwrap_or_default();
    writeln!(writer, "{header}")?;

    for (_, text) in &contents {
        for line in text.lines().skip(1) {
            writeln!(writer, "{line}")?;
            report.data_rows += 1;
        }
        report.merged_files += 1;
    }
    writer.flush()?;
    report.wrote_output = true;

    tracing::info!(
        output = %output.display(),
        files = report.merged_files,
        rows = report.data_rows,
        skipped = report.skipped.len(),
        "merged client results"
    );
    Ok(report)
}
