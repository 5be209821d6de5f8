//! Per-run artifact tree.
//!
//! Every artifact a scenario produces is namespaced by the scenario's
//! `output_prefix` (run timestamp + scenario name), so consecutive runs
//! never overwrite each other:
//!
//! ```text
//! <base>/
//!   results/<prefix>_client<i>.csv     per-client metric samples
//!   results/<prefix>_merged.csv        merged per-scenario dataset
//!   results/test_summary.txt           run summary
//!   logs/<prefix>_{server,client<i>,capture}.log
//!   pcaps/<prefix>.pcap
//!   server_metrics/                    written by the server itself
//!   gauntlet.lock.json                 run lock
//! ```

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub base: PathBuf,
    pub results: PathBuf,
    pub logs: PathBuf,
    pub pcaps: PathBuf,
    pub server_metrics: PathBuf,
}

impl RunPaths {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            results: base.join("results"),
            logs: base.join("logs"),
            pcaps: base.join("pcaps"),
            server_metrics: base.join("server_metrics"),
        }
    }

    pub fn create_all(&self) -> io::Result<()> {
        for dir in [&self.results, &self.logs, &self.pcaps, &self.server_metrics] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn client_result(&self, prefix: &str, index: u32) -> PathBuf {
        self.results.join(format!("{prefix}_client{index}.csv"))
    }

    pub fn merged_result(&self, prefix: &str) -> PathBuf {
        self.results.join(format!("{prefix}_merged.csv"))
    }

    pub fn server_log(&self, prefix: &str) -> PathBuf {
        self.logs.join(format!("{prefix}_server.log"))
    }

    pub fn client_log(&self, prefix: &str, index: u32) -> PathBuf {
        self.logs.join(format!("{prefix}_client{index}.log"))
    }

    pub fn capture_log(&self, prefix: &str) -> PathBuf {
        self.logs.join(format!("{prefix}_capture.log"))
    }

    pub fn pcap(&self, prefix: &str) -> PathBuf {
        self.pcaps.join(format!("{prefix}.pcap"))
    }

    pub fn summary(&self) -> PathBuf {
        self.results.join("test_summary.txt")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.base.join("gauntlet.lock.json")
    }
}
