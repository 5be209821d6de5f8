//! Run configuration and scenario catalog.
//!
//! The catalog is either the built-in six scenarios or a TOML file:
//!
//! ```toml
//! [[scenario]]
//! name = "loss_2"
//! rule = "loss_2"
//!
//! [[scenario]]
//! name = "harsh"
//! rule = "custom"
//! params = "delay 200ms 40ms loss 8%"
//! ```
//!
//! `rule` omitted means baseline. Scenario names must be unique — the name
//! goes into every artifact prefix, and a collision would silently
//! overwrite another scenario's files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use gauntlet_netem::ImpairmentRule;
use serde::Deserialize;

use crate::scenario::ScenarioSpec;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Interface the impairment rule and capture are applied to.
    pub interface: String,
    pub num_clients: u32,
    pub duration_secs: u64,
    /// UDP port the game server listens on. Used for the capture filter and
    /// passed to every client.
    pub port: u16,
    /// Root of the artifact tree for this run.
    pub base_dir: PathBuf,
    /// Server launch command (program + fixed args). Gets the metrics
    /// output directory via the `METRICS_OUTPUT_DIR` environment variable.
    pub server_cmd: Vec<String>,
    /// Client launch command (program + fixed args). The harness appends
    /// `--client-id`, `--duration`, `--output`, `--server`, `--port`.
    pub client_cmd: Vec<String>,
    /// Capture program; absence on the host is tolerated.
    pub capture_cmd: String,
}

impl RunConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_clients < 1 {
            bail!("at least one client is required");
        }
        if self.duration_secs == 0 {
            bail!("duration must be positive");
        }
        if self.server_cmd.is_empty() {
            bail!("server command is empty");
        }
        if self.client_cmd.is_empty() {
            bail!("client command is empty");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    scenario: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    rule: Option<String>,
    params: Option<String>,
}

/// The default catalog: one baseline plus the five fixed impairment rules.
pub fn default_catalog() -> Vec<(String, ImpairmentRule)> {
    [
        ImpairmentRule::Baseline,
        ImpairmentRule::Loss2,
        ImpairmentRule::Loss5,
        ImpairmentRule::Delay100,
        ImpairmentRule::LossDelay,
        ImpairmentRule::Jitter,
    ]
    .into_iter()
    .map(|r| (r.name().to_string(), r))
    .collect()
}

/// Load a catalog from a TOML file.
pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<(String, ImpairmentRule)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog {}", path.display()))?;
    let file: CatalogFile = toml::from_str(&text)
        .with_context(|| format!("failed to parse catalog {}", path.display()))?;
    if file.scenario.is_empty() {
        bail!("catalog {} defines no scenarios", path.display());
    }

    let mut catalog = Vec::with_capacity(file.scenario.len());
    for entry in file.scenario {
        let rule = match entry.rule.as_deref() {
            None | Some("baseline") => ImpairmentRule::Baseline,
            Some("custom") => {
                let params = entry.params.with_context(|| {
                    format!("scenario `{}`: rule `custom` needs `params`", entry.name)
                })?;
                ImpairmentRule::Custom(params)
            }
            Some(name) => ImpairmentRule::from_name(name).with_context(|| {
                format!(
                    "scenario `{}`: unknown rule `{name}` (expected baseline, loss_2, loss_5, delay_100, loss_delay, jitter, or custom)",
                    entry.name
                )
            })?,
        };
        catalog.push((entry.name, rule));
    }
    Ok(catalog)
}

/// Turn a catalog into concrete scenario specs, prefixed by the run
/// timestamp. Duplicate names are rejected here, before anything runs.
pub fn build_specs(
    catalog: Vec<(String, ImpairmentRule)>,
    run_ts: &str,
) -> anyhow::Result<Vec<ScenarioSpec>> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(catalog.len());
    for (name, rule) in catalog {
        if !seen.insert(name.clone()) {
            bail!("duplicate scenario name `{name}` would overwrite artifacts");
        }
        let output_prefix = format!("{run_ts}_{name}");
        specs.push(ScenarioSpec {
            name,
            rule,
            output_prefix,
        });
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> RunConfig {
        RunConfig {
            interface: "lo".into(),
            num_clients: 2,
            duration_secs: 30,
            port: 12000,
            base_dir: PathBuf::from("test_results"),
            server_cmd: vec!["python3".into(), "server_final.py".into()],
            client_cmd: vec!["python3".into(), "client_test.py".into()],
            capture_cmd: "tcpdump".into(),
        }
    }

    #[test]
    fn default_catalog_covers_every_fixed_rule() {
        let catalog = default_catalog();
        let names: Vec<&str> = catalog.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["baseline", "loss_2", "loss_5", "delay_100", "loss_delay", "jitter"]
        );
    }

    #[test]
    fn validate_rejects_degenerate_configs() {
        let mut cfg = minimal_config();
        cfg.num_clients = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = minimal_config();
        cfg.duration_secs = 0;
        assert!(cfg.validate().is_err());

        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn specs_are_timestamp_prefixed_and_unique() {
        let specs = build_specs(default_catalog(), "20260101_120000").unwrap();
        assert_eq!(specs[1].output_prefix, "20260101_120000_loss_2");

        let dup = vec![
            ("a".to_string(), ImpairmentRule::Baseline),
            ("a".to_string(), ImpairmentRule::Loss2),
        ];
        assert!(build_specs(dup, "ts").is_err());
    }

    #[test]
    fn catalog_file_parses_rules_and_custom_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            r#"
[[scenario]]
name = "clean"

[[scenario]]
name = "lossy"
rule = "loss_5"

[[scenario]]
name = "harsh"
rule = "custom"
params = "delay 200ms 40ms loss 8%"
"#,
        )
        .unwrap();

        let catalog = load_catalog(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[0].1, ImpairmentRule::Baseline);
        assert_eq!(catalog[1].1, ImpairmentRule::Loss5);
        assert_eq!(
            catalog[2].1,
            ImpairmentRule::Custom("delay 200ms 40ms loss 8%".into())
        );
    }

    #[test]
    fn catalog_file_rejects_unknown_rule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, "[[scenario]]\nname = \"x\"\nrule = \"loss_50\"\n").unwrap();
        assert!(load_catalog(&path).is_err());
    }
}
