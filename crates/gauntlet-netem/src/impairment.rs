use std::fmt;
use std::io;
use std::process::{Command, Output};

use thiserror::Error;

/// A named traffic-shaping configuration from the fixed rule catalog.
///
/// `Baseline` means no degradation at all — applying it only clears the
/// interface. `Custom` carries a free-form netem parameter string that is
/// passed to `tc` verbatim; no validation is performed here and a rejection
/// by `tc` surfaces as [`ImpairmentError::CommandFailed`].
#[derive(Debug, Clone, PartialEq)]
pub enum ImpairmentRule {
    Baseline,
    /// 2% independent packet loss.
    Loss2,
    /// 5% independent packet loss.
    Loss5,
    /// Fixed 100 ms one-way added latency.
    Delay100,
    /// 2% loss combined with 50 ms delay.
    LossDelay,
    /// 50 ms delay with 10 ms variance.
    Jitter,
    /// Caller-supplied netem parameters, applied verbatim.
    Custom(String),
}

impl ImpairmentRule {
    /// Look up a catalog rule by name. `Custom` is not constructible this
    /// way — it needs a parameter string from the caller.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "baseline" => Some(Self::Baseline),
            "loss_2" => Some(Self::Loss2),
            "loss_5" => Some(Self::Loss5),
            "delay_100" => Some(Self::Delay100),
            "loss_delay" => Some(Self::LossDelay),
            "jitter" => Some(Self::Jitter),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Baseline => "baseline",
            Self::Loss2 => "loss_2",
            Self::Loss5 => "loss_5",
            Self::Delay100 => "delay_100",
            Self::LossDelay => "loss_delay",
            Self::Jitter => "jitter",
            Self::Custom(_) => "custom",
        }
    }

    /// The netem parameter list for this rule, or `None` for `Baseline`.
    pub fn netem_params(&self) -> Option<Vec<String>> {
        let params: Vec<String> = match self {
            Self::Baseline => return None,
            Self::Loss2 => vec!["loss".into(), "2%".into()],
            Self::Loss5 => vec!["loss".into(), "5%".into()],
            Self::Delay100 => vec!["delay".into(), "100ms".into()],
            Self::LossDelay => vec!["loss".into(), "2%".into(), "delay".into(), "50ms".into()],
            Self::Jitter => vec!["delay".into(), "50ms".into(), "10ms".into()],
            Self::Custom(s) => s.split_whitespace().map(str::to_string).collect(),
        };
        Some(params)
    }
}

impl fmt::Display for ImpairmentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(s) => write!(f, "custom ({s})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImpairmentError {
    /// Modifying qdiscs needs elevated privilege. Surfaced immediately,
    /// never retried.
    #[error("insufficient privileges to modify qdiscs on {interface}: {stderr}")]
    PermissionDenied { interface: String, stderr: String },
    #[error("`tc` not found on PATH")]
    ToolMissing,
    #[error("tc {args:?} failed: {stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },
    #[error("failed to run tc: {0}")]
    Io(#[from] io::Error),
}

/// The `tc` argument list that deletes every rule on an interface.
pub fn clear_args(interface: &str) -> Vec<String> {
    ["qdisc", "del", "dev", interface, "root"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// The `tc` argument list that installs a rule, or `None` for baseline.
pub fn set_args(interface: &str, rule: &ImpairmentRule) -> Option<Vec<String>> {
    let params = rule.netem_params()?;
    let mut args: Vec<String> = ["qdisc", "add", "dev", interface, "root", "netem"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(params);
    Some(args)
}

/// Apply a rule to an interface.
///
/// Always clears first, unconditionally — the outcome of the clear step is
/// discarded so a missing pre-existing rule never masks the set step. Only
/// a failure from the set step is reported. For `Baseline` this is a clear
/// and nothing else.
pub fn apply(interface: &str, rule: &ImpairmentRule) -> Result<(), ImpairmentError> {
    let _ = clear(interface);

    let Some(args) = set_args(interface, rule) else {
        tracing::debug!(interface, "baseline rule, interface left clean");
        return Ok(());
    };

    run_tc(interface, &args)?;
    tracing::info!(interface, rule = %rule, "impairment applied");
    Ok(())
}

/// Remove any rule from an interface. Clearing a clean interface is a
/// no-op success, so calling this twice in a row never errors.
pub fn clear(interface: &str) -> Result<(), ImpairmentError> {
    let args = clear_args(interface);
    match run_tc(interface, &args) {
        Ok(_) => {
            tracing::debug!(interface, "impairment cleared");
            Ok(())
        }
        Err(ImpairmentError::CommandFailed { stderr, .. }) if is_no_qdisc(&stderr) => Ok(()),
        Err(e) => Err(e),
    }
}

/// The current qdisc description for an interface, as reported by
/// `tc qdisc show`.
pub fn status(interface: &str) -> Result<String, ImpairmentError> {
    let args: Vec<String> = ["qdisc", "show", "dev", interface]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let output = run_tc(interface, &args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_tc(interface: &str, args: &[String]) -> Result<Output, ImpairmentError> {
    let output = Command::new("tc").args(args).output().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ImpairmentError::ToolMissing
        } else {
            ImpairmentError::Io(e)
        }
    })?;

    if output.status.success() {
        return Ok(output);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.contains("Operation not permitted") {
        return Err(ImpairmentError::PermissionDenied {
            interface: interface.to_string(),
            stderr,
        });
    }
    Err(ImpairmentError::CommandFailed {
        args: args.to_vec(),
        stderr,
    })
}

/// Does this `tc qdisc del` stderr mean "there was nothing to delete"?
/// Wording varies across iproute2 versions.
fn is_no_qdisc(stderr: &str) -> bool {
    stderr.contains("Cannot delete qdisc with handle of zero")
        || stderr.contains("No such file or directory")
        || stderr.contains("Invalid handle")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_round_trip() {
        for name in ["baseline", "loss_2", "loss_5", "delay_100", "loss_delay", "jitter"] {
            let rule = ImpairmentRule::from_name(name).expect(name);
            assert_eq!(rule.name(), name);
        }
        assert!(ImpairmentRule::from_name("loss_50").is_none());
    }

    #[test]
    fn baseline_has_no_netem_params() {
        assert!(ImpairmentRule::Baseline.netem_params().is_none());
        assert!(set_args("eth0", &ImpairmentRule::Baseline).is_none());
    }

    #[test]
    fn fixed_rules_render_expected_params() {
        assert_eq!(
            ImpairmentRule::Loss2.netem_params().unwrap(),
            vec!["loss", "2%"]
        );
        assert_eq!(
            ImpairmentRule::Loss5.netem_params().unwrap(),
            vec!["loss", "5%"]
        );
        assert_eq!(
            ImpairmentRule::Delay100.netem_params().unwrap(),
            vec!["delay", "100ms"]
        );
        assert_eq!(
            ImpairmentRule::LossDelay.netem_params().unwrap(),
            vec!["loss", "2%", "delay", "50ms"]
        );
        assert_eq!(
            ImpairmentRule::Jitter.netem_params().unwrap(),
            vec!["delay", "50ms", "10ms"]
        );
    }

    #[test]
    fn custom_params_pass_through_verbatim() {
        let rule = ImpairmentRule::Custom("delay 200ms loss 1% corrupt 0.1%".into());
        assert_eq!(
            rule.netem_params().unwrap(),
            vec!["delay", "200ms", "loss", "1%", "corrupt", "0.1%"]
        );
    }

    // Scenario isolation hinges on the clear step always running before the
    // set step. `apply` is built from these two argument plans, executed in
    // order, so asserting their shape pins the discipline down.
    #[test]
    fn clear_plan_precedes_set_plan() {
        let clear = clear_args("veth0");
        assert_eq!(clear, vec!["qdisc", "del", "dev", "veth0", "root"]);

        let set = set_args("veth0", &ImpairmentRule::Loss2).unwrap();
        assert_eq!(
            set,
            vec!["qdisc", "add", "dev", "veth0", "root", "netem", "loss", "2%"]
        );
    }

    #[test]
    fn no_qdisc_stderr_variants_recognised() {
        assert!(is_no_qdisc("Error: Cannot delete qdisc with handle of zero."));
        assert!(is_no_qdisc("RTNETLINK answers: No such file or directory"));
        assert!(!is_no_qdisc("RTNETLINK answers: Operation not permitted"));
    }
}
