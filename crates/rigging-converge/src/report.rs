//! Run results and the per-host recap

use crate::module::ModuleKind;
use rigging_core::ValueMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Result of one action on one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Changed,
    Unchanged,
    Skipped,
    Failed,
    Unreachable,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Changed => "changed",
            Outcome::Unchanged => "ok",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
            Outcome::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: String,
    pub module: ModuleKind,
    /// Ran as a notified handler
    pub handler: bool,
    pub outcome: Outcome,
    /// Error or debug message
    pub message: Option<String>,
    pub payload: ValueMap,
    pub duration_ms: u64,
}

/// How a host ended a play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Ok,
    Failed,
    Unreachable,
    /// Stopped by cancellation before all actions ran
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostRun {
    pub alias: String,
    pub status: HostStatus,
    pub results: Vec<ActionResult>,
}

impl HostRun {
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.results.iter().map(|r| r.outcome).collect()
    }

    /// Results of actions with this name, in run order
    pub fn result(&self, action: &str) -> Option<&ActionResult> {
        self.results.iter().find(|r| r.action == action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayReport {
    pub name: String,
    /// Hosts in inventory order
    pub hosts: Vec<HostRun>,
}

impl PlayReport {
    pub fn host(&self, alias: &str) -> Option<&HostRun> {
        self.hosts.iter().find(|h| h.alias == alias)
    }
}

/// Everything a run did. Failures are data here, not errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub plays: Vec<PlayReport>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunReport {
    /// Hosts that failed or were unreachable in any play
    pub fn failed_hosts(&self) -> BTreeSet<&str> {
        self.plays
            .iter()
            .flat_map(|p| &p.hosts)
            .filter(|h| matches!(h.status, HostStatus::Failed | HostStatus::Unreachable))
            .map(|h| h.alias.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed_hosts().is_empty()
    }

    /// Every result for `alias` across plays
    pub fn results_for<'a>(&'a self, alias: &'a str) -> impl Iterator<Item = &'a ActionResult> {
        self.plays
            .iter()
            .filter_map(move |p| p.host(alias))
            .flat_map(|h| &h.results)
    }

    pub fn recap(&self) -> BTreeMap<String, Recap> {
        let mut recap: BTreeMap<String, Recap> = BTreeMap::new();
        for host in self.plays.iter().flat_map(|p| &p.hosts) {
            let entry = recap.entry(host.alias.clone()).or_default();
            for result in &host.results {
                entry.count(result.outcome);
            }
        }
        recap
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PLAY RECAP")?;
        for (alias, recap) in self.recap() {
            writeln!(f, "{alias:<24} : {recap}")?;
        }
        if self.cancelled {
            writeln!(f, "(cancelled)")?;
        }
        Ok(())
    }
}

/// Per-host counters. `ok` includes changed results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Recap {
    pub ok: usize,
    pub changed: usize,
    pub unreachable: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Recap {
    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Changed => {
                self.ok += 1;
                self.changed += 1;
            }
            Outcome::Unchanged => self.ok += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Unreachable => self.unreachable += 1,
        }
    }
}

impl fmt::Display for Recap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} changed={} unreachable={} failed={} skipped={}",
            self.ok, self.changed, self.unreachable, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(action: &str, outcome: Outcome) -> ActionResult {
        ActionResult {
            action: action.to_string(),
            module: ModuleKind::Shell,
            handler: false,
            outcome,
            message: None,
            payload: ValueMap::new(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_recap_counts() {
        let report = RunReport {
            plays: vec![PlayReport {
                name: "site".into(),
                hosts: vec![
                    HostRun {
                        alias: "web-1".into(),
                        status: HostStatus::Ok,
                        results: vec![
                            result("a", Outcome::Changed),
                            result("b", Outcome::Unchanged),
                            result("c", Outcome::Skipped),
                        ],
                    },
                    HostRun {
                        alias: "web-2".into(),
                        status: HostStatus::Unreachable,
                        results: vec![result("a", Outcome::Unreachable)],
                    },
                ],
            }],
            ..RunReport::default()
        };

        let recap = report.recap();
        assert_eq!(
            recap["web-1"],
            Recap {
                ok: 2,
                changed: 1,
                unreachable: 0,
                failed: 0,
                skipped: 1
            }
        );
        assert_eq!(recap["web-2"].unreachable, 1);
        assert!(!report.is_success());
        assert_eq!(report.failed_hosts().into_iter().collect::<Vec<_>>(), ["web-2"]);
        assert!(report.to_string().contains("ok=2 changed=1 unreachable=0 failed=0 skipped=1"));
    }
}
