//! Convergence run: plays over hosts, actions per host, then handlers

use crate::error::{ConvergeError, ExecError, Result};
use crate::executor::{ExecOutput, RemoteExecutor};
use crate::inventory::{Host, Inventory};
use crate::module::ModuleKind;
use crate::playbook::{Action, Play, Playbook};
use crate::report::{ActionResult, HostRun, HostStatus, Outcome, PlayReport, RunReport};
use rigging_core::{
    CallError, CallPolicy, CancellationToken, Expression, LayeredScope, Scope, Value, ValueMap,
    call_with_policy, render_value,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of hosts worked on at once
pub const DEFAULT_FORKS: usize = 5;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on concurrently running hosts
    pub forks: usize,
    /// Timeout and retry for each executor call
    pub call_policy: CallPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            forks: DEFAULT_FORKS,
            call_policy: CallPolicy::default(),
        }
    }
}

/// Run every play of `playbook` against the matching hosts.
///
/// Patterns are resolved before anything runs, so an unknown host or group
/// is an error with no side effects. Inside a play each host runs in its own
/// task, bounded by `forks`; actions on one host run strictly in order. A
/// host that fails or is unreachable skips its handlers and every later
/// play. Variables bound by `register` and `set_fact` stay with the host for
/// the rest of the run.
pub async fn run(
    playbook: &Playbook,
    inventory: &Inventory,
    executor: Arc<dyn RemoteExecutor>,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    if options.forks == 0 {
        return Err(ConvergeError::validation("forks must be at least 1"));
    }
    let selections = playbook
        .plays()
        .iter()
        .map(|play| inventory.select(&play.hosts))
        .collect::<Result<Vec<_>>>()?;

    let started = Instant::now();
    let forks = Arc::new(Semaphore::new(options.forks));
    let mut report = RunReport::default();
    let mut host_vars: BTreeMap<String, ValueMap> = BTreeMap::new();
    let mut down: BTreeSet<String> = BTreeSet::new();

    for (play, hosts) in playbook.plays().iter().zip(selections) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let hosts: Vec<&Host> = hosts
            .into_iter()
            .filter(|h| !down.contains(&h.alias))
            .collect();
        tracing::info!(play = %play.name, hosts = hosts.len(), "Starting play");

        let shared = Arc::new(play.clone());
        let mut tasks = JoinSet::new();
        for host in &hosts {
            let worker = HostWorker {
                play: shared.clone(),
                host: (*host).clone(),
                locals: host_vars.remove(&host.alias).unwrap_or_default(),
                executor: executor.clone(),
                policy: options.call_policy.clone(),
                cancel: cancel.clone(),
                results: Vec::new(),
                notified: Vec::new(),
            };
            let forks = forks.clone();
            tasks.spawn(worker.run(forks));
        }

        let mut finished: BTreeMap<String, HostRun> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((run, locals)) => {
                    host_vars.insert(run.alias.clone(), locals);
                    finished.insert(run.alias.clone(), run);
                }
                Err(e) => tracing::error!(error = %e, play = %play.name, "Host task panicked"),
            }
        }

        let mut play_report = PlayReport {
            name: play.name.clone(),
            hosts: Vec::with_capacity(hosts.len()),
        };
        for host in hosts {
            let run = finished.remove(&host.alias).unwrap_or_else(|| HostRun {
                alias: host.alias.clone(),
                status: HostStatus::Failed,
                results: Vec::new(),
            });
            match run.status {
                HostStatus::Failed | HostStatus::Unreachable => {
                    down.insert(run.alias.clone());
                }
                HostStatus::Cancelled => report.cancelled = true,
                HostStatus::Ok => {}
            }
            play_report.hosts.push(run);
        }
        report.plays.push(play_report);
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        plays = report.plays.len(),
        failed = report.failed_hosts().len(),
        cancelled = report.cancelled,
        "Run finished"
    );
    Ok(report)
}

/// What to do after an action
enum Step {
    Continue,
    Stop(HostStatus),
}

/// Result of the synchronous half of an action
enum Prepared {
    Skip,
    Fail(String),
    /// Local module already evaluated; facts to bind, if any
    Done(std::result::Result<ExecOutput, String>, Option<ValueMap>),
    Remote(ValueMap),
}

struct HostWorker {
    play: Arc<Play>,
    host: Host,
    /// Registered results and facts, host-local
    locals: ValueMap,
    executor: Arc<dyn RemoteExecutor>,
    policy: CallPolicy,
    cancel: CancellationToken,
    results: Vec<ActionResult>,
    /// Handlers in first-notified order
    notified: Vec<String>,
}

impl HostWorker {
    async fn run(mut self, forks: Arc<Semaphore>) -> (HostRun, ValueMap) {
        let permit = tokio::select! {
            permit = forks.acquire_owned() => permit.ok(),
            _ = self.cancel.cancelled() => None,
        };
        let Some(_permit) = permit else {
            return self.finish(HostStatus::Cancelled);
        };

        let play = self.play.clone();
        for action in &play.actions {
            if let Step::Stop(status) = self.step(action, false).await {
                tracing::warn!(host = %self.host.alias, ?status, "Host stopped, handlers skipped");
                return self.finish(status);
            }
        }

        let mut next = 0;
        while next < self.notified.len() {
            let name = self.notified[next].clone();
            next += 1;
            let Some(handler) = play.handler(&name) else {
                continue;
            };
            if let Step::Stop(status) = self.step(handler, true).await {
                return self.finish(status);
            }
        }
        self.finish(HostStatus::Ok)
    }

    fn finish(self, status: HostStatus) -> (HostRun, ValueMap) {
        let run = HostRun {
            alias: self.host.alias,
            status,
            results: self.results,
        };
        (run, self.locals)
    }

    async fn step(&mut self, action: &Action, handler: bool) -> Step {
        if self.cancel.is_cancelled() {
            return Step::Stop(HostStatus::Cancelled);
        }
        let started = Instant::now();

        let executed = match self.prepare(action) {
            Prepared::Skip => {
                self.record(action, handler, Outcome::Skipped, None, ValueMap::new(), started);
                return Step::Continue;
            }
            Prepared::Fail(message) => Err(ExecError::Failed(message)),
            Prepared::Done(result, facts) => {
                if let Some(facts) = facts {
                    self.locals.extend(facts);
                }
                result.map_err(ExecError::Failed)
            }
            Prepared::Remote(params) => {
                let executor = &self.executor;
                let host = &self.host;
                let module = action.module;
                match call_with_policy(&self.policy, &self.cancel, |_| {
                    executor.execute(host, module, &params)
                })
                .await
                {
                    Ok(output) => Ok(output),
                    Err(CallError::Failed(e)) => Err(e),
                    Err(CallError::Timeout(limit)) => Err(ExecError::Timeout(format!(
                        "no answer after {}s",
                        limit.as_secs_f64()
                    ))),
                    Err(CallError::Cancelled) => return Step::Stop(HostStatus::Cancelled),
                }
            }
        };

        match executed {
            Ok(output) => {
                let outcome = if output.changed {
                    Outcome::Changed
                } else {
                    Outcome::Unchanged
                };
                if output.changed {
                    for name in &action.notify {
                        if !self.notified.contains(name) {
                            self.notified.push(name.clone());
                        }
                    }
                }
                let message = output
                    .payload
                    .get("msg")
                    .map(rigging_core::value::to_display);
                self.record(action, handler, outcome, message, output.payload, started);
                Step::Continue
            }
            Err(ExecError::Unreachable(message)) => {
                self.record(
                    action,
                    handler,
                    Outcome::Unreachable,
                    Some(message),
                    ValueMap::new(),
                    started,
                );
                Step::Stop(HostStatus::Unreachable)
            }
            Err(e) => {
                self.record(
                    action,
                    handler,
                    Outcome::Failed,
                    Some(e.to_string()),
                    ValueMap::new(),
                    started,
                );
                if action.ignore_errors {
                    Step::Continue
                } else {
                    Step::Stop(HostStatus::Failed)
                }
            }
        }
    }

    /// Evaluate the condition, render parameters and run local modules
    fn prepare(&self, action: &Action) -> Prepared {
        let facts = self.host.facts();
        let scope = LayeredScope::new()
            .with(&self.locals)
            .with(&self.play.vars)
            .with(&self.host.vars)
            .with(&facts);

        if let Some(condition) = &action.when {
            match condition.evaluate_bool(&scope) {
                Ok(true) => {}
                Ok(false) => return Prepared::Skip,
                Err(e) => return Prepared::Fail(format!("condition '{condition}': {e}")),
            }
        }

        let mut params = ValueMap::new();
        for (key, value) in &action.params {
            match render_value(value, &scope) {
                Ok(rendered) => {
                    params.insert(key.clone(), rendered);
                }
                Err(e) => return Prepared::Fail(format!("parameter '{key}': {e}")),
            }
        }
        if let Err(e) = action.module.schema().validate(&params) {
            return Prepared::Fail(format!("{}: {e}", action.module));
        }

        match action.module {
            ModuleKind::Debug => Prepared::Done(debug(&params, &scope), None),
            ModuleKind::SetFact => Prepared::Done(
                Ok(ExecOutput::unchanged().with_payload("facts", json!(params))),
                Some(params),
            ),
            ModuleKind::Assert => Prepared::Done(assert(&params, &scope), None),
            _ => Prepared::Remote(params),
        }
    }

    fn record(
        &mut self,
        action: &Action,
        handler: bool,
        outcome: Outcome,
        message: Option<String>,
        payload: ValueMap,
        started: Instant,
    ) {
        tracing::info!(
            host = %self.host.alias,
            action = %action.name,
            handler,
            %outcome,
            "Action finished"
        );

        if let Some(name) = &action.register {
            let mut registered = payload.clone();
            registered.insert("changed".into(), json!(outcome == Outcome::Changed));
            registered.insert(
                "failed".into(),
                json!(matches!(outcome, Outcome::Failed | Outcome::Unreachable)),
            );
            registered.insert("skipped".into(), json!(outcome == Outcome::Skipped));
            if let Some(message) = &message {
                registered.insert("msg".into(), json!(message));
            }
            self.locals
                .insert(name.clone(), Value::Object(registered.into_iter().collect()));
        }

        self.results.push(ActionResult {
            action: action.name.clone(),
            module: action.module,
            handler,
            outcome,
            message,
            payload,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

fn debug(params: &ValueMap, scope: &dyn Scope) -> std::result::Result<ExecOutput, String> {
    let msg = match (params.get("msg"), params.get("var").and_then(Value::as_str)) {
        (Some(msg), _) => msg.clone(),
        (None, Some(var)) => Expression::parse(var)
            .and_then(|e| e.evaluate(scope))
            .map_err(|e| format!("var '{var}': {e}"))?,
        (None, None) => json!("Hello world!"),
    };
    Ok(ExecOutput::unchanged().with_payload("msg", msg))
}

fn assert(params: &ValueMap, scope: &dyn Scope) -> std::result::Result<ExecOutput, String> {
    let that: Vec<&str> = match params.get("that") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    for source in that {
        let holds = Expression::parse(source)
            .and_then(|e| e.evaluate_bool(scope))
            .map_err(|e| format!("assertion '{source}': {e}"))?;
        if !holds {
            return Err(match params.get("fail_msg").and_then(Value::as_str) {
                Some(msg) => msg.to_string(),
                None => format!("assertion failed: {source}"),
            });
        }
    }
    Ok(ExecOutput::unchanged().with_payload("msg", json!("All assertions passed")))
}
