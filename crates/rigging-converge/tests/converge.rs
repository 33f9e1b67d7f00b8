//! Convergence scenarios against an in-memory executor

use async_trait::async_trait;
use rigging_converge::{
    ExecError, ExecOutput, Host, HostStatus, Inventory, ModuleKind, Outcome, Playbook,
    RemoteExecutor, RunOptions, RunReport, run,
};
use rigging_core::{CallPolicy, CancellationToken, RetryPolicy, ValueMap};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pretends to be a fleet: remembers installed packages and file contents
/// per host, and answers `shell: echo X` with stdout `X`.
#[derive(Default)]
struct StubExecutor {
    packages: Mutex<BTreeMap<String, BTreeSet<String>>>,
    files: Mutex<BTreeMap<(String, String), String>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<(String, String)>>,
    unreachable: BTreeSet<String>,
    delay: Option<Duration>,
    cancel_on: Option<(String, CancellationToken)>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubExecutor {
    fn fail(&self, host: &str, cmd: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert((host.to_string(), cmd.to_string()));
    }

    fn calls_for(&self, host: &str) -> Vec<String> {
        let prefix = format!("{host}: ");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn text(params: &ValueMap, key: &str) -> String {
    params[key].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl RemoteExecutor for StubExecutor {
    fn name(&self) -> &str {
        "stub"
    }

    async fn execute(
        &self,
        host: &Host,
        module: ModuleKind,
        params: &ValueMap,
    ) -> Result<ExecOutput, ExecError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let alias = host.alias.clone();
        self.calls
            .lock()
            .unwrap()
            .push(format!("{alias}: {module} {}", json!(params)));
        if self.unreachable.contains(&alias) {
            return Err(ExecError::Unreachable(format!("{}: connection refused", host.address)));
        }

        match module {
            ModuleKind::Shell | ModuleKind::Command => {
                let cmd = text(params, "cmd");
                if let Some((trigger, token)) = &self.cancel_on {
                    if *trigger == cmd {
                        token.cancel();
                    }
                }
                if self.failing.lock().unwrap().contains(&(alias, cmd.clone())) {
                    return Err(ExecError::Failed(format!("exit status 1: {cmd}")));
                }
                let stdout = cmd.strip_prefix("echo ").unwrap_or_default();
                Ok(ExecOutput::changed().with_payload("stdout", json!(stdout)))
            }
            ModuleKind::Package => {
                let name = text(params, "name");
                let mut packages = self.packages.lock().unwrap();
                let installed = packages.entry(alias).or_default();
                if installed.insert(name) {
                    Ok(ExecOutput::changed())
                } else {
                    Ok(ExecOutput::unchanged())
                }
            }
            ModuleKind::Copy => {
                let key = (alias, text(params, "dest"));
                let content = text(params, "content");
                let mut files = self.files.lock().unwrap();
                if files.get(&key) == Some(&content) {
                    Ok(ExecOutput::unchanged())
                } else {
                    files.insert(key, content);
                    Ok(ExecOutput::changed())
                }
            }
            _ => Ok(ExecOutput::changed()),
        }
    }
}

fn fleet(aliases: &[&str]) -> Inventory {
    Inventory::new(
        aliases
            .iter()
            .enumerate()
            .map(|(i, a)| Host::new(*a, format!("10.0.0.{}", i + 1)).with_group("app"))
            .collect(),
    )
    .unwrap()
}

async fn run_with(
    book: &str,
    inventory: &Inventory,
    executor: Arc<StubExecutor>,
    options: &RunOptions,
) -> RunReport {
    let playbook = Playbook::from_yaml_str(book).unwrap();
    run(&playbook, inventory, executor, options, &CancellationToken::new())
        .await
        .unwrap()
}

const THREE_NOTIFIERS: &str = r#"
plays:
  - name: site
    hosts: all
    actions:
      - name: a
        copy: { dest: /etc/app/a.conf, content: "a" }
        notify: restart app
      - name: b
        copy: { dest: /etc/app/b.conf, content: "b" }
        notify: restart app
      - name: c
        copy: { dest: /etc/app/c.conf, content: "c" }
        notify: [restart app]
    handlers:
      - name: restart app
        service: { name: app, state: restarted }
"#;

#[tokio::test]
async fn test_handler_runs_once_per_run() {
    let stub = Arc::new(StubExecutor::default());
    let inventory = fleet(&["h1"]);
    let report = run_with(THREE_NOTIFIERS, &inventory, stub.clone(), &RunOptions::default()).await;

    let host = report.plays[0].host("h1").unwrap();
    assert_eq!(host.status, HostStatus::Ok);
    assert_eq!(host.outcomes(), vec![Outcome::Changed; 4]);
    assert!(host.results[3].handler);
    let restarts = stub
        .calls_for("h1")
        .iter()
        .filter(|c| c.starts_with("service"))
        .count();
    assert_eq!(restarts, 1);

    // Nothing changes the second time, so nothing is notified.
    let again = run_with(THREE_NOTIFIERS, &inventory, stub.clone(), &RunOptions::default()).await;
    assert_eq!(
        again.plays[0].host("h1").unwrap().outcomes(),
        vec![Outcome::Unchanged; 3]
    );
}

const TWO_STEPS: &str = r#"
plays:
  - name: deploy
    hosts: app
    actions:
      - name: first
        shell: echo one
      - name: second
        shell: echo two
        notify: reload
    handlers:
      - name: reload
        service: { name: app, state: restarted }
"#;

#[tokio::test]
async fn test_failed_host_is_isolated() {
    let stub = Arc::new(StubExecutor::default());
    stub.fail("h2", "echo two");
    let inventory = fleet(&["h1", "h2", "h3"]);
    let report = run_with(TWO_STEPS, &inventory, stub.clone(), &RunOptions::default()).await;
    let play = &report.plays[0];

    for alias in ["h1", "h3"] {
        let host = play.host(alias).unwrap();
        assert_eq!(host.status, HostStatus::Ok);
        assert_eq!(host.outcomes(), vec![Outcome::Changed; 3]);
    }

    let h2 = play.host("h2").unwrap();
    assert_eq!(h2.status, HostStatus::Failed);
    assert_eq!(h2.outcomes(), vec![Outcome::Changed, Outcome::Failed]);
    assert!(h2.results[1].message.as_deref().unwrap().contains("exit status 1"));
    assert!(!stub.calls_for("h2").iter().any(|c| c.starts_with("service")));

    assert!(!report.is_success());
    assert_eq!(report.failed_hosts().into_iter().collect::<Vec<_>>(), ["h2"]);
    assert_eq!(report.recap()["h2"].failed, 1);
    assert_eq!(report.recap()["h1"].changed, 3);
}

#[tokio::test]
async fn test_install_twice_reports_changed_then_unchanged() {
    let book = r#"
plays:
  - name: packages
    hosts: all
    actions:
      - name: install nginx
        package: { name: nginx, state: present }
"#;
    let stub = Arc::new(StubExecutor::default());
    let inventory = fleet(&["h1"]);
    let first = run_with(book, &inventory, stub.clone(), &RunOptions::default()).await;
    let second = run_with(book, &inventory, stub.clone(), &RunOptions::default()).await;

    let outcomes: Vec<Outcome> = first
        .results_for("h1")
        .chain(second.results_for("h1"))
        .map(|r| r.outcome)
        .collect();
    assert_eq!(outcomes, [Outcome::Changed, Outcome::Unchanged]);
}

#[tokio::test]
async fn test_register_and_conditions() {
    let book = r#"
plays:
  - name: facts
    hosts: all
    vars:
      wanted: debian
    actions:
      - name: detect
        shell: echo debian
        register: os
      - name: debian only
        package: { name: apt-transport-https }
        when: os.stdout == wanted
      - name: redhat only
        package: { name: dnf-utils }
        when: "os.stdout == 'redhat'"
      - name: report
        debug: { msg: "changed=${os.changed} on ${host.alias}" }
"#;
    let stub = Arc::new(StubExecutor::default());
    let report = run_with(book, &fleet(&["h1"]), stub.clone(), &RunOptions::default()).await;
    let host = report.plays[0].host("h1").unwrap();

    assert_eq!(
        host.outcomes(),
        [
            Outcome::Changed,
            Outcome::Changed,
            Outcome::Skipped,
            Outcome::Unchanged
        ]
    );
    assert_eq!(
        host.result("report").unwrap().message.as_deref(),
        Some("changed=true on h1")
    );
    // debug never reaches the executor
    assert_eq!(stub.calls_for("h1").len(), 2);
}

#[tokio::test]
async fn test_facts_are_host_local_and_survive_plays() {
    let book = r#"
plays:
  - name: mark
    hosts: all
    actions:
      - name: primary
        set_fact: { role: primary }
        when: host.alias == 'h1'
  - name: check
    hosts: all
    actions:
      - name: role
        debug: { msg: "${role | default('none')}" }
"#;
    let stub = Arc::new(StubExecutor::default());
    let report = run_with(book, &fleet(&["h1", "h2"]), stub, &RunOptions::default()).await;
    let check = &report.plays[1];
    assert_eq!(
        check.host("h1").unwrap().results[0].message.as_deref(),
        Some("primary")
    );
    assert_eq!(
        check.host("h2").unwrap().results[0].message.as_deref(),
        Some("none")
    );
}

#[tokio::test]
async fn test_assert_and_undefined_variables_fail_the_host() {
    let book = r#"
plays:
  - name: checks
    hosts: all
    actions:
      - name: memory
        assert:
          that: ["memory_mb >= 2048"]
          fail_msg: not enough memory
      - name: never
        shell: echo unreachable
"#;
    let inventory = Inventory::new(vec![
        Host::new("big", "10.0.0.1").with_var("memory_mb", json!(4096)),
        Host::new("small", "10.0.0.2").with_var("memory_mb", json!(512)),
        Host::new("unknown", "10.0.0.3"),
    ])
    .unwrap();
    let report = run_with(book, &inventory, Arc::new(StubExecutor::default()), &RunOptions::default()).await;
    let play = &report.plays[0];

    assert_eq!(play.host("big").unwrap().outcomes(), [Outcome::Unchanged, Outcome::Changed]);
    let small = play.host("small").unwrap();
    assert_eq!(small.outcomes(), [Outcome::Failed]);
    assert_eq!(small.results[0].message.as_deref(), Some("not enough memory"));
    let unknown = play.host("unknown").unwrap();
    assert!(unknown.results[0]
        .message
        .as_deref()
        .unwrap()
        .contains("Undefined variable: memory_mb"));
}

#[tokio::test]
async fn test_failed_host_skips_later_plays() {
    let book = r#"
plays:
  - name: one
    hosts: all
    actions:
      - name: prepare
        shell: echo prepare
  - name: two
    hosts: all
    actions:
      - name: finish
        shell: echo finish
"#;
    let stub = Arc::new(StubExecutor::default());
    stub.fail("h2", "echo prepare");
    let report = run_with(book, &fleet(&["h1", "h2"]), stub.clone(), &RunOptions::default()).await;

    let second: Vec<&str> = report.plays[1].hosts.iter().map(|h| h.alias.as_str()).collect();
    assert_eq!(second, ["h1"]);
    assert_eq!(stub.calls_for("h2").len(), 1);
}

#[tokio::test]
async fn test_ignore_errors_keeps_going() {
    let book = r#"
plays:
  - name: best effort
    hosts: all
    actions:
      - name: optional
        shell: echo optional
        ignore_errors: true
        register: opt
      - name: after
        debug: { msg: "failed=${opt.failed}" }
"#;
    let stub = Arc::new(StubExecutor::default());
    stub.fail("h1", "echo optional");
    let report = run_with(book, &fleet(&["h1"]), stub, &RunOptions::default()).await;
    let host = report.plays[0].host("h1").unwrap();

    assert_eq!(host.status, HostStatus::Ok);
    assert_eq!(host.outcomes(), [Outcome::Failed, Outcome::Unchanged]);
    assert_eq!(host.results[1].message.as_deref(), Some("failed=true"));
    assert!(report.is_success());
}

#[tokio::test]
async fn test_handler_chaining() {
    let book = r#"
plays:
  - name: chain
    hosts: all
    actions:
      - name: config
        copy: { dest: /etc/app.conf, content: "x" }
        notify: [restart app, flush cache]
      - name: more config
        copy: { dest: /etc/app2.conf, content: "y" }
        notify: restart app
    handlers:
      - name: flush cache
        shell: echo flush
      - name: restart app
        service: { name: app, state: restarted }
        notify: [flush cache, announce]
      - name: announce
        shell: echo announce
"#;
    let stub = Arc::new(StubExecutor::default());
    let report = run_with(book, &fleet(&["h1"]), stub, &RunOptions::default()).await;
    let host = report.plays[0].host("h1").unwrap();

    let handlers: Vec<&str> = host
        .results
        .iter()
        .filter(|r| r.handler)
        .map(|r| r.action.as_str())
        .collect();
    assert_eq!(handlers, ["restart app", "flush cache", "announce"]);
}

#[tokio::test]
async fn test_unreachable_host() {
    let stub = Arc::new(StubExecutor {
        unreachable: BTreeSet::from(["h2".to_string()]),
        ..StubExecutor::default()
    });
    let report = run_with(TWO_STEPS, &fleet(&["h1", "h2"]), stub, &RunOptions::default()).await;

    let h2 = report.plays[0].host("h2").unwrap();
    assert_eq!(h2.status, HostStatus::Unreachable);
    assert_eq!(h2.outcomes(), [Outcome::Unreachable]);
    assert_eq!(report.recap()["h2"].unreachable, 1);
    assert_eq!(report.plays[0].host("h1").unwrap().status, HostStatus::Ok);
}

#[tokio::test(start_paused = true)]
async fn test_fork_limit() {
    let stub = Arc::new(StubExecutor {
        delay: Some(Duration::from_millis(100)),
        ..StubExecutor::default()
    });
    let aliases = ["h1", "h2", "h3", "h4", "h5", "h6"];
    let options = RunOptions {
        forks: 2,
        ..RunOptions::default()
    };
    let report = run_with(TWO_STEPS, &fleet(&aliases), stub.clone(), &options).await;

    assert!(report.is_success());
    assert_eq!(stub.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(stub.call_count(), 6 * 3);
}

#[tokio::test(start_paused = true)]
async fn test_executor_timeout_fails_the_action() {
    let stub = Arc::new(StubExecutor {
        delay: Some(Duration::from_secs(30)),
        ..StubExecutor::default()
    });
    let options = RunOptions {
        call_policy: CallPolicy::new(Some(Duration::from_secs(1)), RetryPolicy::none()),
        ..RunOptions::default()
    };
    let report = run_with(TWO_STEPS, &fleet(&["h1"]), stub, &options).await;
    let host = report.plays[0].host("h1").unwrap();

    assert_eq!(host.status, HostStatus::Failed);
    assert_eq!(host.outcomes(), [Outcome::Failed]);
    assert!(host.results[0].message.as_deref().unwrap().contains("no answer after 1s"));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let stub = Arc::new(StubExecutor::default());
    let playbook = Playbook::from_yaml_str(TWO_STEPS).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = run(&playbook, &fleet(&["h1"]), stub.clone(), &RunOptions::default(), &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert!(report.plays.is_empty());
    assert_eq!(stub.call_count(), 0);
}

#[tokio::test]
async fn test_cancelled_mid_run_keeps_completed_work() {
    let cancel = CancellationToken::new();
    let stub = Arc::new(StubExecutor {
        cancel_on: Some(("echo one".to_string(), cancel.clone())),
        ..StubExecutor::default()
    });
    let playbook = Playbook::from_yaml_str(TWO_STEPS).unwrap();

    let report = run(&playbook, &fleet(&["h1"]), stub.clone(), &RunOptions::default(), &cancel)
        .await
        .unwrap();
    let host = report.plays[0].host("h1").unwrap();
    assert_eq!(host.status, HostStatus::Cancelled);
    assert_eq!(host.outcomes(), [Outcome::Changed]);
    assert!(report.cancelled);
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_unknown_pattern_runs_nothing() {
    let book = TWO_STEPS.replace("hosts: app", "hosts: app:db");
    let stub = Arc::new(StubExecutor::default());
    let playbook = Playbook::from_yaml_str(&book).unwrap();
    let err = tokio_test::assert_err!(
        run(
            &playbook,
            &fleet(&["h1"]),
            stub.clone(),
            &RunOptions::default(),
            &CancellationToken::new(),
        )
        .await
    );

    assert!(err.to_string().contains("'db'"));
    assert_eq!(stub.call_count(), 0);
}
