//! Executor that runs POSIX shell scripts locally or over ssh

use crate::error::ExecError;
use crate::executor::{ExecOutput, RemoteExecutor};
use crate::inventory::Host;
use crate::module::ModuleKind;
use async_trait::async_trait;
use rigging_core::ValueMap;
use serde_json::json;
use std::fmt::Write as _;
use std::process::Stdio;
use tokio::process::Command;

/// Line a script prints after it mutated the host
pub const CHANGED_MARKER: &str = "__RIGGING_CHANGED__";

/// ssh reserves this exit status for its own connection failures
const SSH_FAILURE: i32 = 255;

const PACKAGE_FUNCTIONS: &str = r#"installed() {
  if command -v dpkg-query >/dev/null 2>&1; then
    dpkg-query -W -f='${Status}' "$1" 2>/dev/null | grep -q 'ok installed'
  elif command -v rpm >/dev/null 2>&1; then
    rpm -q "$1" >/dev/null 2>&1
  elif command -v apk >/dev/null 2>&1; then
    apk info -e "$1" >/dev/null 2>&1
  else
    echo "no supported package manager" >&2
    exit 2
  fi
}
install_package() {
  if command -v apt-get >/dev/null 2>&1; then
    DEBIAN_FRONTEND=noninteractive apt-get install -y "$1"
  elif command -v dnf >/dev/null 2>&1; then
    dnf install -y "$1"
  elif command -v yum >/dev/null 2>&1; then
    yum install -y "$1"
  else
    apk add "$1"
  fi
}
remove_package() {
  if command -v apt-get >/dev/null 2>&1; then
    DEBIAN_FRONTEND=noninteractive apt-get remove -y "$1"
  elif command -v dnf >/dev/null 2>&1; then
    dnf remove -y "$1"
  elif command -v yum >/dev/null 2>&1; then
    yum remove -y "$1"
  else
    apk del "$1"
  fi
}
"#;

/// Runs each remote module as a check-then-act shell script.
///
/// Hosts with `connection.type == "local"` run through `sh -c` on this
/// machine; all others go through the system ssh client with `BatchMode`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    ssh_program: String,
    ssh_args: Vec<String>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_args: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ssh_program(mut self, program: impl Into<String>) -> Self {
        self.ssh_program = program.into();
        self
    }

    pub fn with_ssh_arg(mut self, arg: impl Into<String>) -> Self {
        self.ssh_args.push(arg.into());
        self
    }

    fn command(&self, host: &Host, script: &str) -> Command {
        if host.is_local() {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            return cmd;
        }

        let mut cmd = Command::new(&self.ssh_program);
        cmd.args(&self.ssh_args);
        if let Some(port) = host.connection.get("port") {
            cmd.arg("-p").arg(port);
        }
        if let Some(identity) = host.connection.get("identity_file") {
            cmd.arg("-i").arg(identity);
        }
        if let Some(user) = host.connection.get("user") {
            cmd.arg("-l").arg(user);
        }
        cmd.arg(&host.address).arg(format!("sh -c {}", quote(script)));
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(
        &self,
        host: &Host,
        module: ModuleKind,
        params: &ValueMap,
    ) -> Result<ExecOutput, ExecError> {
        let script = script(module, params)?;
        let mut cmd = self.command(host, &script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(host = %host.alias, %module, local = host.is_local(), "Running module script");

        let output = cmd
            .output()
            .await
            .map_err(|e| ExecError::Failed(format!("failed to start command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let code = output.status.code();

        if !host.is_local() && code == Some(SSH_FAILURE) {
            return Err(ExecError::Unreachable(format!("{}: {stderr}", host.address)));
        }

        let changed = stdout.lines().any(|l| l == CHANGED_MARKER);
        let stdout: Vec<&str> = stdout.lines().filter(|l| *l != CHANGED_MARKER).collect();
        let stdout = stdout.join("\n");

        match code {
            Some(0) => Ok(ExecOutput {
                changed,
                payload: ValueMap::from([
                    ("rc".to_string(), json!(0)),
                    ("stdout".to_string(), json!(stdout)),
                    ("stderr".to_string(), json!(stderr)),
                ]),
            }),
            Some(rc) => {
                let detail = if stderr.is_empty() { stdout } else { stderr };
                Err(ExecError::Failed(format!("exit status {rc}: {detail}")))
            }
            None => Err(ExecError::Failed("terminated by signal".to_string())),
        }
    }
}

/// Single-quote `s` for POSIX sh
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn param<'a>(params: &'a ValueMap, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

fn required<'a>(params: &'a ValueMap, key: &str) -> Result<&'a str, ExecError> {
    param(params, key).ok_or_else(|| ExecError::Failed(format!("missing parameter '{key}'")))
}

/// Build the check-then-act script for a remote module
pub fn script(module: ModuleKind, params: &ValueMap) -> Result<String, ExecError> {
    let mut s = String::new();
    match module {
        ModuleKind::Command | ModuleKind::Shell => {
            let cmd = required(params, "cmd")?;
            if let Some(dir) = param(params, "chdir") {
                let _ = writeln!(s, "cd {} || exit 1", quote(dir));
            }
            if let Some(path) = param(params, "creates") {
                let _ = writeln!(s, "if [ -e {} ]; then exit 0; fi", quote(path));
            }
            let _ = writeln!(s, "echo {CHANGED_MARKER}");
            if module == ModuleKind::Shell {
                s.push_str(cmd);
            } else {
                let words: Vec<String> = cmd.split_whitespace().map(quote).collect();
                let _ = write!(s, "exec {}", words.join(" "));
            }
            s.push('\n');
        }
        ModuleKind::Package => {
            let name = quote(required(params, "name")?);
            s.push_str("set -e\n");
            s.push_str(PACKAGE_FUNCTIONS);
            if param(params, "state") == Some("absent") {
                let _ = writeln!(
                    s,
                    "if installed {name}; then remove_package {name}; echo {CHANGED_MARKER}; fi"
                );
            } else {
                let _ = writeln!(
                    s,
                    "if ! installed {name}; then install_package {name}; echo {CHANGED_MARKER}; fi"
                );
            }
        }
        ModuleKind::File => {
            let path = quote(required(params, "path")?);
            s.push_str("set -e\n");
            match param(params, "state").unwrap_or("file") {
                "directory" => {
                    let _ = writeln!(
                        s,
                        "if [ ! -d {path} ]; then mkdir -p {path}; echo {CHANGED_MARKER}; fi"
                    );
                }
                "touch" => {
                    let _ = writeln!(
                        s,
                        "if [ ! -e {path} ]; then touch {path}; echo {CHANGED_MARKER}; fi"
                    );
                }
                "absent" => {
                    let _ = writeln!(
                        s,
                        "if [ -e {path} ] || [ -L {path} ]; then rm -rf {path}; echo {CHANGED_MARKER}; fi"
                    );
                    return Ok(s);
                }
                _ => {
                    let _ = writeln!(
                        s,
                        "if [ ! -e {path} ]; then echo {path}' does not exist' >&2; exit 1; fi"
                    );
                }
            }
            push_mode(&mut s, &path, param(params, "mode"));
        }
        ModuleKind::Copy => {
            let dest = quote(required(params, "dest")?);
            let content = quote(required(params, "content")?);
            s.push_str("set -e\n");
            let _ = writeln!(s, "dest={dest}");
            s.push_str("tmp=\"$dest.rigging.$$\"\n");
            let _ = writeln!(s, "printf '%s' {content} > \"$tmp\"");
            let _ = writeln!(
                s,
                "if [ -f \"$dest\" ] && cmp -s \"$tmp\" \"$dest\"; then rm -f \"$tmp\"; else mv \"$tmp\" \"$dest\"; echo {CHANGED_MARKER}; fi"
            );
            push_mode(&mut s, "\"$dest\"", param(params, "mode"));
        }
        ModuleKind::Service => {
            let name = quote(required(params, "name")?);
            s.push_str("set -e\n");
            match param(params, "state") {
                Some("started") => {
                    let _ = writeln!(
                        s,
                        "if ! systemctl is-active --quiet {name}; then systemctl start {name}; echo {CHANGED_MARKER}; fi"
                    );
                }
                Some("stopped") => {
                    let _ = writeln!(
                        s,
                        "if systemctl is-active --quiet {name}; then systemctl stop {name}; echo {CHANGED_MARKER}; fi"
                    );
                }
                Some("restarted") => {
                    let _ = writeln!(s, "systemctl restart {name}");
                    let _ = writeln!(s, "echo {CHANGED_MARKER}");
                }
                _ => {}
            }
            match params.get("enabled").and_then(|v| v.as_bool()) {
                Some(true) => {
                    let _ = writeln!(
                        s,
                        "if ! systemctl is-enabled --quiet {name}; then systemctl enable {name}; echo {CHANGED_MARKER}; fi"
                    );
                }
                Some(false) => {
                    let _ = writeln!(
                        s,
                        "if systemctl is-enabled --quiet {name}; then systemctl disable {name}; echo {CHANGED_MARKER}; fi"
                    );
                }
                None => {}
            }
        }
        ModuleKind::Debug | ModuleKind::SetFact | ModuleKind::Assert => {
            return Err(ExecError::Failed(format!(
                "module '{module}' is evaluated by the engine"
            )));
        }
    }
    Ok(s)
}

/// Append a chmod guarded by the current permission bits
fn push_mode(s: &mut String, target: &str, mode: Option<&str>) {
    let Some(mode) = mode else {
        return;
    };
    let short = match mode.trim_start_matches('0') {
        "" => "0",
        rest => rest,
    };
    let _ = writeln!(
        s,
        "cur=$(stat -c %a {target} 2>/dev/null || stat -f %Lp {target})"
    );
    let _ = writeln!(
        s,
        "if [ \"$cur\" != {short} ]; then chmod {mode} {target}; echo {CHANGED_MARKER}; fi"
    );
}
