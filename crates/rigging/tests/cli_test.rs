#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! once assert_cmd 2.1 is the floor

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

const SITE: &str = r#"
variables:
  greeting: hello
resources:
  - type: local_directory
    name: site
    attributes:
      path: site
  - type: local_file
    name: index
    attributes:
      path: ${local_directory.site.path}/index.html
      content: "<h1>${var.greeting | upper}</h1>"
"#;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("rig").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("rig").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rigging"));
}

#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("rig").unwrap();
    cmd.args(["apply", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--continue-on-error"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("rig").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_plan_reports_pending_changes() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);

    project
        .rig()
        .args(["plan", "site.yaml"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("+ create local_directory.site"))
        .stdout(predicate::str::contains("+ create local_file.index"))
        .stdout(predicate::str::contains("2 to create"));

    assert!(project.read("site/index.html").is_none());
}

#[test]
fn test_apply_without_yes_changes_nothing() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);

    project
        .rig()
        .args(["apply", "site.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));

    assert!(project.read("site/index.html").is_none());
    assert!(!project.path().join(".rigging/state.json").exists());
}

#[test]
fn test_apply_then_plan_is_clean() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);

    project
        .rig()
        .args(["apply", "site.yaml", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Apply complete"));

    assert_eq!(project.read("site/index.html").unwrap(), "<h1>HELLO</h1>");
    assert!(project.path().join(".rigging/state.json").exists());

    project
        .rig()
        .args(["plan", "site.yaml"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("No changes"));

    project
        .rig()
        .args(["state", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local_file.index"))
        .stdout(predicate::str::contains("site/index.html"));
}

#[test]
fn test_refresh_restores_deleted_file() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);
    project
        .rig()
        .args(["apply", "site.yaml", "--yes"])
        .assert()
        .success();

    std::fs::remove_file(project.path().join("site/index.html")).unwrap();

    // Without refresh the snapshot still claims the file exists
    project
        .rig()
        .args(["plan", "site.yaml"])
        .assert()
        .code(0);

    project
        .rig()
        .args(["apply", "site.yaml", "--refresh", "--yes"])
        .assert()
        .success();
    assert_eq!(project.read("site/index.html").unwrap(), "<h1>HELLO</h1>");
}

#[test]
fn test_destroy_plan() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);
    project
        .rig()
        .args(["apply", "site.yaml", "--yes"])
        .assert()
        .success();

    project
        .rig()
        .args(["apply", "site.yaml", "--destroy", "--yes"])
        .assert()
        .success();
    assert!(!project.path().join("site").exists());

    project
        .rig()
        .args(["state", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No resources recorded"));
}

#[test]
fn test_custom_state_path() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);

    project
        .rig()
        .args(["apply", "site.yaml", "--yes", "--state", "custom.json"])
        .assert()
        .success();
    assert!(project.path().join("custom.json").exists());
    assert!(!project.path().join(".rigging/state.json").exists());
}

#[test]
fn test_plan_unknown_target() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);

    project
        .rig()
        .args(["plan", "site.yaml", "--target", "nonsense"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("type.name"));
}

#[test]
fn test_validate_desired_state() {
    let project = TestProject::new();
    project.write("site.yaml", SITE);

    project
        .rig()
        .args(["validate", "site.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 resources"));
}

#[test]
fn test_validate_unknown_resource_type() {
    let project = TestProject::new();
    project.write(
        "bad.yaml",
        "resources:\n  - type: cloud_server\n    name: web\n    attributes: {}\n",
    );

    project
        .rig()
        .args(["validate", "bad.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cloud_server"));
}

#[test]
fn test_validate_playbook() {
    let project = TestProject::new();
    project.write(
        "site.yml",
        r#"
plays:
  - name: web
    hosts: all
    actions:
      - name: say hi
        debug:
          msg: hi
"#,
    );

    project
        .rig()
        .args(["validate", "site.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("playbook, 1 plays"));
}

#[test]
fn test_validate_rejects_unknown_handler() {
    let project = TestProject::new();
    project.write(
        "site.yml",
        r#"
plays:
  - name: web
    hosts: all
    actions:
      - name: say hi
        debug:
          msg: hi
        notify: restart nothing
"#,
    );

    project
        .rig()
        .args(["validate", "site.yml"])
        .assert()
        .failure();
}

#[cfg(unix)]
mod run {
    use super::*;

    const INVENTORY: &str = r#"
hosts:
  - alias: box
    address: localhost
    connection:
      type: local
"#;

    #[test]
    fn test_run_local_host() {
        let project = TestProject::new();
        let target = project.path().join("out");
        project.write("inventory.yaml", INVENTORY);
        project.write(
            "site.yml",
            &format!(
                r#"
plays:
  - name: setup
    hosts: all
    actions:
      - name: out directory
        file:
          path: {dir}
          state: directory
      - name: marker
        copy:
          dest: {dir}/marker
          content: "${{host.alias}}"
"#,
                dir = target.display()
            ),
        );

        project
            .rig()
            .args(["run", "site.yml", "-i", "inventory.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PLAY RECAP"))
            .stdout(predicate::str::contains("changed=2"));
        assert_eq!(std::fs::read_to_string(target.join("marker")).unwrap(), "box");

        // Second run changes nothing
        project
            .rig()
            .args(["run", "site.yml", "-i", "inventory.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("changed=0"));
    }

    #[test]
    fn test_run_failure_exit_code() {
        let project = TestProject::new();
        project.write("inventory.yaml", INVENTORY);
        project.write(
            "site.yml",
            r#"
plays:
  - name: broken
    hosts: box
    actions:
      - name: fails
        shell: exit 3
"#,
        );

        project
            .rig()
            .args(["run", "site.yml", "-i", "inventory.yaml"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("failed=1"));
    }

    #[test]
    fn test_run_hosts_from_state() {
        let project = TestProject::new();
        project.write("site.yaml", SITE);
        project
            .rig()
            .args(["apply", "site.yaml", "--yes"])
            .assert()
            .success();

        project.write(
            "inventory.yaml",
            r#"
from_state:
  - type: local_directory
    address_attribute: path
    groups: [sites]
    connection:
      type: local
"#,
        );
        project.write(
            "check.yml",
            r#"
plays:
  - name: check
    hosts: sites
    actions:
      - name: directory exists
        command: test -d ${host.address}
"#,
        );

        project
            .rig()
            .args(["run", "check.yml", "-i", "inventory.yaml"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[site] directory exists"));
    }
}
