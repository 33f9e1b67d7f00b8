use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch project directory with its own (empty) settings file
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        // Keeps a global settings file on the machine out of the picture
        fs::write(root.path().join("rigging.yaml"), "").unwrap();
        Self { root }
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    #[allow(dead_code)]
    pub fn read(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.root.path().join(name)).ok()
    }

    /// `rig` running inside the project directory
    pub fn rig(&self) -> Command {
        let mut cmd = Command::cargo_bin("rig").unwrap();
        cmd.current_dir(self.path())
            .env_remove("RIGGING_CONFIG")
            .env_remove("RIGGING_STATE")
            .env_remove("RUST_LOG");
        cmd
    }
}
