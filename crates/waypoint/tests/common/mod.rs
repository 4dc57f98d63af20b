//! Common test utilities for Waypoint integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Environment variables that would leak the host setup into a test
const OVERRIDES: &[&str] = &[
    "OLLAMA_BASE_URL",
    "OLLAMA_NUM_THREADS",
    "WAYPOINT_MODEL",
    "WAYPOINT_MAX_TOOL_LOOPS",
    "WAYPOINT_PORT",
    "WAYPOINT_STREAM",
    "WAYPOINT_THINK",
    "WAYPOINT_SHOW_THOUGHTS",
    "WAYPOINT_SHOW_TOOL_RESULTS",
    "MAX_TOOL_CALL_LOOPS_FOR_USERINPUT",
    "ENABLE_STREAM",
    "ENABLE_THINKING",
    "SHOW_THOUGHTS",
    "AGENT_WITH_TOOLS_SHOW_RESPONSES",
    "AGENT_ATHUR_PORT",
    "RUST_LOG",
];

/// Isolated home directory for one test
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let data_dir = temp_dir.path().join(".waypoint");

        Ok(Self { temp_dir, data_dir })
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Command running against the isolated home
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_waypoint"));
        cmd.env("HOME", self.temp_dir.path());
        for key in OVERRIDES {
            cmd.env_remove(key);
        }
        cmd
    }

    /// Write a config pointing the agent at `base_url`
    pub fn create_config(&self, base_url: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let config = serde_json::json!({
            "agent": {
                "name": "Annelise",
                "model": "test-model",
                "timeout_secs": 5
            },
            "ollama": { "base_url": base_url },
            "remotes": []
        });
        std::fs::write(self.config_file(), serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
