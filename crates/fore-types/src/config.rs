use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForemanConfig {
    pub agent: AgentConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The external coding-agent CLI to supervise.
    pub command: String,
    /// Fixed arguments passed on every run. The prompt itself is always
    /// written to stdin, never argv.
    #[serde(default)]
    pub args: Vec<String>,
    /// Hard ceiling on a single run, in seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Ceiling for the `is_ready` version probe, in seconds.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub log_level: String,
    /// Directory whose subdirectories are treated as projects.
    pub projects_root: PathBuf,
}

fn default_run_timeout() -> u64 {
    1800
}

fn default_ready_timeout() -> u64 {
    10
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                command: "claude".to_string(),
                args: vec!["--print".to_string()],
                run_timeout_secs: default_run_timeout(),
                ready_timeout_secs: default_ready_timeout(),
            },
            gateway: GatewayConfig {
                log_level: "info".to_string(),
                projects_root: PathBuf::from("projects"),
            },
        }
    }
}
