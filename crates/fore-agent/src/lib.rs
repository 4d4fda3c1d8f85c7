pub mod activity;
pub mod client;
pub mod kill_tree;
pub mod supervisor;
pub mod validator;

pub use activity::{ActivityParser, ActivityTracker};
pub use client::{AgentBackend, CliAgent};
pub use supervisor::ProcessSupervisor;
pub use validator::{CommandValidator, ValidationResult};
