pub mod config;
pub mod dispatch;
pub mod events;
pub mod projects;
pub mod registry;
pub mod session;

pub use dispatch::Dispatcher;
pub use events::EventBus;
pub use projects::{DirectoryProjects, ProjectRegistry};
pub use registry::SessionManager;
pub use session::{ChatSession, SessionState};
