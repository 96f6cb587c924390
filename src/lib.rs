pub mod cli;
pub mod config;
pub mod context;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod rag;
pub mod requirements;
pub mod research;
pub mod session;
pub mod tasks;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use context::AppContext;
pub use orchestrator::{Orchestrator, Role, TurnResult};
