pub mod agent_loop;
pub mod context;
pub mod session;

pub use agent_loop::AgentRunner;
pub use context::ContextBuilder;
pub use session::SessionManager;
