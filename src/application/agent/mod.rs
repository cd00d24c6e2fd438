mod directive;
mod errors;
mod events;
mod models;
mod runner;
mod runtime;

#[cfg(test)]
mod tests;

pub use errors::{AgentError, ToolError};
pub use events::AgentEvent;
pub use models::{AgentOptions, AgentOutcome, AgentStep};
pub use runner::Agent;
