mod error;
mod manager;
mod process;

pub use error::ToolInvokeError;
pub use manager::{ServerManager, ToolBridge, ToolDescriptor};
pub use process::ServerToolInfo;
