//! Tool substrate: the wire contract ([`registry::Tool`]), the name-keyed
//! registry with discovery, schema validation, the timeout-bounded executor,
//! and the built-in video-pipeline tools.

pub mod builtin;
pub mod executor;
pub mod registry;
pub mod schema;

pub use builtin::register_builtin_tools;
pub use executor::ToolExecutor;
pub use registry::{RegisteredTool, Tool, ToolRegistry};
