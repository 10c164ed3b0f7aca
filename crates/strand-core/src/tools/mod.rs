//! Tool plumbing for Strand
//!
//! Provides the tool registry and the session state tools operate on.
//! Concrete tools are registered by the embedding application.

pub mod registry;
pub mod state;

pub use registry::{parse_params, StructuredToolResult, Tool, ToolContext, ToolRegistry, ToolResult};
pub use state::SessionState;
