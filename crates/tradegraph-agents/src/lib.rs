pub mod analyst;
pub mod backend;
pub mod claude_cli;
pub mod debate;
pub mod engine;
pub mod error;
pub mod graph;
pub mod memory;
pub mod parser;
pub mod prompts;
pub mod pruner;
pub mod risk;
pub mod stage;
pub mod tools;
pub mod trader;

pub mod test_support;

pub use backend::{BackendResponse, ReasoningBackend, ToolSpec};
pub use claude_cli::{ClaudeCliBackend, ClaudeCliConfig};
pub use engine::{EngineBuilder, RunOutcome, WorkflowEngine, WorkflowLimits};
pub use error::{AgentError, WorkflowError};
pub use graph::{AnalystSelection, Edge, Router, StageGraph, Transition};
pub use memory::{MemoryBank, NoopMemory, PastSituation, SituationMemory};
pub use stage::Stage;
pub use tools::{CommandTool, Tool, ToolCallAdapter, ToolRegistry};
