pub mod config;
pub mod market;
pub mod message;
pub mod request;
pub mod stage;
pub mod state;
pub mod store_schema;

pub use config::{
    BackendConfig, MemoryConfig, PersistenceConfig, ToolConfig, TradegraphConfig, WorkflowConfig,
};
pub use market::Market;
pub use message::{Message, Role, ToolCall};
pub use request::{AnalysisRequest, AnalysisResponse, RunStatus, StepOutcome, StepRecord};
pub use stage::{DebateSide, Domain, RiskPosture, StageId};
pub use state::{
    DebateState, MessagesUpdate, Reports, RiskState, SharedState, StateDelta, StateError,
    ToolCallCounts,
};
