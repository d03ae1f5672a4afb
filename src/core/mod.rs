//! 核心编排层：错误类型、跨轮次状态、会话监管与主编排器

pub mod error;
pub mod history;
pub mod orchestrator;
pub mod session_supervisor;

pub use error::AgentError;
pub use history::{ConversationMemory, HistoryEntry, RecentHistory};
pub use orchestrator::{
    create_from_config, fallback_summary, ExecutionReport, Orchestrator, OrchestratorOptions,
    TurnReport, ALL_FAILED_MESSAGE,
};
pub use session_supervisor::SessionSupervisor;
