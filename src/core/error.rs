//! 引擎错误类型
//!
//! 按传播方式分层：ToolInvocationFailed / TransportTimeout / Protocol 记入 StepOutcome；
//! ProviderTerminated / ProviderSpawn / Cancelled 中止整个计划并返回调用方；
//! 参数未解析不是错误（标记原样保留，由调用方重新扫描发现）。

use thiserror::Error;

/// 编排、传输与 LLM 调用过程中的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// Provider 返回了 error 字段或 isError 结果
    #[error("Tool invocation failed: {0}")]
    ToolInvocationFailed(String),

    #[error("Request {id} ({method}) timed out after {timeout_ms}ms")]
    TransportTimeout {
        method: String,
        id: u64,
        timeout_ms: u64,
    },

    /// 子进程退出或管道断开；在 reconnect 之前拒绝所有新请求
    #[error("Tool provider terminated: {0}")]
    ProviderTerminated(String),

    #[error("Failed to spawn tool provider: {0}")]
    ProviderSpawn(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// LLM 输出无法提取为计划 JSON；Planner 会降级为直接回复，不向上抛出
    #[error("Plan parse failure: {0}")]
    PlanParseFailure(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// 是否属于单步失败（记入 StepOutcome 后计划可继续）；否则中止计划并向上传播
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            AgentError::ToolInvocationFailed(_)
                | AgentError::TransportTimeout { .. }
                | AgentError::Protocol(_)
                | AgentError::Json(_)
        )
    }
}
