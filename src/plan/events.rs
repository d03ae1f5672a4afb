//! 计划执行过程事件：供 REPL 或其他前端实时展示进度

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    /// LLM 的规划思路
    Thinking { text: String },
    /// 计划已确定（补全之后），共 total 步
    PlanReady { total: usize },
    StepStarted {
        index: usize,
        total: usize,
        tool: String,
    },
    /// 工具返回（预览）
    StepSucceeded {
        index: usize,
        tool: String,
        preview: String,
    },
    StepFailed {
        index: usize,
        tool: String,
        error: String,
    },
    /// 剩余步骤依赖失败步骤的输出，计划提前终止
    PlanAborted { failed_index: usize, skipped: usize },
    SummaryReady { text: String },
}
