//! 计划与步骤结果的数据类型（JSON 字段为 camelCase，与 LLM 输出约定一致）

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 一次用户输入对应的执行计划
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub needs_tools: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl Plan {
    /// 不调用工具、直接回答的计划
    pub fn direct(response: impl Into<String>) -> Self {
        Self {
            needs_tools: false,
            response: Some(response.into()),
            ..Default::default()
        }
    }

    pub fn with_steps(steps: Vec<Step>) -> Self {
        Self {
            needs_tools: !steps.is_empty(),
            tool_calls: steps,
            ..Default::default()
        }
    }

    /// 是否需要进入执行阶段
    pub fn has_steps(&self) -> bool {
        self.needs_tools && !self.tool_calls.is_empty()
    }
}

/// 计划中的一步；以其在 tool_calls 中的下标标识
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub reason: String,
}

impl Step {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params: match params {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            reason: String::new(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// 已执行步骤的结果，按计划顺序排列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_index: usize,
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(step_index: usize, tool: &str, result: String) -> Self {
        Self {
            step_index,
            tool: tool.to_string(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(step_index: usize, tool: &str, error: String) -> Self {
        Self {
            step_index,
            tool: tool.to_string(),
            success: false,
            result: None,
            error: Some(error),
        }
    }
}
