//! LLM 规划回复解析
//!
//! 回复可能夹杂说明文字或代码块；取第一个完整的 `{...}` 对象反序列化为 Plan。
//! 无法解析时降级为直接回答（原文即回复），只记日志不报错。

use crate::core::AgentError;
use crate::plan::Plan;
use crate::transport::extract_first_object;

/// 严格解析：找不到对象或结构不符时返回 PlanParseFailure
pub fn try_parse_plan(text: &str) -> Result<Plan, AgentError> {
    let value = extract_first_object(text)
        .ok_or_else(|| AgentError::PlanParseFailure("no JSON object in LLM reply".to_string()))?;
    serde_json::from_value(value).map_err(|e| AgentError::PlanParseFailure(e.to_string()))
}

/// 宽松解析：失败或计划为空时把原文当作直接回答
pub fn parse_plan(text: &str) -> Plan {
    match try_parse_plan(text) {
        Ok(plan) if plan.needs_tools || plan.response.is_some() => plan,
        Ok(_) => {
            tracing::warn!("plan JSON carries neither tool calls nor a response, using raw reply");
            Plan::direct(text.trim())
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse plan, using raw reply");
            Plan::direct(text.trim())
        }
    }
}
