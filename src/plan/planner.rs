//! Planner：调用 LLM 生成执行计划，并在执行后总结结果
//!
//! 规划提示词 = 技能角色 + 可用工具 + 结果引用规则 + 今日日期 + 最近工具结果；
//! 总结提示词列出成功结果（截断）与失败说明。

use std::sync::Arc;

use crate::core::history::RecentHistory;
use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::plan::{parse_plan, truncate_chars, Plan, StepOutcome};
use crate::skills::Skill;
use crate::tools::ToolCatalog;

/// 提示词中附带的最近工具结果条数与每条预览长度
pub const HISTORY_IN_PROMPT: usize = 3;
pub const HISTORY_PREVIEW_CHARS: usize = 200;
/// 总结时每个结果的最大长度
pub const SUMMARY_RESULT_CHARS: usize = 1500;
/// 随请求发送的最近对话消息数
pub const CONTEXT_MESSAGES: usize = 4;

const MARKER_RULES: &str = "**参数引用规则:**
- 引用上一步结果: \"{{PREVIOUS}}\"
- 引用特定步骤: \"{{step_0}}\"、\"{{step_1}}\"（只能引用之前的步骤）
- 引用某工具最近一次结果: \"{{tool:工具名}}\"
- 引用搜索结果链接: \"{{search_result_0}}\"、\"{{search_result_1}}\"
- 引用列表结果的字段: \"{{工具名[序号].字段}}\"";

const OUTPUT_FORMAT: &str = "**返回JSON格式:**

需要工具时:
{
  \"needsTools\": true,
  \"thinking\": \"你的分析与规划思路\",
  \"toolCalls\": [
    {\"tool\": \"工具名\", \"params\": {\"参数\": \"值\"}, \"reason\": \"调用原因\"}
  ]
}

不需要工具时:
{
  \"needsTools\": false,
  \"response\": \"你的直接回答\"
}";

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    skill: &'static Skill,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, skill: &'static Skill) -> Self {
        Self { llm, skill }
    }

    pub fn skill(&self) -> &'static Skill {
        self.skill
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 生成计划；LLM 调用失败返回 Llm 错误，回复无法解析时降级为直接回答
    pub async fn plan(
        &self,
        user_input: &str,
        conversation: &[Message],
        history: &RecentHistory,
        catalog: &ToolCatalog,
    ) -> Result<Plan, AgentError> {
        let system = self.system_prompt(catalog, history);
        let mut messages = vec![Message::system(system)];
        messages.extend(last_messages(conversation));
        messages.push(Message::user(format!(
            "用户请求: {}\n\n判断是否需要调用工具；需要时返回完整的工具调用链。\n\n{}",
            user_input, OUTPUT_FORMAT
        )));

        let reply = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        tracing::debug!(reply_len = reply.len(), "planner reply received");
        Ok(parse_plan(&reply))
    }

    /// 总结执行结果；失败时由调用方降级
    pub async fn summarize(
        &self,
        user_input: &str,
        conversation: &[Message],
        outcomes: &[StepOutcome],
    ) -> Result<String, AgentError> {
        let mut messages = last_messages(conversation);
        messages.push(Message::user(summary_prompt(user_input, outcomes)));
        let reply = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(AgentError::Llm("empty summary".to_string()));
        }
        Ok(reply.to_string())
    }

    pub fn system_prompt(&self, catalog: &ToolCatalog, history: &RecentHistory) -> String {
        let today = chrono::Local::now().format("%Y年%m月%d日").to_string();
        let tools = if catalog.is_empty() {
            "（当前没有可用工具）".to_string()
        } else {
            catalog.prompt_section()
        };
        let recent = if history.is_empty() {
            String::new()
        } else {
            let lines = history
                .last(HISTORY_IN_PROMPT)
                .map(|e| format!("- {}: {}...", e.tool, truncate_chars(&e.result, HISTORY_PREVIEW_CHARS)))
                .collect::<Vec<_>>()
                .join("\n");
            format!("\n\n最近的工具执行结果:\n{}", lines)
        };

        format!(
            "{}\n\n今天是 {}。\n\n**可用工具列表:**\n{}\n\n\
**规划规则:**\n\
- 多步骤任务按依赖顺序规划多个工具调用\n\
- 闲聊或询问能力时不调用工具，直接回复\n\
- web_search 只返回标题与摘要，需要详细内容时用 fetch_url 获取全文\n\n\
{}{}\n\n回复必须是有效的JSON。",
            self.skill.system_prompt, today, tools, MARKER_RULES, recent
        )
    }
}

fn last_messages(conversation: &[Message]) -> Vec<Message> {
    conversation[conversation.len().saturating_sub(CONTEXT_MESSAGES)..].to_vec()
}

/// 总结提示词：成功结果截断到 SUMMARY_RESULT_CHARS，失败步骤附带说明（403 视为站点防护）
pub fn summary_prompt(user_input: &str, outcomes: &[StepOutcome]) -> String {
    let (succeeded, failed): (Vec<_>, Vec<_>) = outcomes.iter().partition(|o| o.success);

    let results = succeeded
        .iter()
        .map(|o| {
            format!(
                "**{}**: {}",
                o.tool,
                truncate_chars(o.result.as_deref().unwrap_or_default(), SUMMARY_RESULT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut notes = String::new();
    if !failed.is_empty() {
        notes.push_str(&format!(
            "\n\n**执行情况说明:**\n- 成功: {} 步\n- 失败: {} 步\n\n",
            succeeded.len(),
            failed.len()
        ));
        for o in &failed {
            let error = o.error.as_deref().unwrap_or_default();
            if error.contains("403") {
                notes.push_str(&format!("- {} 遇到访问限制（网站反爬保护）\n", o.tool));
            } else {
                notes.push_str(&format!("- {} 失败: {}\n", o.tool, error));
            }
        }
        notes.push_str("\n请基于成功获取的信息回答，并说明哪些资源无法访问。\n");
    }

    format!(
        "用户的请求「{}」已经通过工具执行。\n\n**执行的工具和结果:**\n{}{}\n\n\
请用自然、友好的语言向用户总结执行结果：突出关键信息，清晰呈现具体数据，简洁但完整。\
直接输出总结内容。",
        user_input, results, notes
    )
}
