//! 编排器：一轮用户输入 → 规划 → 逐步执行 → 总结
//!
//! 步骤严格按下标顺序执行，每步先解析参数中的结果引用再调用工具。
//! 单步失败记入 StepOutcome；若剩余步骤引用了失败步骤的输出则提前终止，否则继续执行。
//! Provider 终止、启动失败与取消不属于单步失败，直接中止本轮并返回错误。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::history::{ConversationMemory, RecentHistory};
use crate::core::AgentError;
use crate::llm::{create_llm_from_config, Message};
use crate::plan::resolver::{depends_on, has_unresolved_markers, resolve};
use crate::plan::{
    augment_with_fetches, truncate_chars, ListSpec, Plan, PlanEvent, Planner, ResultContext,
    StepOutcome,
};
use crate::skills;
use crate::tools::{McpClient, RateLimitedProvider, RateLimiter, ToolExecutor, ToolProvider};

/// 所有步骤失败且总结也失败时的固定回复
pub const ALL_FAILED_MESSAGE: &str = "所有步骤都失败了。\n\n可能原因:\n- 网站有反爬保护\n- 网络连接问题\n- API 配额或速率限制\n\n建议换个关键词或稍后重试。";

const EVENT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub list: ListSpec,
    pub auto_fetch: bool,
    pub history_capacity: usize,
    pub max_context_turns: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorOptions {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            list: cfg.planner.list_spec(),
            auto_fetch: cfg.planner.auto_fetch,
            history_capacity: cfg.app.history_capacity,
            max_context_turns: cfg.app.max_context_turns,
        }
    }
}

/// 一次计划执行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub outcomes: Vec<StepOutcome>,
    pub summary: String,
    /// 是否因依赖失败而跳过了剩余步骤
    pub aborted: bool,
}

/// 一轮对话的结果（plan 为补全后实际执行的计划）
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub plan: Plan,
    pub outcomes: Vec<StepOutcome>,
    pub summary: String,
    pub aborted: bool,
}

pub struct Orchestrator {
    planner: Planner,
    executor: Arc<ToolExecutor>,
    options: OrchestratorOptions,
    history: Mutex<RecentHistory>,
    conversation: Mutex<ConversationMemory>,
    events: Option<mpsc::UnboundedSender<PlanEvent>>,
    client: Option<Arc<McpClient>>,
}

impl Orchestrator {
    pub fn new(planner: Planner, executor: Arc<ToolExecutor>, options: OrchestratorOptions) -> Self {
        Self {
            planner,
            executor,
            history: Mutex::new(RecentHistory::new(options.history_capacity)),
            conversation: Mutex::new(ConversationMemory::new(options.max_context_turns)),
            options,
            events: None,
            client: None,
        }
    }

    /// 订阅执行过程事件
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<PlanEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 关联底层 MCP 连接，用于 reconnect / shutdown
    pub fn with_client(mut self, client: Arc<McpClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn recent_history(&self) -> RecentHistory {
        self.lock_history().clone()
    }

    pub fn clear(&self) {
        self.lock_history().clear();
        self.lock_conversation().clear();
    }

    /// 处理一轮用户输入
    pub async fn handle_turn(
        &self,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, AgentError> {
        let conversation = self.lock_conversation().recent(usize::MAX);
        let history = self.recent_history();
        let catalog = self.executor.catalog();

        let mut plan = self
            .planner
            .plan(user_input, &conversation, &history, &catalog)
            .await?;
        if let Some(thinking) = plan.thinking.as_deref().filter(|t| !t.is_empty()) {
            tracing::info!(thinking, "plan thinking");
            self.emit(PlanEvent::Thinking {
                text: thinking.to_string(),
            });
        }
        self.lock_conversation().push(Message::user(user_input));

        if !plan.has_steps() {
            let response = plan.response.clone().unwrap_or_default();
            self.lock_conversation().push(Message::assistant(response.clone()));
            return Ok(TurnReport {
                plan,
                outcomes: Vec::new(),
                summary: response,
                aborted: false,
            });
        }

        if self.options.auto_fetch {
            let steps = std::mem::take(&mut plan.tool_calls);
            plan.tool_calls = augment_with_fetches(user_input, steps, &self.options.list);
        }

        let report = self.execute(user_input, &plan, cancel).await?;
        self.lock_conversation()
            .push(Message::assistant(report.summary.clone()));
        Ok(TurnReport {
            plan,
            outcomes: report.outcomes,
            summary: report.summary,
            aborted: report.aborted,
        })
    }

    /// 按顺序执行计划并总结；tool_calls 为空时直接返回计划中的回复
    pub async fn execute(
        &self,
        user_input: &str,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, AgentError> {
        let steps = &plan.tool_calls;
        if steps.is_empty() {
            return Ok(ExecutionReport {
                outcomes: Vec::new(),
                summary: plan.response.clone().unwrap_or_default(),
                aborted: false,
            });
        }

        let total = steps.len();
        let list = &self.options.list;
        tracing::info!(total, "executing plan");
        self.emit(PlanEvent::PlanReady { total });

        let mut ctx = ResultContext::new();
        let mut outcomes = Vec::with_capacity(total);
        let mut aborted = false;

        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(step = index, "plan cancelled");
                return Err(AgentError::Cancelled);
            }

            let params = resolve(&step.params, &ctx, index, list);
            let args = Value::Object(params);
            if has_unresolved_markers(&args, list) {
                tracing::warn!(step = index, tool = %step.tool, "step runs with unresolved markers");
            }
            self.emit(PlanEvent::StepStarted {
                index,
                total,
                tool: step.tool.clone(),
            });

            let start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                r = self.executor.execute(&step.tool, args) => r,
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(text) => {
                    tracing::info!(step = index, tool = %step.tool, ok = true, duration_ms, "step finished");
                    ctx.record(index, &step.tool, &text);
                    self.lock_history().push(step.tool.clone(), text.clone());
                    self.emit(PlanEvent::StepSucceeded {
                        index,
                        tool: step.tool.clone(),
                        preview: truncate_chars(&text, EVENT_PREVIEW_CHARS).to_string(),
                    });
                    outcomes.push(StepOutcome::succeeded(index, &step.tool, text));
                }
                Err(e) if e.is_step_failure() => {
                    let error = e.to_string();
                    tracing::warn!(step = index, tool = %step.tool, ok = false, duration_ms, error = %error, "step failed");
                    self.emit(PlanEvent::StepFailed {
                        index,
                        tool: step.tool.clone(),
                        error: error.clone(),
                    });
                    outcomes.push(StepOutcome::failed(index, &step.tool, error));

                    let has_dependents = steps[index + 1..].iter().enumerate().any(|(offset, later)| {
                        depends_on(index + 1 + offset, &later.params, index, &step.tool, list)
                    });
                    if has_dependents {
                        let skipped = total - index - 1;
                        tracing::warn!(step = index, skipped, "remaining steps depend on failed step, aborting plan");
                        self.emit(PlanEvent::PlanAborted {
                            failed_index: index,
                            skipped,
                        });
                        aborted = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(step = index, tool = %step.tool, error = %e, "plan aborted");
                    return Err(e);
                }
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        tracing::info!(
            succeeded,
            failed = outcomes.len() - succeeded,
            recorded = ctx.len(),
            aborted,
            "plan finished"
        );

        let summary = self.summarize(user_input, &outcomes).await;
        self.emit(PlanEvent::SummaryReady {
            text: summary.clone(),
        });
        Ok(ExecutionReport {
            outcomes,
            summary,
            aborted,
        })
    }

    /// LLM 总结；失败时回退到最后一个成功结果或固定失败说明
    pub async fn summarize(&self, user_input: &str, outcomes: &[StepOutcome]) -> String {
        let conversation = self.lock_conversation().recent(usize::MAX);
        match self
            .planner
            .summarize(user_input, &conversation, outcomes)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, using fallback");
                fallback_summary(outcomes)
            }
        }
    }

    /// 重启 Provider 并刷新工具目录
    pub async fn reconnect(&self) -> Result<(), AgentError> {
        let client = self.client.as_ref().ok_or_else(|| {
            AgentError::ProviderSpawn("orchestrator has no provider connection".to_string())
        })?;
        client.reconnect().await?;
        self.executor.refresh_catalog().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(client) = &self.client {
            client.shutdown().await;
        }
    }

    fn emit(&self, event: PlanEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, RecentHistory> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_conversation(&self) -> MutexGuard<'_, ConversationMemory> {
        self.conversation.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 最后一个成功步骤的原始结果；没有成功步骤时为固定失败说明
pub fn fallback_summary(outcomes: &[StepOutcome]) -> String {
    outcomes
        .iter()
        .rev()
        .find(|o| o.success)
        .and_then(|o| o.result.clone())
        .unwrap_or_else(|| ALL_FAILED_MESSAGE.to_string())
}

/// 按配置组装：启动 Provider 子进程、限流包装、拉取工具目录、选择 LLM 与技能
pub async fn create_from_config(cfg: &AppConfig) -> Result<Orchestrator, AgentError> {
    let client = Arc::new(McpClient::spawn(
        cfg.provider.to_command(),
        cfg.provider.request_timeout(),
    )?);

    let limiter = Arc::new(RateLimiter::new(
        cfg.rate_limit.max_calls,
        std::time::Duration::from_millis(cfg.rate_limit.window_ms),
        std::time::Duration::from_millis(cfg.rate_limit.margin_ms),
    ));
    let provider: Arc<dyn ToolProvider> = Arc::new(RateLimitedProvider::new(
        client.clone(),
        limiter,
        cfg.rate_limit.tools.clone(),
    ));
    let executor = Arc::new(ToolExecutor::new(provider));
    if let Err(e) = executor.refresh_catalog().await {
        tracing::warn!(error = %e, "failed to list tools, planning without a catalog");
    }

    let llm = create_llm_from_config(&cfg.llm);
    let skill = skills::select(&cfg.app.skill);
    tracing::info!(skill = skill.id, "skill selected");

    Ok(Orchestrator::new(Planner::new(llm, skill), executor, OrchestratorOptions::from(cfg))
        .with_client(client))
}
