//! 工具执行器
//!
//! 持有 ToolProvider 与缓存的工具目录。execute(tool_name, args) 转发给 Provider，
//! 每次调用输出结构化审计日志（JSON）；超时由传输层负责，这里只记录结果。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde_json::Value;

use crate::core::AgentError;
use crate::tools::{ToolCatalog, ToolProvider};

pub struct ToolExecutor {
    provider: Arc<dyn ToolProvider>,
    catalog: RwLock<ToolCatalog>,
}

impl ToolExecutor {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            provider,
            catalog: RwLock::new(ToolCatalog::default()),
        }
    }

    /// 重新执行 tools/list 并替换缓存目录
    pub async fn refresh_catalog(&self) -> Result<ToolCatalog, AgentError> {
        let tools = self.provider.list_tools().await?;
        let catalog = ToolCatalog::new(tools);
        tracing::info!(count = catalog.len(), tools = ?catalog.tool_names(), "tool catalog refreshed");
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = catalog.clone();
        Ok(catalog)
    }

    /// 缓存的目录；从未成功刷新时为空
    pub fn catalog(&self) -> ToolCatalog {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 调用指定工具并输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = self.provider.call_tool(tool_name, args).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::TransportTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
