//! 滑动窗口限流
//!
//! 任意长度为 window 的区间内最多放行 max 次调用。超限的调用方睡到最早一次调用滑出窗口
//! （额外加 margin），醒来后重新检查；睡眠期间不持有锁，其他调用方可并发检查。
//! RateLimitedProvider 只对配置中的工具名生效，其余工具直接透传。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::core::AgentError;
use crate::tools::ToolProvider;
use crate::transport::ToolInfo;

pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    margin: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration, margin: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            margin,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// 等到窗口内有余量后登记本次调用
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while let Some(oldest) = stamps.front() {
                    if now.duration_since(*oldest) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.max_calls {
                    stamps.push_back(now);
                    return;
                }
                match stamps.front() {
                    Some(oldest) => {
                        self.window.saturating_sub(now.duration_since(*oldest)) + self.margin
                    }
                    None => self.margin,
                }
            };
            tracing::info!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// 当前窗口内已登记的调用数（含尚未滑出的旧记录）
    pub async fn in_window(&self) -> usize {
        self.stamps.lock().await.len()
    }
}

/// 对指定工具施加限流的 Provider 包装
pub struct RateLimitedProvider {
    inner: Arc<dyn ToolProvider>,
    limiter: Arc<RateLimiter>,
    tools: HashSet<String>,
}

impl RateLimitedProvider {
    pub fn new(
        inner: Arc<dyn ToolProvider>,
        limiter: Arc<RateLimiter>,
        tools: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            inner,
            limiter,
            tools: tools.into_iter().collect(),
        }
    }

    pub fn is_limited(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }
}

#[async_trait]
impl ToolProvider for RateLimitedProvider {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, AgentError> {
        self.inner.list_tools().await
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, AgentError> {
        if self.is_limited(name) {
            self.limiter.acquire().await;
        }
        self.inner.call_tool(name, args).await
    }
}
