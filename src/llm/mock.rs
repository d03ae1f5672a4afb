//! Mock LLM 客户端（测试与无 API Key 时使用）
//!
//! 按顺序弹出预置回复；队列耗尽后回退到固定行为：规划请求返回直接回答，
//! 总结请求返回最后一条 user 消息。可设置为总是失败以覆盖降级路径。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    scripted: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置若干回复，按调用顺序消费
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::default();
        for r in responses {
            mock.push_response(r);
        }
        mock
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.lock_scripted().push_back(Ok(response.into()));
    }

    pub fn push_failure(&self, error: impl Into<String>) {
        self.lock_scripted().push_back(Err(error.into()));
    }

    /// 已收到的请求（每次调用一份消息列表）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_scripted(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        self.scripted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        if let Some(next) = self.lock_scripted().pop_front() {
            return next;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(serde_json::json!({
            "needsTools": false,
            "response": format!("Echo from Mock: {}", last_user),
        })
        .to_string())
    }
}
