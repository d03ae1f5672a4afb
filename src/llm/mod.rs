//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, Message, Role};

use crate::config::LlmSection;

/// 按配置与环境变量选择后端：provider 显式指定优先，
/// 否则 DEEPSEEK_API_KEY → DeepSeek，OPENAI_API_KEY → OpenAI，都没有则 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let has = |key: &str| std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false);
    let provider = match cfg.provider.as_deref() {
        Some(p) => p.to_lowercase(),
        None if has("DEEPSEEK_API_KEY") => "deepseek".to_string(),
        None if has("OPENAI_API_KEY") => "openai".to_string(),
        None => "mock".to_string(),
    };

    match provider.as_str() {
        "deepseek" => {
            let client = create_deepseek_client(cfg.model.as_deref(), cfg.base_url.as_deref());
            tracing::info!(model = %client.model(), "using DeepSeek LLM");
            Arc::new(client)
        }
        "openai" => {
            let model = cfg.model.as_deref().unwrap_or("gpt-4o-mini");
            tracing::info!(model, "using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), model, None))
        }
        other => {
            if other != "mock" {
                tracing::warn!(provider = other, "unknown LLM provider, falling back to mock");
            } else {
                tracing::warn!("no LLM API key found, using mock LLM");
            }
            Arc::new(MockLlmClient::new())
        }
    }
}
