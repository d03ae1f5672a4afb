//! MCP Skills - LLM 规划 + MCP stdio 工具编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、最近结果与对话记忆、会话监管、编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 订阅器
//! - **plan**: 计划类型、回复解析、结果引用解析、计划补全、Planner
//! - **skills**: 内置技能预设
//! - **tools**: 工具 Provider 抽象、MCP 客户端、限流与执行器
//! - **transport**: JSON 分帧、请求关联、Provider 子进程

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod skills;
pub mod tools;
pub mod transport;

pub use crate::core::{AgentError, Orchestrator};
