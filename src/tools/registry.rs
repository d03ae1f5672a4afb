//! 工具 Provider 抽象与工具目录
//!
//! 所有工具都在进程外 Provider 中实现；本进程只通过 ToolProvider trait 列出与调用。
//! ToolCatalog 缓存 tools/list 结果，用于生成 Planner 提示词中的「可用工具」段落。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::transport::ToolInfo;

/// 工具 Provider：列出工具与按名调用（args 为 JSON 对象，返回文本结果）
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, AgentError>;

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, AgentError>;
}

/// 工具目录：保持 Provider 返回的顺序
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolInfo>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolInfo>) -> Self {
        Self { tools }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    /// 提示词段落：每个工具一行描述 + 参数属性
    pub fn prompt_section(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                let properties = t
                    .input_schema
                    .get("properties")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));
                format!("- **{}**: {}\n  参数: {}", t.name, t.description, properties)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            ToolInfo {
                name: "calculate".into(),
                description: "执行数学计算".into(),
                input_schema: json!({"type": "object", "properties": {"expression": {"type": "string"}}}),
            },
            ToolInfo {
                name: "current_time".into(),
                description: "获取当前时间".into(),
                input_schema: json!({"type": "object"}),
            },
        ])
    }

    #[test]
    fn test_lookup() {
        let c = catalog();
        assert_eq!(c.len(), 2);
        assert!(c.contains("calculate"));
        assert!(!c.contains("web_search"));
        assert_eq!(c.tool_names(), vec!["calculate", "current_time"]);
        assert_eq!(c.get("current_time").unwrap().description, "获取当前时间");
    }

    #[test]
    fn test_prompt_section() {
        let section = catalog().prompt_section();
        assert!(section.contains("- **calculate**: 执行数学计算"));
        assert!(section.contains(r#"参数: {"expression":{"type":"string"}}"#));
        assert!(section.contains("- **current_time**: 获取当前时间\n  参数: {}"));
    }
}
