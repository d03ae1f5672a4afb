//! JSON-RPC 2.0 线上类型（stdio 与工具 Provider 通信）
//!
//! 只涉及两种方法：`tools/list` 与 `tools/call`。请求按一行一个 JSON 写入 stdin；
//! 响应从 stdout 经分帧器还原，不依赖换行。

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// 发往 Provider 的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id,
        }
    }

    /// 编码为一行 JSON（以 `\n` 结尾）
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Provider 返回的错误对象；code 在部分实现中缺省
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// 从入站帧中读取请求 id（非整数或缺失时为 None）
pub fn frame_id(frame: &Value) -> Option<u64> {
    frame.get("id").and_then(Value::as_u64)
}

/// 若入站帧携带 error 字段，返回其可读消息
pub fn frame_error(frame: &Value) -> Option<String> {
    let error = frame.get("error")?;
    if error.is_null() {
        return None;
    }
    let message = serde_json::from_value::<RpcErrorObject>(error.clone())
        .ok()
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| error.to_string());
    Some(message)
}

/// tools/list 返回的单个工具描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams<'a> {
    pub name: &'a str,
    pub arguments: &'a Value,
}

/// tools/call 的内容片段；只有 text 参与结果拼接
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// 拼接所有 text 片段
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
