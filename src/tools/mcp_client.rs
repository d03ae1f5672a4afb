//! MCP stdio 客户端
//!
//! 持有当前 Provider 连接（子进程或任意读写端）上的 Correlator，实现 ToolProvider：
//! `tools/list` 解析为 ToolInfo 列表，`tools/call` 拼接 text 内容；isError 结果视为调用失败。
//! 连接终止后请求一律被拒绝，直到 reconnect 重新拉起子进程（id 计数器跨连接延续）。

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::AgentError;
use crate::tools::ToolProvider;
use crate::transport::rpc::{CallToolParams, CallToolResult, ListToolsResult};
use crate::transport::{
    Correlator, ProviderCommand, ProviderProcess, ToolInfo, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

pub struct McpClient {
    command: Option<ProviderCommand>,
    ids: Arc<AtomicU64>,
    timeout: Duration,
    current: RwLock<Arc<Correlator>>,
    process: Mutex<Option<ProviderProcess>>,
}

impl McpClient {
    /// 启动 Provider 子进程并建立连接
    pub fn spawn(command: ProviderCommand, timeout: Duration) -> Result<Self, AgentError> {
        let ids = Arc::new(AtomicU64::new(1));
        let process = ProviderProcess::spawn(&command, Arc::clone(&ids), timeout)?;
        Ok(Self {
            command: Some(command),
            ids,
            timeout,
            current: RwLock::new(process.correlator()),
            process: Mutex::new(Some(process)),
        })
    }

    /// 在已有读写端上建立连接（测试或嵌入场景）；此类连接不支持 reconnect
    pub fn from_transport<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let ids = Arc::new(AtomicU64::new(1));
        let correlator = Correlator::spawn(reader, writer, Arc::clone(&ids), timeout);
        Self {
            command: None,
            ids,
            timeout,
            current: RwLock::new(Arc::new(correlator)),
            process: Mutex::new(None),
        }
    }

    /// 当前连接的关联器
    pub fn correlator(&self) -> Arc<Correlator> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn is_connected(&self) -> bool {
        !self.correlator().is_closed()
    }

    fn lock_process(&self) -> MutexGuard<'_, Option<ProviderProcess>> {
        self.process.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 结束旧子进程并重新拉起；旧连接上的挂起请求以 ProviderTerminated 失败
    pub async fn reconnect(&self) -> Result<(), AgentError> {
        let command = self.command.as_ref().ok_or_else(|| {
            AgentError::ProviderSpawn("connection was not created from a command".to_string())
        })?;
        let old = self.lock_process().take();
        if let Some(old) = old {
            old.shutdown().await;
        }
        let fresh = ProviderProcess::spawn(command, Arc::clone(&self.ids), self.timeout)?;
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            *current = fresh.correlator();
        }
        *self.lock_process() = Some(fresh);
        tracing::info!("tool provider reconnected");
        Ok(())
    }

    pub async fn shutdown(&self) {
        let process = self.lock_process().take();
        match process {
            Some(process) => process.shutdown().await,
            None => self.correlator().close("client shut down"),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        let correlator = self.correlator();
        let mut frame = correlator.send(method, Some(params)).await?;
        match frame.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(AgentError::Protocol(format!(
                "{method} response has neither result nor error"
            ))),
        }
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, AgentError> {
        let result = self.request(METHOD_TOOLS_LIST, json!({})).await?;
        let listed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| AgentError::Protocol(format!("invalid tools/list result: {e}")))?;
        Ok(listed.tools)
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, AgentError> {
        let params = serde_json::to_value(CallToolParams {
            name,
            arguments: &args,
        })?;
        let result = self.request(METHOD_TOOLS_CALL, params).await?;
        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| AgentError::Protocol(format!("invalid tools/call result: {e}")))?;
        if call.content.is_empty() {
            return Err(AgentError::Protocol(format!("{name} returned no content")));
        }
        let text = call.text();
        if call.is_error {
            return Err(AgentError::ToolInvocationFailed(text));
        }
        Ok(text)
    }
}
