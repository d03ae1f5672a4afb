//! 请求关联器
//!
//! 为每个请求分配递增 id，登记完成槽位，施加固定超时，并把请求写入 Provider 的 stdin；
//! 读任务把 stdout 字节交给分帧器，按帧中的 id（而非到达顺序）唤醒对应请求。
//! Provider 终止（EOF / 读写失败）时所有挂起请求立即以 ProviderTerminated 失败，之后拒绝新请求。
//!
//! 写入经由独立的写任务与无界通道完成，挂起表的锁只在内存操作期间持有，从不跨越 await。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::AgentError;
use crate::transport::framer::JsonFramer;
use crate::transport::rpc::{frame_error, frame_id, RpcRequest};

/// 每次从 stdout 读取的最大字节数
const READ_CHUNK: usize = 8192;

type Completion = oneshot::Sender<Result<Value, AgentError>>;

/// 已发送、等待响应的请求
struct PendingRequest {
    method: String,
    registered_at: Instant,
    on_complete: Completion,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    /// 连接关闭原因；Some 表示不再接受新请求
    closed: Option<String>,
}

#[derive(Default)]
struct Shared {
    table: Mutex<PendingTable>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(
        &self,
        id: u64,
        method: &str,
    ) -> Result<oneshot::Receiver<Result<Value, AgentError>>, AgentError> {
        let mut table = self.lock();
        if let Some(reason) = &table.closed {
            return Err(AgentError::ProviderTerminated(reason.clone()));
        }
        if table.entries.contains_key(&id) {
            return Err(AgentError::Protocol(format!("duplicate request id {id}")));
        }
        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                registered_at: Instant::now(),
                on_complete: tx,
            },
        );
        Ok(rx)
    }

    fn remove(&self, id: u64) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    /// 按 id 唤醒挂起请求；error 字段视为失败结果而非协议故障
    fn dispatch(&self, frame: Value) {
        let Some(id) = frame_id(&frame) else {
            tracing::debug!(frame = %frame, "dropping frame without id");
            return;
        };
        let entry = self.lock().entries.remove(&id);
        let Some(pending) = entry else {
            tracing::debug!(id, "dropping response for unknown or expired request");
            return;
        };
        tracing::debug!(
            id,
            method = %pending.method,
            elapsed_ms = pending.registered_at.elapsed().as_millis() as u64,
            "response matched"
        );
        let outcome = match frame_error(&frame) {
            Some(message) => Err(AgentError::ToolInvocationFailed(message)),
            None => Ok(frame),
        };
        let _ = pending.on_complete.send(outcome);
    }

    /// 关闭连接：记录原因并让所有挂起请求失败
    fn terminate(&self, reason: &str) {
        let drained: Vec<PendingRequest> = {
            let mut table = self.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.entries.drain().map(|(_, p)| p).collect()
        };
        if !drained.is_empty() {
            tracing::warn!(pending = drained.len(), reason, "failing pending requests");
        }
        for pending in drained {
            let _ = pending
                .on_complete
                .send(Err(AgentError::ProviderTerminated(reason.to_string())));
        }
    }
}

/// send 的 future 结束（完成、超时或被丢弃）时移除挂起项
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.remove(self.id);
    }
}

/// 单个 Provider 连接上的请求关联器
pub struct Correlator {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
    ids: Arc<AtomicU64>,
    timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Correlator {
    /// 在给定的读写端上启动读、写任务；ids 由连接所有者持有，重连后继续递增
    pub fn spawn<R, W>(reader: R, writer: W, ids: Arc<AtomicU64>, timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let (outbound, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&shared)));
        let writer = tokio::spawn(write_loop(writer, rx, Arc::clone(&shared)));
        Self {
            shared,
            outbound,
            ids,
            timeout,
            reader,
            writer,
        }
    }

    /// 发送请求并等待匹配的响应帧（完整消息）
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, AgentError> {
        let id = self.ids.fetch_add(1, Ordering::SeqCst);
        let rx = self.shared.register(id, method)?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let line = RpcRequest::new(id, method, params).to_line()?;
        tracing::debug!(id, method, bytes = line.len(), "sending request");
        if self.outbound.send(line).is_err() {
            return Err(AgentError::ProviderTerminated(
                "request writer stopped".to_string(),
            ));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AgentError::ProviderTerminated(
                "pending request dropped".to_string(),
            )),
            Err(_) => Err(AgentError::TransportTimeout {
                method: method.to_string(),
                id,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed.is_some()
    }

    /// 主动关闭连接（如重连前），挂起请求以给定原因失败
    pub fn close(&self, reason: &str) {
        self.shared.terminate(reason);
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = JsonFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let reason = loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break "provider closed stdout".to_string(),
            Ok(n) => {
                framer.push(&chunk[..n]);
                while let Some(frame) = framer.next_frame() {
                    shared.dispatch(frame);
                }
            }
            Err(e) => break format!("provider read failed: {e}"),
        }
    };
    tracing::info!(reason = %reason, "provider connection closed");
    shared.terminate(&reason);
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            shared.terminate(&format!("provider write failed: {e}"));
            return;
        }
    }
}
