//! 工具 Provider 子进程
//!
//! 启动时 spawn 一次：stdin / stdout 承载协议，stderr 仅作诊断（逐行转发到 tracing，不参与分帧）。
//! 子进程句柄设置 kill_on_drop，连接被替换或丢弃时进程随之结束。

use std::process::Stdio;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::core::AgentError;
use crate::transport::correlator::Correlator;

/// 启动命令
#[derive(Debug, Clone)]
pub struct ProviderCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// 运行中的 Provider：子进程 + 其上的关联器
pub struct ProviderProcess {
    child: Child,
    correlator: Arc<Correlator>,
}

impl ProviderProcess {
    pub fn spawn(
        command: &ProviderCommand,
        ids: Arc<AtomicU64>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::ProviderSpawn(format!("{}: {}", command.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::ProviderSpawn("failed to capture provider stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::ProviderSpawn("failed to capture provider stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "provider", "{}", line.trim_end());
                }
            });
        }

        tracing::info!(
            program = %command.program,
            args = ?command.args,
            pid = child.id(),
            "tool provider started"
        );

        let correlator = Arc::new(Correlator::spawn(stdout, stdin, ids, timeout));
        Ok(Self { child, correlator })
    }

    pub fn correlator(&self) -> Arc<Correlator> {
        Arc::clone(&self.correlator)
    }

    /// 关闭连接并结束子进程
    pub async fn shutdown(mut self) {
        self.correlator.close("provider shut down");
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "provider already exited");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(script: &str) -> ProviderCommand {
        ProviderCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let cmd = ProviderCommand {
            program: "definitely-not-a-real-binary-xyz".to_string(),
            args: vec![],
        };
        let err = ProviderProcess::spawn(&cmd, Arc::new(AtomicU64::new(1)), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::ProviderSpawn(_)));
    }

    #[tokio::test]
    async fn test_echo_provider_roundtrip() {
        // cat 原样回显请求：请求本身带 id，正好作为匹配的响应帧
        let provider = ProviderProcess::spawn(
            &command("cat"),
            Arc::new(AtomicU64::new(1)),
            Duration::from_secs(5),
        )
        .unwrap();
        let resp = provider
            .correlator()
            .send("tools/list", Some(json!({"probe": true})))
            .await
            .unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["params"]["probe"], true);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_exit_terminates_pending() {
        let provider = ProviderProcess::spawn(
            &command("read line; echo bye >&2; exit 3"),
            Arc::new(AtomicU64::new(1)),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = provider.correlator().send("tools/list", None).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderTerminated(_)), "{:?}", err);
        assert!(provider.correlator().is_closed());
    }
}
