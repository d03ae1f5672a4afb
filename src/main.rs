//! mcp-skills 命令行入口
//!
//! 初始化日志与配置，启动工具 Provider，然后在 stdin 上运行交互循环：
//! 每行输入为一轮对话，回答写到 stdout，进度与日志写到 stderr。
//! 用法：`mcp-skills [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mcp_skills::config::load_config_or_default;
use mcp_skills::core::{create_from_config, SessionSupervisor};
use mcp_skills::plan::PlanEvent;
use mcp_skills::{observability, skills, AgentError, Orchestrator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "命令: /tools 列出工具, /skills 列出技能, /clear 清空上下文, /reconnect 重启 Provider, /usage Token 用量, /quit 退出";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config_or_default(config_path);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let orchestrator = create_from_config(&cfg)
        .await
        .context("Failed to start tool provider")?
        .with_events(event_tx);
    tokio::spawn(print_events(event_rx));

    let supervisor = Arc::new(SessionSupervisor::new());
    {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if supervisor.cancel_turn() {
                    eprintln!("\n[已取消当前任务]");
                } else {
                    supervisor.shutdown();
                    break;
                }
            }
        });
    }

    eprintln!(
        "mcp-skills 已就绪（技能: {}，工具: {} 个）。{}",
        orchestrator.planner().skill().name,
        orchestrator.executor().catalog().len(),
        HELP
    );

    let result = repl(&orchestrator, &supervisor).await;
    orchestrator.shutdown().await;
    eprintln!("{}", usage_line(&orchestrator));
    result
}

fn usage_line(orchestrator: &Orchestrator) -> String {
    let (prompt, completion, total) = orchestrator.planner().token_usage();
    format!(
        "[Token 用量] 输入 {} / 输出 {} / 合计 {}",
        prompt, completion, total
    )
}

async fn repl(orchestrator: &Orchestrator, supervisor: &SessionSupervisor) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = supervisor.shutdown_token();

    loop {
        eprint!("> ");
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = shutdown.cancelled() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/help" => eprintln!("{}", HELP),
            "/clear" => {
                orchestrator.clear();
                eprintln!("[上下文已清空]");
            }
            "/skills" => {
                for skill in skills::all() {
                    eprintln!("{}", skill.summary());
                }
            }
            "/tools" => {
                let catalog = orchestrator.executor().catalog();
                eprintln!("{}", catalog.prompt_section());
            }
            "/usage" => eprintln!("{}", usage_line(orchestrator)),
            "/reconnect" => match orchestrator.reconnect().await {
                Ok(()) => eprintln!("[Provider 已重启]"),
                Err(e) => eprintln!("[重启失败] {}", e),
            },
            _ => {
                let token = supervisor.begin_turn();
                let result = orchestrator.handle_turn(input, &token).await;
                supervisor.end_turn();
                match result {
                    Ok(report) => {
                        stdout
                            .write_all(format!("{}\n", report.summary).as_bytes())
                            .await
                            .context("Failed to write answer")?;
                        stdout.flush().await.context("Failed to write answer")?;
                    }
                    Err(AgentError::Cancelled) => eprintln!("[已取消]"),
                    Err(AgentError::ProviderTerminated(reason)) => {
                        eprintln!("[Provider 已退出: {}]，正在重启…", reason);
                        if let Err(e) = orchestrator.reconnect().await {
                            eprintln!("[重启失败] {}", e);
                        }
                    }
                    Err(e) => eprintln!("[出错了] {}", e),
                }
            }
        }
    }
    Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<PlanEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PlanEvent::Thinking { text } => eprintln!("[思考] {}", text),
            PlanEvent::PlanReady { total } => eprintln!("[计划] 共 {} 步", total),
            PlanEvent::StepStarted { index, total, tool } => {
                eprintln!("[步骤 {}/{}] {}", index + 1, total, tool)
            }
            PlanEvent::StepSucceeded { tool, preview, .. } => eprintln!("  ✓ {}: {}", tool, preview),
            PlanEvent::StepFailed { tool, error, .. } => eprintln!("  ✗ {}: {}", tool, error),
            PlanEvent::PlanAborted { skipped, .. } => {
                eprintln!("[终止] 后续 {} 步依赖失败步骤的输出，已跳过", skipped)
            }
            PlanEvent::SummaryReady { .. } => {}
        }
    }
}
