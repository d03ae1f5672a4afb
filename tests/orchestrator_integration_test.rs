//! 编排器集成测试：假 MCP Provider 通过内存管道提供 tools/list 与 tools/call

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use mcp_skills::core::{Orchestrator, OrchestratorOptions, ALL_FAILED_MESSAGE};
    use mcp_skills::llm::MockLlmClient;
    use mcp_skills::plan::{Plan, Planner, Step};
    use mcp_skills::tools::{McpClient, RateLimitedProvider, RateLimiter, ToolExecutor, ToolProvider};
    use mcp_skills::{skills, AgentError};
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio_util::sync::CancellationToken;

    type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

    fn handle(request: &Value) -> Value {
        match request["method"].as_str() {
            Some("tools/list") => json!({"result": {"tools": [
                {"name": "web_search", "description": "搜索网络", "inputSchema": {"type": "object", "properties": {"query": {"type": "string"}}}},
                {"name": "fetch_url", "description": "获取网页内容", "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}}},
                {"name": "calculate", "description": "数学计算", "inputSchema": {"type": "object", "properties": {"expression": {"type": "string"}}}},
                {"name": "write_file", "description": "写文件", "inputSchema": {"type": "object"}}
            ]}}),
            Some("tools/call") => {
                let args = &request["params"]["arguments"];
                let text = match request["params"]["name"].as_str().unwrap_or_default() {
                    "web_search" => json!([
                        {"title": "一", "url": "https://one.example"},
                        {"title": "二", "url": "https://blocked.example"},
                        {"title": "三", "url": "https://three.example"}
                    ])
                    .to_string(),
                    "fetch_url" => {
                        let url = args["url"].as_str().unwrap_or_default();
                        if url.contains("blocked") {
                            return json!({"error": {"code": -32000, "message": "HTTP 403 Forbidden"}});
                        }
                        format!("page of {url} with braces {{}}")
                    }
                    "calculate" => "计算结果: 4".to_string(),
                    "write_file" => format!("wrote {} chars", args["content"].as_str().unwrap_or_default().chars().count()),
                    other => {
                        return json!({"result": {"content": [{"type": "text", "text": format!("unknown tool {other}")}], "isError": true}})
                    }
                };
                json!({"result": {"content": [{"type": "text", "text": text}]}})
            }
            _ => json!({"error": {"code": -32601, "message": "method not found"}}),
        }
    }

    /// 启动假 Provider；响应分两次写出以覆盖跨块分帧
    fn fake_provider(log: CallLog) -> McpClient {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(client);
        let (sr, mut sw) = tokio::io::split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(sr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                if request["method"] == "tools/call" {
                    log.lock().unwrap().push((
                        request["params"]["name"].as_str().unwrap().to_string(),
                        request["params"]["arguments"].clone(),
                    ));
                }
                if request["params"]["name"] == "crash" {
                    return;
                }
                let mut response = handle(&request);
                response["jsonrpc"] = json!("2.0");
                response["id"] = request["id"].clone();
                let bytes = format!("{}\n", response).into_bytes();
                let (a, b) = bytes.split_at(bytes.len() / 2);
                sw.write_all(a).await.unwrap();
                sw.flush().await.unwrap();
                tokio::task::yield_now().await;
                sw.write_all(b).await.unwrap();
            }
        });
        McpClient::from_transport(r, w, Duration::from_secs(5))
    }

    async fn setup(llm: MockLlmClient) -> (Orchestrator, CallLog) {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let client = Arc::new(fake_provider(log.clone()));
        let provider: Arc<dyn ToolProvider> = Arc::new(RateLimitedProvider::new(
            client.clone(),
            Arc::new(RateLimiter::new(5, Duration::from_secs(60), Duration::from_millis(100))),
            vec!["web_search".to_string()],
        ));
        let executor = Arc::new(ToolExecutor::new(provider));
        executor.refresh_catalog().await.unwrap();
        let planner = Planner::new(Arc::new(llm), skills::select("researcher"));
        let orchestrator = Orchestrator::new(planner, executor, OrchestratorOptions::default())
            .with_client(client);
        (orchestrator, log)
    }

    fn called_tools(log: &CallLog) -> Vec<String> {
        log.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    #[tokio::test]
    async fn test_catalog_from_provider() {
        let (orch, _) = setup(MockLlmClient::new()).await;
        let catalog = orch.executor().catalog();
        assert_eq!(catalog.tool_names(), vec!["web_search", "fetch_url", "calculate", "write_file"]);
    }

    #[tokio::test]
    async fn test_previous_after_failed_step_aborts() {
        let (orch, log) = setup(MockLlmClient::with_responses(["总结完毕"])).await;
        let plan = Plan::with_steps(vec![
            Step::new("calculate", json!({"expression": "2+2"})),
            Step::new("fetch_url", json!({"url": "https://blocked.example"})),
            Step::new("write_file", json!({"path": "out.md", "content": "{{PREVIOUS}}"})),
        ]);
        let report = orch.execute("q", &plan, &CancellationToken::new()).await.unwrap();

        assert!(report.aborted);
        let flags: Vec<_> = report.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(flags, vec![true, false]);
        assert!(report.outcomes[1].error.as_deref().unwrap().contains("403"));
        assert_eq!(called_tools(&log), vec!["calculate", "fetch_url"]);
        assert_eq!(report.summary, "总结完毕");
    }

    #[tokio::test]
    async fn test_independent_failure_keeps_going() {
        let (orch, log) = setup(MockLlmClient::with_responses(["ok"])).await;
        let plan = Plan::with_steps(vec![
            Step::new("web_search", json!({"query": "rust"})),
            Step::new("fetch_url", json!({"url": "{{search_result_0}}"})),
            Step::new("fetch_url", json!({"url": "{{search_result_1}}"})),
            Step::new("fetch_url", json!({"url": "{{search_result_2}}"})),
        ]);
        let report = orch.execute("q", &plan, &CancellationToken::new()).await.unwrap();

        assert!(!report.aborted);
        let flags: Vec<_> = report.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(flags, vec![true, true, false, true]);
        let urls: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .skip(1)
            .map(|(_, args)| args["url"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            urls,
            vec!["https://one.example", "https://blocked.example", "https://three.example"]
        );
        assert_eq!(
            report.outcomes[3].result.as_deref(),
            Some("page of https://three.example with braces {}")
        );
    }

    #[tokio::test]
    async fn test_successful_steps_all_recorded() {
        let (orch, _) = setup(MockLlmClient::with_responses(["done"])).await;
        let steps = (0..5)
            .map(|i| {
                if i == 0 {
                    Step::new("calculate", json!({"expression": "2+2"}))
                } else {
                    Step::new("write_file", json!({"content": format!("{{{{step_{}}}}}", i - 1)}))
                }
            })
            .collect();
        let report = orch
            .execute("q", &Plan::with_steps(steps), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 5);
        assert!(report.outcomes.iter().all(|o| o.success));
        let order: Vec<_> = report.outcomes.iter().map(|o| o.step_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        // step_0 = "计算结果: 4"（7 个字符）
        assert_eq!(report.outcomes[1].result.as_deref(), Some("wrote 7 chars"));
        assert_eq!(orch.recent_history().len(), 5);
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back() {
        let llm = MockLlmClient::new();
        llm.push_failure("rate limited");
        let (orch, _) = setup(llm).await;
        let plan = Plan::with_steps(vec![Step::new("calculate", json!({"expression": "2+2"}))]);
        let report = orch.execute("q", &plan, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.summary, "计算结果: 4");

        let llm = MockLlmClient::new();
        llm.push_failure("rate limited");
        let (orch, _) = setup(llm).await;
        let plan = Plan::with_steps(vec![Step::new("fetch_url", json!({"url": "https://blocked.example"}))]);
        let report = orch.execute("q", &plan, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.summary, ALL_FAILED_MESSAGE);
    }

    #[tokio::test]
    async fn test_is_error_result_is_step_failure() {
        let (orch, _) = setup(MockLlmClient::with_responses(["s"])).await;
        let plan = Plan::with_steps(vec![
            Step::new("no_such_tool", json!({})),
            Step::new("calculate", json!({"expression": "1"})),
        ]);
        let report = orch.execute("q", &plan, &CancellationToken::new()).await.unwrap();
        assert!(!report.outcomes[0].success);
        assert!(report.outcomes[1].success);
    }

    #[tokio::test]
    async fn test_detail_request_is_augmented() {
        let plan = json!({
            "needsTools": true,
            "thinking": "先搜索",
            "toolCalls": [{"tool": "web_search", "params": {"query": "Rust 2024 新特性"}, "reason": "搜索"}]
        });
        let (orch, log) = setup(MockLlmClient::with_responses([plan.to_string(), "总结".to_string()])).await;
        let report = orch
            .handle_turn("详细介绍 Rust 2024 新特性", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.plan.tool_calls.len(), 4);
        assert_eq!(
            called_tools(&log),
            vec!["web_search", "fetch_url", "fetch_url", "fetch_url"]
        );
        let flags: Vec<_> = report.outcomes.iter().map(|o| o.success).collect();
        assert_eq!(flags, vec![true, true, false, true]);
        assert_eq!(report.summary, "总结");
    }

    #[tokio::test]
    async fn test_step_reference_survives_augmentation() {
        let plan = json!({
            "needsTools": true,
            "toolCalls": [
                {"tool": "web_search", "params": {"query": "rust"}},
                {"tool": "calculate", "params": {"expression": "2+2"}},
                {"tool": "write_file", "params": {"path": "out.md", "content": "{{step_1}}"}}
            ]
        });
        let (orch, log) = setup(MockLlmClient::with_responses([plan.to_string(), "总结".to_string()])).await;
        let report = orch
            .handle_turn("详细介绍 rust", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.plan.tool_calls.len(), 6);
        let calls = log.lock().unwrap().clone();
        let (tool, args) = calls.last().unwrap();
        assert_eq!(tool, "write_file");
        assert_eq!(args["content"], "计算结果: 4");
    }

    #[tokio::test]
    async fn test_direct_answer_skips_tools() {
        let (orch, log) =
            setup(MockLlmClient::with_responses([r#"闲聊而已 {"needsTools": false, "response": "你好呀"}"#])).await;
        let report = orch.handle_turn("你好", &CancellationToken::new()).await.unwrap();
        assert_eq!(report.summary, "你好呀");
        assert!(report.outcomes.is_empty());
        assert!(called_tools(&log).is_empty());
    }

    #[tokio::test]
    async fn test_provider_crash_propagates() {
        let (orch, _) = setup(MockLlmClient::new()).await;
        let plan = Plan::with_steps(vec![
            Step::new("crash", json!({})),
            Step::new("calculate", json!({"expression": "1"})),
        ]);
        let err = orch
            .execute("q", &plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProviderTerminated(_)), "{:?}", err);
        assert!(!orch.executor().catalog().is_empty());
    }
}
