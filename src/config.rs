//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再读显式指定的文件，最后用环境变量 `MCP_SKILLS__*` 覆盖
//! （双下划线表示嵌套，如 `MCP_SKILLS__PROVIDER__COMMAND=python3`）。所有字段都有默认值。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::plan::ListSpec;
use crate::transport::ProviderCommand;

pub const ENV_PREFIX: &str = "MCP_SKILLS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub provider: ProviderSection,
    pub rate_limit: RateLimitSection,
    pub planner: PlannerSection,
}

/// [app] 段：技能、对话轮数、最近结果容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub skill: String,
    pub max_context_turns: usize,
    pub history_capacity: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            skill: crate::skills::DEFAULT_SKILL.to_string(),
            max_context_turns: 10,
            history_capacity: 10,
        }
    }
}

/// [llm] 段：provider 为空时按 API Key 自动选择
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// [provider] 段：工具 Provider 子进程
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub command: String,
    pub args: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            args: vec!["mcp-server.js".to_string()],
            request_timeout_ms: 10_000,
        }
    }
}

impl ProviderSection {
    pub fn to_command(&self) -> ProviderCommand {
        ProviderCommand {
            program: self.command.clone(),
            args: self.args.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// [rate_limit] 段：对哪些工具限流，以及窗口参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub tools: Vec<String>,
    pub max_calls: usize,
    pub window_ms: u64,
    pub margin_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            tools: vec!["web_search".to_string()],
            max_calls: 5,
            window_ms: 60_000,
            margin_ms: 100,
        }
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// 用户要求详细内容时自动补足 fetch_url
    pub auto_fetch: bool,
    /// 可用 `{{search_result_K}}` 引用的列表工具及取值字段
    pub list_tool: String,
    pub list_field: String,
}

impl Default for PlannerSection {
    fn default() -> Self {
        let list = ListSpec::default();
        Self {
            auto_fetch: true,
            list_tool: list.tool,
            list_field: list.field,
        }
    }
}

impl PlannerSection {
    pub fn list_spec(&self) -> ListSpec {
        ListSpec {
            tool: self.list_tool.clone(),
            field: self.list_field.clone(),
        }
    }
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("provider.args")
            .with_list_parse_key("rate_limit.tools"),
    );

    builder.build()?.try_deserialize()
}

/// 加载失败时告警并回退到默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.skill, "general");
        assert_eq!(cfg.app.history_capacity, 10);
        assert_eq!(cfg.rate_limit.tools, vec!["web_search"]);
        assert_eq!(cfg.rate_limit.max_calls, 5);
        assert_eq!(cfg.rate_limit.window_ms, 60_000);
        assert_eq!(cfg.provider.request_timeout(), Duration::from_secs(10));
        assert!(cfg.planner.auto_fetch);
        assert_eq!(cfg.planner.list_spec(), ListSpec::default());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[app]
skill = "researcher"

[provider]
command = "python3"
args = ["server.py", "--stdio"]

[rate_limit]
max_calls = 2
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.skill, "researcher");
        assert_eq!(cfg.app.max_context_turns, 10);
        assert_eq!(cfg.provider.to_command().program, "python3");
        assert_eq!(cfg.provider.args, vec!["server.py", "--stdio"]);
        assert_eq!(cfg.rate_limit.max_calls, 2);
        assert_eq!(cfg.rate_limit.window_ms, 60_000);
    }

    #[test]
    fn test_missing_explicit_file_falls_back() {
        let cfg = load_config_or_default(Some(PathBuf::from("/definitely/not/here.toml")));
        assert_eq!(cfg.rate_limit.max_calls, 5);
    }
}
