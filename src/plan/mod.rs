//! 计划层：计划类型、LLM 回复解析、参数引用解析、计划补全与 Planner

pub mod enhance;
pub mod events;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod types;

pub use enhance::augment_with_fetches;
pub use events::PlanEvent;
pub use parser::{parse_plan, try_parse_plan};
pub use planner::Planner;
pub use resolver::{ListSpec, ResultContext};
pub use types::{Plan, Step, StepOutcome};

/// 按字符截断（不切断多字节字符）
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
