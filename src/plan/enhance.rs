//! 计划补全：用户要求详细内容时，为搜索结果补足 fetch_url 步骤
//!
//! 搜索只返回标题与摘要；输入含「详细 / 对比」一类关键词、计划里有列表工具且
//! fetch_url 少于 3 个时，在已有 fetch 步骤之后插入引用 `{{search_result_K}}` 的 fetch_url。
//! 插入点之后的原有步骤下标后移，其参数中的 `{{step_N}}` 同步改写，仍指向原来的步骤。

use serde_json::{json, Value};

use crate::plan::resolver::{tokenize, MarkerRef, Segment};
use crate::plan::{ListSpec, Step};

pub const FETCH_TOOL: &str = "fetch_url";
pub const MIN_FETCHES: usize = 3;

const DETAIL_KEYWORDS: &[&str] = &[
    "详细", "深入", "全面", "完整", "深度", "分析", "对比", "比较", "新特性", "新功能", "最佳实践",
    "优化", "技巧", "detail", "in-depth", "compare",
];

pub fn wants_detail(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();
    DETAIL_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// 返回补全后的步骤；条件不满足时原样返回
pub fn augment_with_fetches(user_input: &str, steps: Vec<Step>, list: &ListSpec) -> Vec<Step> {
    if !wants_detail(user_input) {
        return steps;
    }
    let Some(search_index) = steps.iter().position(|s| s.tool == list.tool) else {
        return steps;
    };
    let existing = steps.iter().filter(|s| s.tool == FETCH_TOOL).count();
    if existing >= MIN_FETCHES {
        return steps;
    }

    let to_add = MIN_FETCHES - existing;
    let insert_at = (search_index + 1 + existing).min(steps.len());
    let mut enhanced: Vec<Step> = steps
        .into_iter()
        .map(|mut step| {
            for value in step.params.values_mut() {
                shift_step_markers(value, insert_at, to_add, list);
            }
            step
        })
        .collect();
    for i in 0..to_add {
        let result_index = existing + i;
        enhanced.insert(
            insert_at + i,
            Step::new(FETCH_TOOL, json!({ "url": format!("{{{{search_result_{result_index}}}}}") }))
                .reason(format!("[自动补充] 获取第 {} 篇文章完整内容", result_index + 1)),
        );
    }
    tracing::info!(added = to_add, total = enhanced.len(), "plan augmented with fetch_url steps");
    enhanced
}

/// 把指向 `from` 及之后步骤的 `{{step_N}}` 改写为 `{{step_(N+by)}}`
fn shift_step_markers(value: &mut Value, from: usize, by: usize, list: &ListSpec) {
    match value {
        Value::String(text) => {
            let segments = tokenize(text, list);
            let shifted = segments.iter().any(
                |seg| matches!(seg, Segment::Marker { reference: MarkerRef::Step(n), .. } if *n >= from),
            );
            if !shifted {
                return;
            }
            let rewritten: String = segments
                .iter()
                .map(|seg| match seg {
                    Segment::Marker {
                        reference: MarkerRef::Step(n),
                        ..
                    } if *n >= from => format!("{{{{step_{}}}}}", n + by),
                    Segment::Marker { raw, .. } => raw.to_string(),
                    Segment::Literal(lit) => lit.to_string(),
                })
                .collect();
            *text = rewritten;
        }
        Value::Array(items) => {
            for item in items {
                shift_step_markers(item, from, by, list);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                shift_step_markers(item, from, by, list);
            }
        }
        _ => {}
    }
}
