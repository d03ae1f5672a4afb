//! 步骤参数中的结果引用标记解析
//!
//! 字符串参数可以引用同一计划中此前步骤的结果：
//!
//! | 标记 | 含义 |
//! |---|---|
//! | `{{PREVIOUS}}` | 上一步的结果 |
//! | `{{step_N}}` | 第 N 步的结果（N 必须小于当前步下标） |
//! | `{{tool:NAME}}` | 工具 NAME 最近一次成功的结果 |
//! | `{{search_result_K}}` | 列表工具（默认 web_search）最近结果中第 K 个元素的 url |
//! | `{{NAME[K].FIELD}}` | 工具 NAME 最近结果中第 K 个元素的 FIELD 字段 |
//!
//! 替换是纯文本的；无法解析的标记原样保留，解析本身从不失败。
//! 列表结果可以是 JSON 数组，也可以是带 `results` 数组的对象。

use std::collections::HashMap;

use serde_json::{Map, Value};

/// 标记引用的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerRef {
    Previous,
    Step(usize),
    Tool(String),
    Element {
        tool: String,
        index: usize,
        field: String,
    },
}

/// 字符串切分后的片段；未识别的 `{{...}}` 归入 Literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Marker { raw: &'a str, reference: MarkerRef },
}

/// 列表工具约定：哪个工具的结果可用 `{{search_result_K}}` 引用、取哪个字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSpec {
    pub tool: String,
    pub field: String,
}

impl Default for ListSpec {
    fn default() -> Self {
        Self {
            tool: "web_search".to_string(),
            field: "url".to_string(),
        }
    }
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// 将字符串切分为字面量与标记片段
pub fn tokenize<'a>(text: &'a str, list: &ListSpec) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut rest = text;
    let mut literal_start = 0usize;
    let mut offset = 0usize;

    while let Some(open) = rest.find(OPEN) {
        let inner_start = open + OPEN.len();
        let Some(close) = rest[inner_start..].find(CLOSE) else {
            break;
        };
        let inner_end = inner_start + close;
        let raw_end = inner_end + CLOSE.len();

        if let Some(reference) = classify(rest[inner_start..inner_end].trim(), list) {
            let abs_open = offset + open;
            if abs_open > literal_start {
                segments.push(Segment::Literal(&text[literal_start..abs_open]));
            }
            segments.push(Segment::Marker {
                raw: &text[abs_open..offset + raw_end],
                reference,
            });
            literal_start = offset + raw_end;
        }
        offset += raw_end;
        rest = &text[offset..];
    }

    if literal_start < text.len() {
        segments.push(Segment::Literal(&text[literal_start..]));
    }
    segments
}

/// 按优先级识别标记：PREVIOUS → step_N → tool:NAME → search_result_K → NAME[K].FIELD
fn classify(inner: &str, list: &ListSpec) -> Option<MarkerRef> {
    if inner == "PREVIOUS" {
        return Some(MarkerRef::Previous);
    }
    if let Some(n) = inner.strip_prefix("step_").and_then(parse_index) {
        return Some(MarkerRef::Step(n));
    }
    if let Some(name) = inner.strip_prefix("tool:") {
        let name = name.trim();
        if !name.is_empty() {
            return Some(MarkerRef::Tool(name.to_string()));
        }
        return None;
    }
    if let Some(k) = inner.strip_prefix("search_result_").and_then(parse_index) {
        return Some(MarkerRef::Element {
            tool: list.tool.clone(),
            index: k,
            field: list.field.clone(),
        });
    }
    parse_element(inner)
}

fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `NAME[K].FIELD`
fn parse_element(inner: &str) -> Option<MarkerRef> {
    let (name, rest) = inner.split_once('[')?;
    let (index, rest) = rest.split_once(']')?;
    let field = rest.strip_prefix('.')?;
    let name = name.trim();
    let valid_ident = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    };
    if !valid_ident(name) || !valid_ident(field) {
        return None;
    }
    Some(MarkerRef::Element {
        tool: name.to_string(),
        index: parse_index(index.trim())?,
        field: field.to_string(),
    })
}

/// 单次计划执行期间的成功结果：按步骤下标与按工具名两种索引
#[derive(Debug, Clone, Default)]
pub struct ResultContext {
    by_index: HashMap<usize, String>,
    by_tool: HashMap<String, (usize, String)>,
}

impl ResultContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次成功结果；同名工具只会被更靠后的步骤覆盖
    pub fn record(&mut self, index: usize, tool: &str, result: &str) {
        self.by_index.insert(index, result.to_string());
        let newer = self
            .by_tool
            .get(tool)
            .map_or(true, |(existing, _)| index >= *existing);
        if newer {
            self.by_tool
                .insert(tool.to_string(), (index, result.to_string()));
        }
    }

    pub fn get_step(&self, index: usize) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn get_tool(&self, tool: &str) -> Option<&str> {
        self.by_tool.get(tool).map(|(_, text)| text.as_str())
    }

    /// 成功记录的步骤数
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// 从工具最近结果的列表中取第 index 个元素的 field
    pub fn get_element(&self, tool: &str, index: usize, field: &str) -> Option<String> {
        let parsed: Value = serde_json::from_str(self.get_tool(tool)?).ok()?;
        let items = match &parsed {
            Value::Array(items) => items,
            Value::Object(obj) => obj.get("results")?.as_array()?,
            _ => return None,
        };
        match items.get(index)?.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn lookup(&self, reference: &MarkerRef, current_index: usize) -> Option<String> {
        match reference {
            MarkerRef::Previous => current_index
                .checked_sub(1)
                .and_then(|prev| self.get_step(prev))
                .map(str::to_string),
            MarkerRef::Step(n) if *n < current_index => self.get_step(*n).map(str::to_string),
            MarkerRef::Step(_) => None,
            MarkerRef::Tool(name) => self.get_tool(name).map(str::to_string),
            MarkerRef::Element { tool, index, field } => self.get_element(tool, *index, field),
        }
    }
}

/// 解析一步的参数；非字符串值原样透传，嵌套数组与对象递归处理
pub fn resolve(
    params: &Map<String, Value>,
    ctx: &ResultContext,
    current_index: usize,
    list: &ListSpec,
) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, ctx, current_index, list)))
        .collect()
}

fn resolve_value(value: &Value, ctx: &ResultContext, current_index: usize, list: &ListSpec) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, ctx, current_index, list)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, ctx, current_index, list))
                .collect(),
        ),
        Value::Object(map) => Value::Object(resolve(map, ctx, current_index, list)),
        other => other.clone(),
    }
}

fn resolve_str(text: &str, ctx: &ResultContext, current_index: usize, list: &ListSpec) -> String {
    let segments = tokenize(text, list);
    if !segments.iter().any(|s| matches!(s, Segment::Marker { .. })) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for segment in segments {
        match segment {
            Segment::Literal(lit) => out.push_str(lit),
            Segment::Marker { raw, reference } => match ctx.lookup(&reference, current_index) {
                Some(value) => out.push_str(&value),
                None => {
                    tracing::warn!(step = current_index, marker = raw, "unresolved marker left as-is");
                    out.push_str(raw);
                }
            },
        }
    }
    out
}

/// 值中是否仍有可识别的标记（解析后复查用）
pub fn has_unresolved_markers(value: &Value, list: &ListSpec) -> bool {
    match value {
        Value::String(s) => tokenize(s, list)
            .iter()
            .any(|seg| matches!(seg, Segment::Marker { .. })),
        Value::Array(items) => items.iter().any(|v| has_unresolved_markers(v, list)),
        Value::Object(map) => map.values().any(|v| has_unresolved_markers(v, list)),
        _ => false,
    }
}

/// 参数中出现的全部标记引用
pub fn markers(params: &Map<String, Value>, list: &ListSpec) -> Vec<MarkerRef> {
    let mut found = Vec::new();
    for value in params.values() {
        collect_markers(value, list, &mut found);
    }
    found
}

fn collect_markers(value: &Value, list: &ListSpec, found: &mut Vec<MarkerRef>) {
    match value {
        Value::String(s) => found.extend(tokenize(s, list).into_iter().filter_map(|seg| match seg {
            Segment::Marker { reference, .. } => Some(reference),
            Segment::Literal(_) => None,
        })),
        Value::Array(items) => items.iter().for_each(|v| collect_markers(v, list, found)),
        Value::Object(map) => map.values().for_each(|v| collect_markers(v, list, found)),
        _ => {}
    }
}

/// 第 step_index 步的参数是否引用了失败的第 failed_index 步（工具 failed_tool）的输出
pub fn depends_on(
    step_index: usize,
    params: &Map<String, Value>,
    failed_index: usize,
    failed_tool: &str,
    list: &ListSpec,
) -> bool {
    markers(params, list).iter().any(|m| match m {
        MarkerRef::Previous => step_index == failed_index + 1,
        MarkerRef::Step(n) => *n == failed_index,
        MarkerRef::Tool(name) => name == failed_tool,
        MarkerRef::Element { tool, .. } => tool == failed_tool,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn list() -> ListSpec {
        ListSpec::default()
    }

    #[test]
    fn test_tokenize_kinds_and_precedence() {
        let segs = tokenize(
            "a {{PREVIOUS}} b {{ step_2 }} {{tool:calc}} {{search_result_1}} {{news[0].title}} {{other}}",
            &list(),
        );
        let refs: Vec<_> = segs
            .iter()
            .filter_map(|s| match s {
                Segment::Marker { reference, .. } => Some(reference.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            refs,
            vec![
                MarkerRef::Previous,
                MarkerRef::Step(2),
                MarkerRef::Tool("calc".into()),
                MarkerRef::Element { tool: "web_search".into(), index: 1, field: "url".into() },
                MarkerRef::Element { tool: "news".into(), index: 0, field: "title".into() },
            ]
        );
        // 未识别的标记并入字面量
        assert!(matches!(segs.last(), Some(Segment::Literal(" {{other}}"))));
    }

    #[test]
    fn test_tokenize_unclosed_and_plain() {
        assert_eq!(tokenize("no markers", &list()), vec![Segment::Literal("no markers")]);
        assert_eq!(tokenize("{{PREVIOUS", &list()), vec![Segment::Literal("{{PREVIOUS")]);
        assert_eq!(tokenize("", &list()), vec![]);
        assert_eq!(tokenize("{{step_x}}", &list()), vec![Segment::Literal("{{step_x}}")]);
    }

    #[test]
    fn test_resolve_previous_and_step() {
        let mut ctx = ResultContext::new();
        ctx.record(0, "calculate", "4");
        ctx.record(1, "calculate", "8");
        let out = resolve(
            &params(json!({"a": "{{PREVIOUS}}", "b": "x={{step_0}}, y={{ step_1 }}", "n": 3})),
            &ctx,
            2,
            &list(),
        );
        assert_eq!(out["a"], "8");
        assert_eq!(out["b"], "x=4, y=8");
        assert_eq!(out["n"], 3);
    }

    #[test]
    fn test_forward_reference_stays_literal() {
        let mut ctx = ResultContext::new();
        ctx.record(0, "a", "zero");
        ctx.record(1, "b", "one");
        // 当前是第 1 步：step_1 不是「之前」的步骤
        let out = resolve(&params(json!({"v": "{{step_1}} {{step_5}}"})), &ctx, 1, &list());
        assert_eq!(out["v"], "{{step_1}} {{step_5}}");
        assert!(has_unresolved_markers(&out["v"], &list()));
    }

    #[test]
    fn test_previous_on_first_step_stays_literal() {
        let ctx = ResultContext::new();
        let out = resolve(&params(json!({"v": "{{PREVIOUS}}"})), &ctx, 0, &list());
        assert_eq!(out["v"], "{{PREVIOUS}}");
    }

    #[test]
    fn test_tool_marker_uses_latest() {
        let mut ctx = ResultContext::new();
        ctx.record(0, "current_time", "10:00");
        ctx.record(2, "current_time", "10:05");
        ctx.record(1, "current_time", "stale");
        let out = resolve(&params(json!({"t": "{{tool:current_time}}"})), &ctx, 3, &list());
        assert_eq!(out["t"], "10:05");
        let out = resolve(&params(json!({"t": "{{tool:unknown}}"})), &ctx, 3, &list());
        assert_eq!(out["t"], "{{tool:unknown}}");
    }

    #[test]
    fn test_search_result_elements() {
        let mut ctx = ResultContext::new();
        ctx.record(
            0,
            "web_search",
            r#"[{"title":"A","url":"https://a.example"},{"title":"B","url":"https://b.example"}]"#,
        );
        let out = resolve(
            &params(json!({"url": "{{search_result_1}}", "t": "{{web_search[0].title}}", "missing": "{{search_result_7}}"})),
            &ctx,
            1,
            &list(),
        );
        assert_eq!(out["url"], "https://b.example");
        assert_eq!(out["t"], "A");
        assert_eq!(out["missing"], "{{search_result_7}}");
    }

    #[test]
    fn test_results_object_form_and_non_json() {
        let mut ctx = ResultContext::new();
        ctx.record(0, "web_search", r#"{"query":"q","results":[{"url":"u0","rank":1}]}"#);
        assert_eq!(ctx.get_element("web_search", 0, "url").as_deref(), Some("u0"));
        assert_eq!(ctx.get_element("web_search", 0, "rank").as_deref(), Some("1"));
        ctx.record(1, "web_search", "plain text results");
        assert_eq!(ctx.get_element("web_search", 0, "url"), None);
    }

    #[test]
    fn test_nested_values_resolved() {
        let mut ctx = ResultContext::new();
        ctx.record(0, "read_file", "hello");
        let out = resolve(
            &params(json!({"items": ["{{PREVIOUS}}", {"inner": "<{{step_0}}>"}], "flag": true})),
            &ctx,
            1,
            &list(),
        );
        assert_eq!(out["items"], json!(["hello", {"inner": "<hello>"}]));
        assert_eq!(out["flag"], true);
        assert!(!has_unresolved_markers(&Value::Object(out), &list()));
    }

    #[test]
    fn test_multiple_markers_same_string() {
        let mut ctx = ResultContext::new();
        for i in 0..4 {
            ctx.record(i, "t", &format!("r{i}"));
        }
        let out = resolve(
            &params(json!({"v": "{{step_0}}{{step_1}}{{step_2}}{{PREVIOUS}}"})),
            &ctx,
            4,
            &list(),
        );
        assert_eq!(out["v"], "r0r1r2r3");
        assert_eq!(ctx.len(), 4);
    }

    #[test]
    fn test_depends_on() {
        let l = list();
        let p = params(json!({"content": "{{PREVIOUS}}"}));
        assert!(depends_on(2, &p, 1, "fetch_url", &l));
        assert!(!depends_on(3, &p, 1, "fetch_url", &l));

        let p = params(json!({"a": "{{step_1}}"}));
        assert!(depends_on(4, &p, 1, "x", &l));
        let p = params(json!({"a": "{{tool:fetch_url}}"}));
        assert!(depends_on(4, &p, 1, "fetch_url", &l));
        let p = params(json!({"url": "{{search_result_0}}"}));
        assert!(depends_on(4, &p, 0, "web_search", &l));
        assert!(!depends_on(4, &p, 0, "fetch_url", &l));
        let p = params(json!({"expression": "1+1"}));
        assert!(!depends_on(2, &p, 1, "calculate", &l));
    }
}
