//! 增量 JSON 分帧器
//!
//! stdout 是无长度前缀、无分隔保证的字节流：一条消息可能被切成多块，一块里也可能有多条消息。
//! 分帧器维护累积缓冲区与扫描位置，按 `{Idle, InObject, InString, Escaped}` 状态逐字节推进，
//! 字符串内部（含转义字符）的 `{` `}` 不计入深度；深度归零即得到一个候选帧并尝试解析。
//! 扫描位置跨 push 保留，已扫描字节不会重扫，总工作量与输入字节数成线性。
//!
//! JSON 的结构字符都是 ASCII，UTF-8 多字节序列不含 ASCII 字节，因此按字节扫描是安全的。

use serde_json::Value;

/// 缓冲区前缀已消费超过该长度时才整理（避免每块都搬移剩余字节）
const COMPACT_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// 对象之外：跳过噪声直到遇到 `{`
    Idle,
    /// 对象内部，携带当前嵌套深度
    InObject(usize),
    /// 字符串字面量内部
    InString(usize),
    /// 字符串内反斜杠之后的一个字符
    Escaped(usize),
}

/// 增量分帧器：push 字节块，next_frame 逐条取出已完整解析的 JSON
#[derive(Debug)]
pub struct JsonFramer {
    buf: Vec<u8>,
    /// 已消费（已发出或已丢弃）的前缀长度
    head: usize,
    /// 当前候选对象起点（仅在非 Idle 状态有效）
    start: usize,
    /// 下一个待扫描的字节
    pos: usize,
    state: ScanState,
    /// 累计因解析失败丢弃的片段数
    discarded: usize,
}

impl Default for JsonFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            head: 0,
            start: 0,
            pos: 0,
            state: ScanState::Idle,
            discarded: 0,
        }
    }

    /// 追加新到达的字节
    pub fn push(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// 取出下一条完整消息；缓冲区内没有完整消息时返回 None（保留缓冲等待更多字节）
    pub fn next_frame(&mut self) -> Option<Value> {
        loop {
            let end = self.scan()?;
            let parsed = serde_json::from_slice::<Value>(&self.buf[self.start..end]);
            // 无论成败都越过该片段，保证损坏输入也能向前推进
            self.head = end;
            match parsed {
                Ok(value) => return Some(value),
                Err(e) => {
                    self.discarded += 1;
                    tracing::warn!(
                        bytes = end - self.start,
                        error = %e,
                        "discarding unparseable frame"
                    );
                }
            }
        }
    }

    /// push 后取出当前所有完整消息
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Value> {
        self.push(bytes);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// 尚未消费的字节数
    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// 从 pos 继续扫描；深度归零时返回候选帧的结束位置（不含）
    fn scan(&mut self) -> Option<usize> {
        while self.pos < self.buf.len() {
            let byte = self.buf[self.pos];
            let at = self.pos;
            self.pos += 1;

            self.state = match self.state {
                ScanState::Idle => {
                    if byte == b'{' {
                        self.start = at;
                        ScanState::InObject(1)
                    } else {
                        // 对象之前的噪声直接丢弃
                        self.head = self.pos;
                        ScanState::Idle
                    }
                }
                ScanState::InObject(depth) => match byte {
                    b'"' => ScanState::InString(depth),
                    b'{' => ScanState::InObject(depth + 1),
                    b'}' if depth == 1 => {
                        self.state = ScanState::Idle;
                        return Some(self.pos);
                    }
                    b'}' => ScanState::InObject(depth - 1),
                    _ => ScanState::InObject(depth),
                },
                ScanState::InString(depth) => match byte {
                    b'\\' => ScanState::Escaped(depth),
                    b'"' => ScanState::InObject(depth),
                    _ => ScanState::InString(depth),
                },
                ScanState::Escaped(depth) => ScanState::InString(depth),
            };
        }
        None
    }

    fn compact(&mut self) {
        if self.head == 0 {
            return;
        }
        if self.head < COMPACT_THRESHOLD && self.head * 2 < self.buf.len() {
            return;
        }
        self.buf.drain(..self.head);
        self.pos -= self.head;
        if self.state != ScanState::Idle {
            self.start -= self.head;
        }
        self.head = 0;
    }
}

/// 从任意文本中提取第一个可解析的平衡 `{...}` 对象（用于 LLM 回复中夹带的 JSON）
pub fn extract_first_object(text: &str) -> Option<Value> {
    let mut framer = JsonFramer::new();
    framer.push(text.as_bytes());
    framer.next_frame()
}
