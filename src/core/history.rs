//! 跨轮次状态：最近工具结果与对话记忆
//!
//! RecentHistory 是唯一跨轮次保留的工具结果，容量固定，超出时丢弃最旧的记录，
//! 仅作为规划提示词的可选上下文。ConversationMemory 保留最近 N 轮 user/assistant 消息。

use std::collections::VecDeque;

use serde::Serialize;

use crate::llm::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub tool: String,
    pub result: String,
}

#[derive(Debug, Clone)]
pub struct RecentHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl RecentHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, tool: impl Into<String>, result: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            tool: tool.into(),
            result: result.into(),
        });
    }

    /// 最近 n 条，按时间先后
    pub fn last(&self, n: usize) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// 对话记忆：最多保留 max_turns * 2 条消息
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    messages: VecDeque<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_turns * 2 {
            self.messages.pop_front();
        }
    }

    /// 最近 n 条消息
    pub fn recent(&self, n: usize) -> Vec<Message> {
        self.messages
            .iter()
            .skip(self.messages.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
