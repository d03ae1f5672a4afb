//! 会话监管：轮次取消与整体关闭
//!
//! 根 token 表示整个会话；每轮计划执行从根派生一个子 token。
//! Ctrl+C 只取消当前轮，关闭会话则取消根 token（所有子 token 随之取消）。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    root: CancellationToken,
    current_turn: Mutex<Option<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新一轮，返回本轮的取消令牌
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        *self.lock_turn() = Some(token.clone());
        token
    }

    /// 取消当前轮；没有进行中的轮次时返回 false
    pub fn cancel_turn(&self) -> bool {
        match self.lock_turn().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 本轮结束（正常完成时调用，避免后续 Ctrl+C 误取消）
    pub fn end_turn(&self) {
        self.lock_turn().take();
    }

    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// 会话根令牌：关闭会话时取消
    pub fn shutdown_token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    fn lock_turn(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current_turn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_turn_only_affects_current() {
        let sup = SessionSupervisor::new();
        let first = sup.begin_turn();
        assert!(sup.cancel_turn());
        assert!(first.is_cancelled());
        assert!(!sup.cancel_turn());

        let second = sup.begin_turn();
        assert!(!second.is_cancelled());
        sup.end_turn();
        assert!(!sup.cancel_turn());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_shutdown_cancels_children() {
        let sup = SessionSupervisor::new();
        let turn = sup.begin_turn();
        sup.shutdown();
        assert!(turn.is_cancelled());
        assert!(sup.is_shut_down());
    }
}
