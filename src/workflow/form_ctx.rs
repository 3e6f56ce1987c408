//! 编号处理上下文
//!
//! 封装"哪个会话正在处理哪个编号的第几次尝试"这一信息

use std::fmt::Display;

use crate::models::Identifier;

/// 单次尝试的上下文
#[derive(Debug, Clone)]
pub struct FormCtx<'a> {
    /// 会话编号（仅用于日志显示）
    pub worker: usize,

    pub identifier: &'a Identifier,

    /// 第几次尝试（从1开始）
    pub attempt: u32,
}

impl<'a> FormCtx<'a> {
    pub fn new(worker: usize, identifier: &'a Identifier, attempt: u32) -> Self {
        Self {
            worker,
            identifier,
            attempt,
        }
    }
}

impl Display for FormCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[会话 {}] [编号 {} 第 {} 次]",
            self.worker, self.identifier, self.attempt
        )
    }
}
