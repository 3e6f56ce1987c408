//! 远端交互能力 - 基础设施层
//!
//! 只描述"一个会话能做什么"，不认识编号、验证码或重试。
//! 浏览器实现见 [`crate::infrastructure::chromium_session`]。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 页面元素定位方式
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    Xpath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(selector: impl Into<String>) -> Self {
        Locator::Xpath(selector.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::Xpath(s) => write!(f, "xpath={}", s),
        }
    }
}

/// 等待条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// 元素出现在 DOM 中
    Present(Locator),
    /// 元素可见且可点击
    Clickable(Locator),
}

impl WaitCondition {
    pub fn locator(&self) -> &Locator {
        match self {
            WaitCondition::Present(l) | WaitCondition::Clickable(l) => l,
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::Present(l) => write!(f, "出现 {}", l),
            WaitCondition::Clickable(l) => write!(f, "可点击 {}", l),
        }
    }
}

/// 会话操作错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("元素未找到: {locator}")]
    NotFound { locator: String },

    #[error("等待超时 ({timeout:?}): {what}")]
    TimeoutExceeded { what: String, timeout: Duration },

    #[error("页面操作失败: {0}")]
    Operation(String),

    /// 会话本身已不可用（浏览器退出、连接断开）
    #[error("会话不可用: {0}")]
    Fault(String),
}

impl SessionError {
    pub fn operation(err: impl fmt::Display) -> Self {
        SessionError::Operation(err.to_string())
    }

    /// 是否为会话级故障，需要中止整个 worker 区间
    pub fn is_fault(&self) -> bool {
        matches!(self, SessionError::Fault(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// 远端交互会话
///
/// 一个会话同一时间只承载一次提交，所以所有方法都取 `&mut self`。
#[async_trait]
pub trait RemoteSession: Send {
    /// 元素句柄
    type Element: Send + Sync;

    async fn navigate(&mut self, url: &str) -> SessionResult<()>;

    async fn find_element(&mut self, locator: &Locator) -> SessionResult<Self::Element>;

    /// 轮询直到条件满足，超时返回 `TimeoutExceeded`
    async fn wait_until(
        &mut self,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> SessionResult<Self::Element>;

    async fn click(&mut self, element: &Self::Element) -> SessionResult<()>;

    /// 清空输入框后写入文本
    async fn set_text(&mut self, element: &Self::Element, value: &str) -> SessionResult<()>;

    /// 按可见文本选择下拉项
    async fn select_option(&mut self, element: &Self::Element, visible_text: &str)
        -> SessionResult<()>;

    /// 截取元素图像（PNG）
    async fn capture_image(&mut self, element: &Self::Element) -> SessionResult<Vec<u8>>;

    async fn page_text(&mut self) -> SessionResult<String>;

    async fn page_source(&mut self) -> SessionResult<String>;

    async fn pending_dialog(&mut self) -> SessionResult<bool>;

    async fn accept_dialog(&mut self) -> SessionResult<()>;
}

/// 会话工厂：负责会话的获取与释放
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: RemoteSession + 'static;

    async fn acquire(&self, worker: usize) -> SessionResult<Self::Session>;

    async fn release(&self, session: Self::Session) -> SessionResult<()>;
}
