//! 基于 chromiumoxide 的远端交互会话 - 基础设施层
//!
//! 每个 worker 独占一个浏览器进程，会话只暴露 [`RemoteSession`] 能力。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::browser::{launch_browser, remove_profile_dir, BrowserOptions};
use crate::infrastructure::remote::{
    Locator, RemoteSession, SessionError, SessionFactory, SessionResult, WaitCondition,
};

const IS_CLICKABLE_JS: &str = r#"function() {
    const rect = this.getBoundingClientRect();
    return !this.disabled && rect.width > 0 && rect.height > 0;
}"#;

const CLEAR_VALUE_JS: &str = "function() { this.value = ''; }";

const BODY_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

/// 浏览器会话
pub struct ChromiumSession {
    worker: usize,
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    dialog_task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    dialog_open: Arc<AtomicBool>,
    poll_interval: Duration,
    profile_dir: PathBuf,
}

impl ChromiumSession {
    /// 启动浏览器并开始监听 JS 弹窗
    pub async fn launch(
        options: &BrowserOptions,
        worker: usize,
        poll_interval: Duration,
    ) -> anyhow::Result<Self> {
        let launched = launch_browser(options, worker).await?;

        let dialog_open = Arc::new(AtomicBool::new(false));
        let mut dialogs = launched
            .page
            .event_listener::<EventJavascriptDialogOpening>()
            .await?;
        let flag = dialog_open.clone();
        let dialog_task = tokio::spawn(async move {
            while let Some(event) = dialogs.next().await {
                debug!("[会话 {}] 检测到弹窗: {}", worker, event.message);
                flag.store(true, Ordering::SeqCst);
            }
        });

        Ok(Self {
            worker,
            browser: launched.browser,
            page: launched.page,
            handler_task: launched.handler_task,
            dialog_task,
            alive: launched.alive,
            dialog_open,
            poll_interval,
            profile_dir: launched.profile_dir,
        })
    }

    /// 关闭浏览器进程并停止后台任务
    pub async fn shutdown(mut self) -> SessionResult<()> {
        debug!("[会话 {}] 正在关闭浏览器", self.worker);
        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            warn!("[会话 {}] 等待浏览器进程退出失败: {}", self.worker, e);
        }
        self.dialog_task.abort();
        self.handler_task.abort();
        remove_profile_dir(&self.profile_dir, self.worker).await;
        closed.map(|_| ()).map_err(SessionError::operation)
    }

    fn ensure_alive(&self) -> SessionResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::Fault("浏览器事件循环已退出".to_string()))
        }
    }

    /// 事件循环已退出时任何错误都视为会话故障
    fn map_err(&self, err: CdpError) -> SessionError {
        if self.alive.load(Ordering::SeqCst) {
            SessionError::operation(err)
        } else {
            SessionError::Fault(err.to_string())
        }
    }
}

async fn locate(page: &Page, locator: &Locator) -> Result<Element, CdpError> {
    match locator {
        Locator::Css(selector) => page.find_element(selector.as_str()).await,
        Locator::Xpath(selector) => page.find_xpath(selector.as_str()).await,
    }
}

async fn is_clickable(element: &Element) -> bool {
    match element.call_js_fn(IS_CLICKABLE_JS, false).await {
        Ok(ret) => ret.result.value.and_then(|v| v.as_bool()).unwrap_or(false),
        Err(_) => false,
    }
}

#[async_trait]
impl RemoteSession for ChromiumSession {
    type Element = Element;

    async fn navigate(&mut self, url: &str) -> SessionResult<()> {
        self.ensure_alive()?;
        debug!("[会话 {}] 导航到: {}", self.worker, url);
        self.page.goto(url).await.map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn find_element(&mut self, locator: &Locator) -> SessionResult<Element> {
        self.ensure_alive()?;
        locate(&self.page, locator).await.map_err(|e| {
            if self.alive.load(Ordering::SeqCst) {
                SessionError::NotFound {
                    locator: locator.to_string(),
                }
            } else {
                SessionError::Fault(e.to_string())
            }
        })
    }

    async fn wait_until(
        &mut self,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> SessionResult<Element> {
        self.ensure_alive()?;
        let page = &self.page;
        let alive = &self.alive;
        let poll_interval = self.poll_interval;

        let polled = tokio::time::timeout(timeout, async {
            loop {
                if !alive.load(Ordering::SeqCst) {
                    return Err(SessionError::Fault("浏览器事件循环已退出".to_string()));
                }
                if let Ok(element) = locate(page, condition.locator()).await {
                    match condition {
                        WaitCondition::Present(_) => return Ok(element),
                        WaitCondition::Clickable(_) => {
                            if is_clickable(&element).await {
                                return Ok(element);
                            }
                        }
                    }
                }
                sleep(poll_interval).await;
            }
        })
        .await;

        match polled {
            Ok(result) => result,
            Err(_) => Err(SessionError::TimeoutExceeded {
                what: condition.to_string(),
                timeout,
            }),
        }
    }

    async fn click(&mut self, element: &Element) -> SessionResult<()> {
        self.ensure_alive()?;
        element.click().await.map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn set_text(&mut self, element: &Element, value: &str) -> SessionResult<()> {
        self.ensure_alive()?;
        element
            .call_js_fn(CLEAR_VALUE_JS, false)
            .await
            .map_err(|e| self.map_err(e))?;
        element.focus().await.map_err(|e| self.map_err(e))?;
        element.type_str(value).await.map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn select_option(&mut self, element: &Element, visible_text: &str) -> SessionResult<()> {
        self.ensure_alive()?;
        let wanted = serde_json::to_string(visible_text).map_err(SessionError::operation)?;
        let js = format!(
            r#"function() {{
                const wanted = {};
                for (const opt of this.options) {{
                    if (opt.text.trim() === wanted) {{
                        this.value = opt.value;
                        this.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return true;
                    }}
                }}
                return false;
            }}"#,
            wanted
        );
        let ret = element
            .call_js_fn(js, false)
            .await
            .map_err(|e| self.map_err(e))?;
        let selected = ret.result.value.and_then(|v| v.as_bool()).unwrap_or(false);
        if selected {
            Ok(())
        } else {
            Err(SessionError::Operation(format!(
                "下拉框中没有选项: {}",
                visible_text
            )))
        }
    }

    async fn capture_image(&mut self, element: &Element) -> SessionResult<Vec<u8>> {
        self.ensure_alive()?;
        element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn page_text(&mut self) -> SessionResult<String> {
        self.ensure_alive()?;
        let result = self
            .page
            .evaluate(BODY_TEXT_JS)
            .await
            .map_err(|e| self.map_err(e))?;
        result.into_value::<String>().map_err(SessionError::operation)
    }

    async fn page_source(&mut self) -> SessionResult<String> {
        self.ensure_alive()?;
        self.page.content().await.map_err(|e| self.map_err(e))
    }

    async fn pending_dialog(&mut self) -> SessionResult<bool> {
        self.ensure_alive()?;
        Ok(self.dialog_open.load(Ordering::SeqCst))
    }

    async fn accept_dialog(&mut self) -> SessionResult<()> {
        self.ensure_alive()?;
        self.page
            .execute(HandleJavaScriptDialogParams::new(true))
            .await
            .map_err(|e| self.map_err(e))?;
        self.dialog_open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// 为每个 worker 启动独立浏览器的会话工厂
pub struct ChromiumSessionFactory {
    options: BrowserOptions,
    poll_interval: Duration,
}

impl ChromiumSessionFactory {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    type Session = ChromiumSession;

    async fn acquire(&self, worker: usize) -> SessionResult<ChromiumSession> {
        ChromiumSession::launch(&self.options, worker, self.poll_interval)
            .await
            .map_err(|e| SessionError::Fault(format!("{:#}", e)))
    }

    async fn release(&self, session: ChromiumSession) -> SessionResult<()> {
        session.shutdown().await
    }
}
