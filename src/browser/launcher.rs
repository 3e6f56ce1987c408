use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, BrowserError};

/// 浏览器启动参数
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub chrome_executable: Option<String>,
    pub window_size: (u32, u32),
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            chrome_executable: None,
            window_size: (1200, 1000),
        }
    }
}

/// 一个已启动的浏览器实例
pub struct LaunchedBrowser {
    pub browser: Browser,
    pub page: Page,
    pub handler_task: JoinHandle<()>,
    /// 事件循环退出后置为 false
    pub alive: Arc<AtomicBool>,
    /// 本实例独占的用户目录，关闭浏览器后删除
    pub profile_dir: PathBuf,
}

/// 为指定 worker 启动一个独立的浏览器并打开空白页
pub async fn launch_browser(options: &BrowserOptions, worker: usize) -> Result<LaunchedBrowser> {
    info!("[会话 {}] 🚀 启动浏览器...", worker);

    let (width, height) = options.window_size;
    let profile = profile_dir(worker);
    let mut builder = BrowserConfig::builder()
        .window_size(width, height)
        .user_data_dir(&profile)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-dev-shm-usage");

    builder = if options.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };

    if let Some(executable) = &options.chrome_executable {
        debug!("[会话 {}] 使用浏览器: {}", worker, executable);
        builder = builder.chrome_executable(Path::new(executable));
    }

    let config = builder.build().map_err(|reason| {
        error!("[会话 {}] 配置浏览器失败: {}", worker, reason);
        AppError::Browser(BrowserError::ConfigurationFailed { reason })
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("[会话 {}] 启动浏览器失败: {}", worker, e);
        AppError::browser_launch_failed(worker, e)
    })?;
    debug!("[会话 {}] 浏览器启动成功", worker);

    // 在后台处理浏览器事件
    let alive = Arc::new(AtomicBool::new(true));
    let alive_flag = alive.clone();
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
        alive_flag.store(false, Ordering::SeqCst);
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("[会话 {}] 创建页面失败: {}", worker, e);
        AppError::from(e)
    })?;

    info!("[会话 {}] ✅ 浏览器已就绪", worker);

    Ok(LaunchedBrowser {
        browser,
        page,
        handler_task,
        alive,
        profile_dir: profile,
    })
}

/// 并发运行的浏览器不能共用同一个用户目录
fn profile_dir(worker: usize) -> PathBuf {
    std::env::temp_dir().join(format!(
        "result_fetch_profile_{}_{}",
        std::process::id(),
        worker
    ))
}

/// 删除浏览器用户目录，目录不存在时忽略
pub async fn remove_profile_dir(dir: &Path, worker: usize) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("[会话 {}] 已删除用户目录: {}", worker, dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("[会话 {}] 删除用户目录失败 ({}): {}", worker, dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_dir_is_per_worker() {
        assert_ne!(profile_dir(1), profile_dir(2));
        assert!(profile_dir(1).starts_with(std::env::temp_dir()));
    }

    #[tokio::test]
    async fn test_remove_profile_dir_deletes_tree() {
        let dir = std::env::temp_dir().join(format!("result_fetch_cleanup_{}", std::process::id()));
        tokio::fs::create_dir_all(dir.join("Default")).await.unwrap();
        tokio::fs::write(dir.join("Default").join("Preferences"), b"{}")
            .await
            .unwrap();

        remove_profile_dir(&dir, 1).await;
        assert!(!dir.exists());

        // 再次删除不存在的目录不报错
        remove_profile_dir(&dir, 1).await;
    }
}
