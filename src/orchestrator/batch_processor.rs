//! 批量处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责整批编号的调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：选择验证码识别器、创建会话工厂和输出通道
//! 2. **区间切分**：把 `[start, end]` 切成互不相交的子区间
//! 3. **会话获取**：每个子区间一个会话，任何一个获取失败整批中止
//! 4. **并发处理**：每个子区间一个 tokio 任务
//! 5. **结果输出**：全部结束后按编号升序输出一次
//! 6. **资源释放**：无论 worker 是否故障，所有会话都会被释放
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个编号的细节
//! - **资源所有者**：唯一负责获取和释放会话的模块
//! - **向下委托**：委托 session_worker 处理单个区间

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::browser::BrowserOptions;
use crate::config::{Config, RecognizerKind};
use crate::error::AppError;
use crate::infrastructure::{
    ChromiumSessionFactory, ConsoleSink, FileSink, LlmRecognizer, ResultSink, RunSummary,
    SessionFactory, SinkDispatcher, TesseractRecognizer, TextRecognizer,
};
use crate::models::{partition, WorkRange};
use crate::orchestrator::session_worker::{SessionWorker, WorkerReport};
use crate::services::{ResultAggregator, RetryPolicy};
use crate::utils::logging;
use crate::workflow::FormProtocol;

/// 应用主结构
pub struct App<F: SessionFactory> {
    config: Config,
    factory: Arc<F>,
    protocol: Arc<FormProtocol>,
    sinks: Vec<Box<dyn ResultSink>>,
}

impl App<ChromiumSessionFactory> {
    /// 初始化应用：真实浏览器 + 终端输出 + 结果文件
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        logging::log_startup(&config);

        let recognizer: Arc<dyn TextRecognizer> = match config.recognizer {
            RecognizerKind::Tesseract => {
                Arc::new(TesseractRecognizer::new(config.tesseract_cmd.clone()))
            }
            RecognizerKind::Llm => Arc::new(LlmRecognizer::new(&config)),
        };

        let factory = ChromiumSessionFactory::new(BrowserOptions {
            headless: config.headless,
            chrome_executable: config.chrome_executable.clone(),
            ..BrowserOptions::default()
        });

        let sinks: Vec<Box<dyn ResultSink>> = vec![
            Box::new(ConsoleSink),
            Box::new(FileSink::new(Path::new(&config.output_file))),
        ];

        Ok(Self::with_parts(config, factory, recognizer, sinks))
    }
}

impl<F: SessionFactory> App<F> {
    /// 用任意会话工厂、识别器和输出目标组装应用
    pub fn with_parts(
        config: Config,
        factory: F,
        recognizer: Arc<dyn TextRecognizer>,
        sinks: Vec<Box<dyn ResultSink>>,
    ) -> Self {
        let protocol = Arc::new(FormProtocol::new(&config, recognizer));
        Self {
            config,
            factory: Arc::new(factory),
            protocol,
            sinks,
        }
    }

    /// 运行整批任务，返回汇总
    pub async fn run(self) -> Result<RunSummary> {
        let Self {
            config,
            factory,
            protocol,
            sinks,
        } = self;

        config.validate().context("配置校验失败")?;
        let started_at = Local::now();

        let ranges = partition(config.start, config.end, config.worker_count)
            .map_err(AppError::from)?;
        let total: usize = ranges.iter().map(WorkRange::len).sum();
        logging::log_partitions(&config.id_prefix, &ranges);

        let dispatcher = SinkDispatcher::spawn(sinks);
        let sink = dispatcher.handle();

        // 会话获取失败是致命错误
        let sessions = match acquire_all(factory.as_ref(), ranges.len()).await {
            Ok(sessions) => sessions,
            Err(e) => {
                drop(sink);
                dispatcher.shutdown().await;
                return Err(e.into());
            }
        };

        let aggregator = Arc::new(ResultAggregator::new());
        let policy = RetryPolicy::new(config.max_attempts, config.inter_attempt_delay());

        let mut handles = Vec::with_capacity(ranges.len());
        for (index, (range, session)) in ranges.into_iter().zip(sessions).enumerate() {
            let worker = index + 1;
            let session_worker = SessionWorker {
                worker,
                range,
                id_prefix: config.id_prefix.clone(),
                factory: factory.clone(),
                protocol: protocol.clone(),
                policy: policy.clone(),
                aggregator: aggregator.clone(),
                sink: sink.clone(),
                max_session_restarts: config.max_session_restarts,
            };
            handles.push((worker, tokio::spawn(session_worker.run(session))));
        }

        let (reports, deadline_exceeded) = join_workers(handles, config.run_deadline()).await;

        let flushed = aggregator.flush(&sink).await;

        let mut sessions = Vec::new();
        for report in reports {
            if let Some(reason) = &report.fault {
                warn!("[会话 {}] 曾中止: {}", report.worker, reason);
            }
            if let Some(session) = report.session {
                sessions.push((report.worker, session));
            }
        }
        release_all(factory.as_ref(), sessions).await;

        let records = flushed.context("结果输出失败")?;
        let completed = records.iter().filter(|r| r.is_completed()).count();
        let summary = RunSummary {
            total,
            completed,
            failed: records.len() - completed,
            deadline_exceeded,
            started_at,
            finished_at: Local::now(),
        };

        sink.complete(summary.clone())
            .await
            .context("输出完成信号失败")?;
        drop(sink);
        dispatcher.shutdown().await;

        logging::print_final_stats(&summary, &config.output_file);
        Ok(summary)
    }
}

/// 依次获取会话，任何一个失败都释放已获取的会话
async fn acquire_all<F: SessionFactory>(
    factory: &F,
    count: usize,
) -> Result<Vec<F::Session>, AppError> {
    let mut sessions = Vec::with_capacity(count);
    for worker in 1..=count {
        match factory.acquire(worker).await {
            Ok(session) => {
                info!("[会话 {}] ✓ 会话已就绪", worker);
                sessions.push(session);
            }
            Err(e) => {
                error!("[会话 {}] ❌ 会话获取失败: {}", worker, e);
                let acquired = sessions.into_iter().enumerate().map(|(i, s)| (i + 1, s));
                release_all(factory, acquired.collect()).await;
                return Err(AppError::session_acquire_failed(worker, e.to_string()));
            }
        }
    }
    Ok(sessions)
}

async fn release_all<F: SessionFactory>(factory: &F, sessions: Vec<(usize, F::Session)>) {
    for (worker, session) in sessions {
        match factory.release(session).await {
            Ok(()) => info!("[会话 {}] 会话已释放", worker),
            Err(e) => warn!("[会话 {}] 会话释放失败: {}", worker, e),
        }
    }
}

/// 等待所有 worker 结束；设置了截止时间时，超时的 worker 会被中止
async fn join_workers<S>(
    handles: Vec<(usize, JoinHandle<WorkerReport<S>>)>,
    deadline: Option<std::time::Duration>,
) -> (Vec<WorkerReport<S>>, bool) {
    let deadline = deadline.map(|d| Instant::now() + d);
    let mut reports = Vec::with_capacity(handles.len());
    let mut deadline_exceeded = false;

    for (worker, mut handle) in handles {
        let joined = match deadline {
            Some(at) if !deadline_exceeded => match timeout_at(at, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("⏰ 已到达运行截止时间，中止未完成的会话");
                    deadline_exceeded = true;
                    handle.abort();
                    handle.await
                }
            },
            Some(_) => {
                handle.abort();
                handle.await
            }
            None => handle.await,
        };

        match joined {
            Ok(report) => reports.push(report),
            Err(e) if e.is_panic() => error!("[会话 {}] 任务崩溃，会话已丢弃: {}", worker, e),
            Err(_) => warn!("[会话 {}] 任务已中止，会话已丢弃", worker),
        }
    }

    (reports, deadline_exceeded)
}
