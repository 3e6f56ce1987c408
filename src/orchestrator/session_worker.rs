//! 单会话处理器 - 编排层
//!
//! ## 职责
//!
//! 一个 worker 持有一个会话和一段编号区间，按升序逐个处理：
//!
//! 1. **逐个编号**：同一会话上严格串行，不会并发提交
//! 2. **重试委托**：每个编号交给 `RetryPolicy` + `FormProtocol`
//! 3. **结果写入**：每个编号恰好写入一条记录
//! 4. **故障处理**：会话故障时按配置重建会话，否则把剩余编号记为失败
//! 5. **归还会话**：无论如何结束，都把会话交还给 `batch_processor` 释放

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::infrastructure::{ProgressEvent, SessionFactory, SinkHandle};
use crate::models::{Identifier, ResultRecord, WorkRange};
use crate::services::{ResultAggregator, RetryDecision, RetryPolicy};
use crate::workflow::FormProtocol;

/// worker 结束后的汇报
#[derive(Debug)]
pub struct WorkerReport<S> {
    pub worker: usize,
    /// 仍需释放的会话；重建失败时为 `None`
    pub session: Option<S>,
    pub completed: usize,
    pub failed: usize,
    /// 中止原因
    pub fault: Option<String>,
}

impl<S> WorkerReport<S> {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            session: None,
            completed: 0,
            failed: 0,
            fault: None,
        }
    }
}

/// 处理一段编号区间的 worker
pub struct SessionWorker<F: SessionFactory> {
    pub worker: usize,
    pub range: WorkRange,
    pub id_prefix: String,
    pub factory: Arc<F>,
    pub protocol: Arc<FormProtocol>,
    pub policy: RetryPolicy,
    pub aggregator: Arc<ResultAggregator>,
    pub sink: SinkHandle,
    /// 允许重建会话的次数
    pub max_session_restarts: u32,
}

impl<F: SessionFactory> SessionWorker<F> {
    pub async fn run(self, session: F::Session) -> WorkerReport<F::Session> {
        let mut report = WorkerReport::new(self.worker);
        let mut current = Some(session);
        let mut restarts = 0u32;
        // 当前编号在故障会话上已用掉的次数
        let mut used = 0u32;

        info!(
            "[会话 {}] 开始处理区间 {} (共 {} 个编号)",
            self.worker,
            self.range,
            self.range.len()
        );
        self.sink.progress(ProgressEvent::WorkerStarted {
            worker: self.worker,
            range: self.range,
        });

        let mut pending = self.range.iter();
        let mut next = pending.next();

        while let Some(sequence) = next {
            let identifier = Identifier::new(self.id_prefix.as_str(), sequence);

            let Some(session) = current.as_mut() else {
                break;
            };
            let decision = {
                let mut runner = self.protocol.bind(session, self.worker);
                let sink = &self.sink;
                self.policy
                    .resume(&mut runner, &identifier, used, |attempt, outcome| {
                        sink.progress(ProgressEvent::Retrying {
                            identifier: identifier.clone(),
                            attempt,
                            reason: outcome.to_string(),
                        });
                    })
                    .await
            };

            match decision {
                RetryDecision::Completed { payload, attempts } => {
                    info!("[会话 {}] ✓ {} 获取成功", self.worker, identifier);
                    self.sink.progress(ProgressEvent::Succeeded {
                        identifier: identifier.clone(),
                        attempts,
                    });
                    self.aggregator
                        .store(
                            identifier.clone(),
                            ResultRecord::completed(identifier, payload, attempts),
                        )
                        .await;
                    report.completed += 1;
                    used = 0;
                    next = pending.next();
                }
                RetryDecision::Failed { attempts } => {
                    warn!(
                        "[会话 {}] ✗ {} 在 {} 次尝试后仍未获取到结果",
                        self.worker, identifier, attempts
                    );
                    self.record_failed(identifier, attempts).await;
                    report.failed += 1;
                    used = 0;
                    next = pending.next();
                }
                RetryDecision::Fault { error, attempts } => {
                    error!("[会话 {}] 会话故障: {}", self.worker, error);

                    if restarts < self.max_session_restarts {
                        restarts += 1;
                        if let Some(broken) = current.take() {
                            if let Err(e) = self.factory.release(broken).await {
                                warn!("[会话 {}] 释放故障会话失败: {}", self.worker, e);
                            }
                        }
                        match self.factory.acquire(self.worker).await {
                            Ok(fresh) => {
                                info!(
                                    "[会话 {}] 🔁 会话已重建 ({}/{})，从 {} 重新开始",
                                    self.worker, restarts, self.max_session_restarts, identifier
                                );
                                current = Some(fresh);
                                used = attempts;
                                continue;
                            }
                            Err(e) => {
                                error!("[会话 {}] 重建会话失败: {}", self.worker, e);
                                report.fault = Some(format!("{}; 重建会话失败: {}", error, e));
                            }
                        }
                    } else {
                        report.fault = Some(error.to_string());
                    }

                    // 当前编号和区间剩余部分都记为失败，保证输出完整
                    self.record_failed(identifier, attempts).await;
                    report.failed += 1;
                    for sequence in pending.by_ref() {
                        let identifier = Identifier::new(self.id_prefix.as_str(), sequence);
                        self.record_failed(identifier, 0).await;
                        report.failed += 1;
                    }

                    let reason = report.fault.clone().unwrap_or_default();
                    self.sink.progress(ProgressEvent::WorkerAborted {
                        worker: self.worker,
                        reason: reason.clone(),
                    });
                    warn!("[会话 {}] ⛔ 区间剩余编号已放弃: {}", self.worker, reason);
                    break;
                }
            }
        }

        info!(
            "[会话 {}] 区间 {} 处理结束: 成功 {}, 失败 {}",
            self.worker, self.range, report.completed, report.failed
        );
        report.session = current;
        report
    }

    async fn record_failed(&self, identifier: Identifier, attempts: u32) {
        self.sink.progress(ProgressEvent::Failed {
            identifier: identifier.clone(),
            attempts,
        });
        self.aggregator
            .store(identifier.clone(), ResultRecord::failed(identifier, attempts))
            .await;
    }
}
