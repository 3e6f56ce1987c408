//! 结果汇总服务 - 业务能力层
//!
//! 所有 worker 共享同一个汇总表，每次写入都在锁内完成；
//! 最终按编号升序输出，与完成顺序无关。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, BusinessError};
use crate::infrastructure::SinkHandle;
use crate::models::{Identifier, ResultRecord};

#[derive(Default)]
pub struct ResultAggregator {
    records: Mutex<BTreeMap<Identifier, ResultRecord>>,
    flushed: AtomicBool,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一条结果，同一编号重复写入时覆盖旧值
    pub async fn store(&self, identifier: Identifier, record: ResultRecord) {
        let mut records = self.records.lock().await;
        if let Some(previous) = records.insert(identifier, record) {
            warn!("编号 {} 的结果被重复写入，已覆盖", previous.identifier);
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// 取出全部结果（按编号升序），只能调用一次
    pub async fn drain_sorted(&self) -> AppResult<Vec<ResultRecord>> {
        if self.flushed.swap(true, Ordering::SeqCst) {
            return Err(AppError::Business(BusinessError::AlreadyFlushed));
        }
        let records = std::mem::take(&mut *self.records.lock().await);
        Ok(records.into_values().collect())
    }

    /// 取出全部结果并交给输出通道
    pub async fn flush(&self, sink: &SinkHandle) -> AppResult<Vec<ResultRecord>> {
        let records = self.drain_sorted().await?;
        debug!("输出 {} 条结果", records.len());
        sink.write_records(records.clone())
            .await
            .map_err(|e| AppError::file_write_failed("results", e))?;
        Ok(records)
    }
}
