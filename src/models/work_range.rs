//! 编号区间与分片
//!
//! 把 `[start, end]` 切成若干个连续、互不相交的子区间，每个子区间交给一个会话 worker。

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 分配给单个 worker 的闭区间 `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRange {
    pub start: u32,
    pub end: u32,
}

impl WorkRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    /// 按升序遍历区间内的序号
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl fmt::Display for WorkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("无效区间: 起始 {start} 大于结束 {end}")]
    StartAfterEnd { start: u32, end: u32 },
    #[error("无效区间: worker 数量必须至少为 1")]
    NoWorkers,
}

/// 把 `[start, end]` 尽量均分给 `workers` 个 worker
///
/// 每片大小为 `max(1, total / workers)`，余数并入最后一片；
/// 空片直接丢弃，因此返回的区间数可能少于 `workers`。
pub fn partition(start: u32, end: u32, workers: usize) -> Result<Vec<WorkRange>, PartitionError> {
    if workers == 0 {
        return Err(PartitionError::NoWorkers);
    }
    if start > end {
        return Err(PartitionError::StartAfterEnd { start, end });
    }

    let start = u64::from(start);
    let end = u64::from(end);
    let total = end - start + 1;
    let chunk = (total / workers as u64).max(1);

    let mut ranges = Vec::with_capacity((workers as u64).min(total) as usize);
    for i in 0..workers as u64 {
        let s = start + i * chunk;
        if s > end {
            break;
        }
        let e = if i + 1 == workers as u64 {
            end
        } else {
            (s + chunk - 1).min(end)
        };
        // s、e 都不超过 end，转换安全
        ranges.push(WorkRange::new(s as u32, e as u32));
    }

    Ok(ranges)
}
