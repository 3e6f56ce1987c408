//! 输出通道 - 基础设施层
//!
//! 输出目标（文件、终端）只在一个专属任务里被访问，
//! worker 通过 [`SinkHandle`] 把事件发送过去，而不是直接写。

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::models::{Identifier, ResultRecord, WorkRange};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("写入 {path} 失败: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("输出通道已关闭")]
    Closed,
}

/// 运行过程中的进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    WorkerStarted { worker: usize, range: WorkRange },
    Retrying {
        identifier: Identifier,
        attempt: u32,
        reason: String,
    },
    Succeeded { identifier: Identifier, attempts: u32 },
    Failed { identifier: Identifier, attempts: u32 },
    WorkerAborted { worker: usize, reason: String },
}

/// 整批运行的汇总
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// 是否因整体截止时间而提前结束
    pub deadline_exceeded: bool,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

/// 输出目标
///
/// 只会被 [`SinkDispatcher`] 的专属任务调用，因此方法可以取 `&mut self`。
pub trait ResultSink: Send {
    fn on_progress(&mut self, _event: &ProgressEvent) -> Result<(), SinkError> {
        Ok(())
    }

    /// 接收按编号升序排列的全部结果
    fn write_records(&mut self, records: &[ResultRecord]) -> Result<(), SinkError>;

    fn complete(&mut self, _summary: &RunSummary) -> Result<(), SinkError> {
        Ok(())
    }
}

enum SinkMessage {
    Progress(ProgressEvent),
    Records(Vec<ResultRecord>, oneshot::Sender<Result<(), SinkError>>),
    Complete(RunSummary, oneshot::Sender<Result<(), SinkError>>),
}

/// 发送端，可在 worker 之间克隆
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl SinkHandle {
    /// 进度事件只尽力投递，通道关闭时丢弃
    pub fn progress(&self, event: ProgressEvent) {
        if self.tx.send(SinkMessage::Progress(event)).is_err() {
            debug!("输出通道已关闭，丢弃进度事件");
        }
    }

    pub async fn write_records(&self, records: Vec<ResultRecord>) -> Result<(), SinkError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SinkMessage::Records(records, reply))
            .map_err(|_| SinkError::Closed)?;
        rx.await.map_err(|_| SinkError::Closed)?
    }

    pub async fn complete(&self, summary: RunSummary) -> Result<(), SinkError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SinkMessage::Complete(summary, reply))
            .map_err(|_| SinkError::Closed)?;
        rx.await.map_err(|_| SinkError::Closed)?
    }
}

/// 持有所有输出目标的专属任务
pub struct SinkDispatcher {
    handle: SinkHandle,
    task: JoinHandle<()>,
}

impl SinkDispatcher {
    pub fn spawn(mut sinks: Vec<Box<dyn ResultSink>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkMessage>();

        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    SinkMessage::Progress(event) => {
                        for sink in sinks.iter_mut() {
                            if let Err(e) = sink.on_progress(&event) {
                                error!("输出进度失败: {}", e);
                            }
                        }
                    }
                    SinkMessage::Records(records, reply) => {
                        let result = deliver(&mut sinks, |s| s.write_records(&records));
                        let _ = reply.send(result);
                    }
                    SinkMessage::Complete(summary, reply) => {
                        let result = deliver(&mut sinks, |s| s.complete(&summary));
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Self {
            handle: SinkHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// 关闭通道并等待已排队的事件处理完
    pub async fn shutdown(self) {
        let Self { handle, task } = self;
        drop(handle);
        if let Err(e) = task.await {
            error!("输出任务异常退出: {}", e);
        }
    }
}

/// 每个输出目标都要尝试写入，返回第一个错误
fn deliver(
    sinks: &mut [Box<dyn ResultSink>],
    mut op: impl FnMut(&mut dyn ResultSink) -> Result<(), SinkError>,
) -> Result<(), SinkError> {
    let mut first_err = None;
    for sink in sinks.iter_mut() {
        if let Err(e) = op(sink.as_mut()) {
            error!("输出失败: {}", e);
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// 把结果按顺序写入文本文件
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultSink for FileSink {
    fn write_records(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
        let io_err = |source| SinkError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let mut file = fs::File::create(&self.path).map_err(io_err)?;
        for record in records {
            file.write_all(record.to_text_block().as_bytes())
                .map_err(io_err)?;
        }
        file.flush().map_err(io_err)?;
        Ok(())
    }
}

/// 终端实时输出
#[derive(Default)]
pub struct ConsoleSink;

impl ResultSink for ConsoleSink {
    fn on_progress(&mut self, event: &ProgressEvent) -> Result<(), SinkError> {
        match event {
            ProgressEvent::WorkerStarted { worker, range } => {
                println!("🚀 会话 {} 开始处理区间 {}", worker, range);
            }
            ProgressEvent::Retrying {
                identifier,
                attempt,
                reason,
            } => {
                println!("🔄 重试 {} (第 {} 次尝试: {})...", identifier, attempt, reason);
            }
            ProgressEvent::Succeeded {
                identifier,
                attempts,
            } => {
                println!("✅ {} 获取成功 (尝试 {} 次)", identifier, attempts);
            }
            ProgressEvent::Failed {
                identifier,
                attempts,
            } => {
                println!("❌ {} 在 {} 次尝试后失败", identifier, attempts);
            }
            ProgressEvent::WorkerAborted { worker, reason } => {
                println!("⛔ 会话 {} 中止: {}", worker, reason);
            }
        }
        Ok(())
    }

    fn write_records(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
        for record in records {
            print!("{}", record.to_text_block());
        }
        Ok(())
    }

    fn complete(&mut self, summary: &RunSummary) -> Result<(), SinkError> {
        if summary.deadline_exceeded {
            println!(
                "\n⏰ 已到达运行截止时间，已保存 {}/{} 个编号的结果",
                summary.completed + summary.failed,
                summary.total
            );
        } else {
            println!(
                "\n✅ 全部编号处理完成: 成功 {}，失败 {}，结果已按顺序保存",
                summary.completed, summary.failed
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorded {
        progress: Arc<Mutex<Vec<ProgressEvent>>>,
        records: Arc<Mutex<Vec<ResultRecord>>>,
        completed: Arc<Mutex<bool>>,
    }

    impl ResultSink for Recorded {
        fn on_progress(&mut self, event: &ProgressEvent) -> Result<(), SinkError> {
            self.progress.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn write_records(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        fn complete(&mut self, _summary: &RunSummary) -> Result<(), SinkError> {
            *self.completed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn summary() -> RunSummary {
        RunSummary {
            total: 1,
            completed: 1,
            failed: 0,
            deadline_exceeded: false,
            started_at: Local::now(),
            finished_at: Local::now(),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_in_send_order() {
        let recorded = Recorded::default();
        let dispatcher = SinkDispatcher::spawn(vec![Box::new(recorded.clone()) as Box<dyn ResultSink>]);
        let handle = dispatcher.handle();

        let id = Identifier::new("X", 1);
        handle.progress(ProgressEvent::Succeeded {
            identifier: id.clone(),
            attempts: 1,
        });
        handle
            .write_records(vec![ResultRecord::completed(id.clone(), "ok".into(), 1)])
            .await
            .unwrap();
        handle.complete(summary()).await.unwrap();
        drop(handle);
        dispatcher.shutdown().await;

        assert_eq!(recorded.progress.lock().unwrap().len(), 1);
        assert_eq!(recorded.records.lock().unwrap()[0].identifier, id);
        assert!(*recorded.completed.lock().unwrap());
    }

    #[test]
    fn test_file_sink_writes_blocks_in_given_order() {
        let path = std::env::temp_dir().join(format!(
            "result_fetch_sink_test_{}.txt",
            std::process::id()
        ));
        let mut sink = FileSink::new(&path);
        let records = vec![
            ResultRecord::completed(Identifier::new("X", 1), "first".into(), 1),
            ResultRecord::failed(Identifier::new("X", 2), 5),
        ];
        sink.write_records(&records).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(
            content,
            "✅ 编号: X001\nfirst\n\n❌ 编号: X002 在 5 次尝试后仍未获取到结果\n\n"
        );
    }
}
