use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use result_fetch::config::{Config, SiteProfile};
use result_fetch::infrastructure::{
    Locator, ProgressEvent, RecognizerError, RemoteSession, ResultSink, RunSummary,
    SessionError, SessionFactory, SessionResult, SinkError, TextRecognizer, WaitCondition,
};
use result_fetch::models::{RecordStatus, ResultRecord};
use result_fetch::App;

/// 所有假会话共享的脚本和记录
#[derive(Default)]
struct Script {
    /// 这些编号在提交前总是超时
    transient: HashSet<String>,
    /// 输入该编号时触发一次会话故障
    fault_once: Option<String>,
    faulted: AtomicBool,
    /// 该 worker 获取会话失败
    fail_acquire_for: Option<usize>,
    /// 该 worker 每次打开表单都要等待
    slow_worker: Option<(usize, Duration)>,
    /// 每次尝试输入的编号
    typed: Mutex<Vec<String>>,
    /// 成功读取结果的顺序
    finished: Mutex<Vec<String>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Script {
    fn typed_count(&self, id: &str) -> usize {
        self.typed.lock().unwrap().iter().filter(|t| *t == id).count()
    }
}

struct FakeSession {
    worker: usize,
    script: Arc<Script>,
    current: Option<String>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    type Element = Locator;

    async fn navigate(&mut self, _url: &str) -> SessionResult<()> {
        self.current = None;
        if let Some((worker, delay)) = self.script.slow_worker {
            if worker == self.worker {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn find_element(&mut self, locator: &Locator) -> SessionResult<Locator> {
        Ok(locator.clone())
    }

    async fn wait_until(
        &mut self,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> SessionResult<Locator> {
        let blocked = self
            .current
            .as_ref()
            .is_some_and(|id| self.script.transient.contains(id));
        if blocked && *condition.locator() == SiteProfile::default().submit_button {
            return Err(SessionError::TimeoutExceeded {
                what: condition.to_string(),
                timeout,
            });
        }
        Ok(condition.locator().clone())
    }

    async fn click(&mut self, _element: &Locator) -> SessionResult<()> {
        Ok(())
    }

    async fn set_text(&mut self, element: &Locator, value: &str) -> SessionResult<()> {
        if *element != SiteProfile::default().identifier_input {
            return Ok(());
        }
        self.script.typed.lock().unwrap().push(value.to_string());
        if self.script.fault_once.as_deref() == Some(value)
            && !self.script.faulted.swap(true, Ordering::SeqCst)
        {
            return Err(SessionError::Fault("browser exited".into()));
        }
        self.current = Some(value.to_string());
        Ok(())
    }

    async fn select_option(&mut self, _element: &Locator, _text: &str) -> SessionResult<()> {
        Ok(())
    }

    async fn capture_image(&mut self, _element: &Locator) -> SessionResult<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn page_text(&mut self) -> SessionResult<String> {
        let id = self.current.clone().unwrap_or_default();
        self.script.finished.lock().unwrap().push(id.clone());
        Ok(format!("Enrollment No {}\nResult: PASS", id))
    }

    async fn page_source(&mut self) -> SessionResult<String> {
        Ok("<html><body>Enrollment No</body></html>".into())
    }

    async fn pending_dialog(&mut self) -> SessionResult<bool> {
        Ok(false)
    }

    async fn accept_dialog(&mut self) -> SessionResult<()> {
        Ok(())
    }
}

struct FakeFactory {
    script: Arc<Script>,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn acquire(&self, worker: usize) -> SessionResult<FakeSession> {
        if self.script.fail_acquire_for == Some(worker) {
            return Err(SessionError::Fault("launch failed".into()));
        }
        self.script.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            worker,
            script: self.script.clone(),
            current: None,
        })
    }

    async fn release(&self, _session: FakeSession) -> SessionResult<()> {
        self.script.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FixedRecognizer;

#[async_trait]
impl TextRecognizer for FixedRecognizer {
    async fn recognize(&self, _image: &[u8], _hint: &str) -> Result<String, RecognizerError> {
        Ok("ab 12".into())
    }
}

#[derive(Default, Clone)]
struct MemorySink {
    progress: Arc<Mutex<Vec<ProgressEvent>>>,
    records: Arc<Mutex<Vec<ResultRecord>>>,
    summary: Arc<Mutex<Option<RunSummary>>>,
}

impl ResultSink for MemorySink {
    fn on_progress(&mut self, event: &ProgressEvent) -> Result<(), SinkError> {
        self.progress.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn write_records(&mut self, records: &[ResultRecord]) -> Result<(), SinkError> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    fn complete(&mut self, summary: &RunSummary) -> Result<(), SinkError> {
        *self.summary.lock().unwrap() = Some(summary.clone());
        Ok(())
    }
}

impl MemorySink {
    fn ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.identifier.to_string())
            .collect()
    }

    fn record(&self, id: &str) -> ResultRecord {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.identifier.as_str() == id)
            .cloned()
            .unwrap_or_else(|| panic!("缺少 {} 的记录", id))
    }
}

fn test_config(start: u32, end: u32, workers: usize) -> Config {
    Config {
        id_prefix: "X".into(),
        start,
        end,
        worker_count: workers,
        wait_timeout_secs: 1,
        inter_attempt_delay_ms: 0,
        settle_delay_ms: 0,
        ..Config::default()
    }
}

fn build_app(config: Config, script: &Arc<Script>, sink: &MemorySink) -> App<FakeFactory> {
    App::with_parts(
        config,
        FakeFactory {
            script: script.clone(),
        },
        Arc::new(FixedRecognizer),
        vec![Box::new(sink.clone()) as Box<dyn ResultSink>],
    )
}

#[tokio::test]
async fn test_output_is_ordered_regardless_of_completion_order() {
    let script = Arc::new(Script {
        slow_worker: Some((1, Duration::from_millis(100))),
        ..Script::default()
    });
    let sink = MemorySink::default();

    let summary = build_app(test_config(1, 4, 2), &script, &sink)
        .run()
        .await
        .unwrap();

    // worker 2 负责 X003/X004，先于 worker 1 完成
    assert_eq!(script.finished.lock().unwrap()[0], "X003");
    assert_eq!(sink.ids(), vec!["X001", "X002", "X003", "X004"]);
    assert!(sink
        .records
        .lock()
        .unwrap()
        .iter()
        .all(|r| r.status == RecordStatus::Completed && r.attempts == 1));
    assert_eq!(sink.record("X002").payload.as_deref(), Some("Enrollment No X002\nResult: PASS"));

    assert_eq!(summary.total, 4);
    assert_eq!(summary.completed, 4);
    assert!(!summary.deadline_exceeded);
    assert_eq!(script.acquired.load(Ordering::SeqCst), 2);
    assert_eq!(script.released.load(Ordering::SeqCst), 2);
    assert!(sink.summary.lock().unwrap().is_some());
}

#[tokio::test]
async fn test_always_transient_identifier_fails_after_max_attempts() {
    let script = Arc::new(Script {
        transient: HashSet::from(["X005".to_string()]),
        ..Script::default()
    });
    let sink = MemorySink::default();

    let summary = build_app(test_config(1, 6, 2), &script, &sink)
        .run()
        .await
        .unwrap();

    let failed = sink.record("X005");
    assert_eq!(failed.status, RecordStatus::Failed);
    assert_eq!(failed.payload, None);
    assert_eq!(failed.attempts, 5);
    assert_eq!(script.typed_count("X005"), 5);
    assert_eq!(
        failed.to_text_block(),
        "❌ 编号: X005 在 5 次尝试后仍未获取到结果\n\n"
    );

    // 一个编号失败不影响同区间的后续编号
    assert_eq!(sink.record("X006").status, RecordStatus::Completed);
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.failed, 1);

    let retries = sink
        .progress
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 4);
}

#[tokio::test]
async fn test_session_fault_abandons_rest_of_range() {
    let script = Arc::new(Script {
        fault_once: Some("X002".into()),
        ..Script::default()
    });
    let sink = MemorySink::default();

    let summary = build_app(test_config(1, 4, 1), &script, &sink)
        .run()
        .await
        .unwrap();

    assert_eq!(sink.ids(), vec!["X001", "X002", "X003", "X004"]);
    assert_eq!(sink.record("X001").status, RecordStatus::Completed);
    for id in ["X002", "X003", "X004"] {
        assert_eq!(sink.record(id).status, RecordStatus::Failed);
    }
    assert_eq!(script.typed_count("X003"), 0);
    assert_eq!(summary.failed, 3);

    // 故障会话依然被释放
    assert_eq!(script.released.load(Ordering::SeqCst), 1);
    assert!(sink
        .progress
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ProgressEvent::WorkerAborted { worker: 1, .. })));
}

#[tokio::test]
async fn test_session_restart_resumes_current_identifier() {
    let script = Arc::new(Script {
        fault_once: Some("X002".into()),
        ..Script::default()
    });
    let sink = MemorySink::default();
    let config = Config {
        max_session_restarts: 1,
        ..test_config(1, 4, 1)
    };

    let summary = build_app(config, &script, &sink).run().await.unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(script.typed_count("X002"), 2);
    // 故障会话上用掉的一次也计入尝试次数
    assert_eq!(sink.record("X002").attempts, 2);
    assert_eq!(script.acquired.load(Ordering::SeqCst), 2);
    assert_eq!(script.released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_acquire_failure_releases_acquired_sessions() {
    let script = Arc::new(Script {
        fail_acquire_for: Some(2),
        ..Script::default()
    });
    let sink = MemorySink::default();

    let result = build_app(test_config(1, 9, 3), &script, &sink).run().await;

    assert!(result.is_err());
    assert_eq!(script.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(script.released.load(Ordering::SeqCst), 1);
    assert!(script.typed.lock().unwrap().is_empty());
    assert!(sink.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_range_is_rejected_before_any_session() {
    let script = Arc::new(Script::default());
    let sink = MemorySink::default();

    let result = build_app(test_config(5, 1, 2), &script, &sink).run().await;

    assert!(result.is_err());
    assert_eq!(script.acquired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deadline_flushes_partial_results() {
    let script = Arc::new(Script {
        slow_worker: Some((2, Duration::from_secs(30))),
        ..Script::default()
    });
    let sink = MemorySink::default();
    let config = Config {
        run_deadline_secs: Some(1),
        ..test_config(1, 4, 2)
    };

    let summary = build_app(config, &script, &sink).run().await.unwrap();

    assert!(summary.deadline_exceeded);
    assert_eq!(summary.total, 4);
    assert_eq!(sink.ids(), vec!["X001", "X002"]);
    // 被中止的会话随任务一起丢弃，只有完成的会话被释放
    assert_eq!(script.acquired.load(Ordering::SeqCst), 2);
    assert_eq!(script.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore] // 默认忽略，需要本地浏览器和网络：cargo test -- --ignored
async fn test_live_single_identifier() {
    result_fetch::utils::logging::init(true);

    let config = Config {
        start: 7,
        end: 7,
        worker_count: 1,
        output_file: std::env::temp_dir()
            .join("result_fetch_live.txt")
            .display()
            .to_string(),
        ..Config::from_env()
    };

    let summary = App::initialize(config)
        .await
        .expect("初始化失败")
        .run()
        .await
        .expect("运行失败");

    assert_eq!(summary.total, 1);
}
