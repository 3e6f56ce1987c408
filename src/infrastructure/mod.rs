pub mod chromium_session;
pub mod recognizer;
pub mod remote;
pub mod sink;

pub use chromium_session::{ChromiumSession, ChromiumSessionFactory};
pub use recognizer::{sanitize, LlmRecognizer, RecognizerError, TesseractRecognizer, TextRecognizer};
pub use remote::{
    Locator, RemoteSession, SessionError, SessionFactory, SessionResult, WaitCondition,
};
pub use sink::{
    ConsoleSink, FileSink, ProgressEvent, ResultSink, RunSummary, SinkDispatcher, SinkError,
    SinkHandle,
};
