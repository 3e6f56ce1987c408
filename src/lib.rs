//! # Result Fetch
//!
//! 批量查询受验证码保护的网页表单，并按编号顺序汇总结果
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（浏览器会话、输出目标），只暴露能力
//! - `RemoteSession` / `SessionFactory` - 远端交互能力，`ChromiumSession` 为浏览器实现
//! - `TextRecognizer` - 验证码识别能力（tesseract / 视觉大模型）
//! - `SinkDispatcher` - 唯一持有输出目标的任务
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个编号
//! - `OutcomeClassifier` - 页面结果判定
//! - `RetryPolicy` - 固定间隔重试
//! - `ResultAggregator` - 线程安全的结果汇总
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一次尝试"的完整步骤
//! - `FormCtx` - 上下文封装（会话 + 编号 + 尝试次数）
//! - `FormProtocol` - 表单流程（打开 → 选择 → 验证码 → 提交 → 判定）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量处理器，管理会话和并发
//! - `orchestrator/session_worker` - 单会话处理器，遍历一个编号区间
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{RemoteSession, ResultSink, RunSummary, SessionFactory, TextRecognizer};
pub use models::{partition, Identifier, Outcome, ResultRecord, WorkRange};
pub use orchestrator::App;
pub use workflow::{FormCtx, FormProtocol};
