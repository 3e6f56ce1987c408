//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责并发调度和会话资源管理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量处理器
//! - 管理应用生命周期（初始化、运行、清理）
//! - 切分编号区间（Vec<WorkRange>）
//! - 为每个区间获取一个会话并启动一个任务
//! - 等待全部任务结束后统一输出结果
//! - 释放所有会话，输出全局统计信息
//!
//! ### `session_worker` - 单会话处理器
//! - 遍历一个区间内的所有编号
//! - 复用同一个会话，逐个编号串行提交
//! - 会话故障时重建会话或放弃剩余编号
//! - 输出单个区间的统计信息
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<WorkRange>)
//!     ↓
//! session_worker (处理一个 WorkRange)
//!     ↓
//! workflow::FormProtocol (处理单个编号的一次尝试)
//!     ↓
//! services (能力层：classifier / retry / aggregator)
//!     ↓
//! infrastructure (基础设施：RemoteSession / TextRecognizer / ResultSink)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管整批，session_worker 管单个区间
//! 2. **资源隔离**：只有编排层获取和释放会话
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure

pub mod batch_processor;
pub mod session_worker;

// 重新导出主要类型
pub use batch_processor::App;
pub use session_worker::{SessionWorker, WorkerReport};
