//! 日志工具模块
//!
//! 提供日志初始化和格式化输出的辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::infrastructure::RunSummary;
use crate::models::{Identifier, WorkRange};

/// 初始化 tracing 日志
///
/// 设置了 `RUST_LOG` 时以其为准，否则默认 `info`，详细模式下为 `debug`。
/// 重复调用时保留第一次的设置。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 多会话并发查询模式");
    info!(
        "📋 编号范围: {} ~ {}",
        Identifier::new(config.id_prefix.as_str(), config.start),
        Identifier::new(config.id_prefix.as_str(), config.end)
    );
    info!("📊 并发会话数: {}", config.worker_count);
    info!("🔁 单个编号最多尝试: {} 次", config.max_attempts);
    if let Some(deadline) = config.run_deadline_secs {
        info!("⏰ 运行截止时间: {} 秒", deadline);
    }
    info!("{}", "=".repeat(60));
}

/// 记录区间切分结果
pub fn log_partitions(prefix: &str, ranges: &[WorkRange]) {
    info!("✓ 共切分为 {} 个区间", ranges.len());
    for (index, range) in ranges.iter().enumerate() {
        info!(
            "  [会话 {}] {} ~ {} ({} 个)",
            index + 1,
            Identifier::new(prefix, range.start),
            Identifier::new(prefix, range.end),
            range.len()
        );
    }
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &RunSummary, output_file: &str) {
    let elapsed = summary.finished_at - summary.started_at;
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!("完成时间: {}", summary.finished_at.format("%Y-%m-%d %H:%M:%S"));
    info!("耗时: {} 秒", elapsed.num_seconds());
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", summary.completed, summary.total);
    info!("❌ 失败: {}", summary.failed);
    if summary.deadline_exceeded {
        info!(
            "⏰ 已到达截止时间，未处理: {}",
            summary.total.saturating_sub(summary.completed + summary.failed)
        );
    }
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", output_file);
}
