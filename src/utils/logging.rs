//! 日志工具模块
//!
//! 提供日志初始化以及批次启动、结果合并的格式化输出
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::models::{BatchDescriptor, MergeReport};

/// 初始化日志
///
/// 设置了 `RUST_LOG` 时以它为准，否则为 info（`verbose` 时为 debug）。
/// 重复调用不会出错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config, image_dir: &Path, output_root: &Path) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量容器分析模式");
    info!("🐳 镜像: {}", config.image_reference());
    info!("📁 图像目录: {}", image_dir.display());
    info!("📁 输出目录: {}", output_root.display());
    info!(
        "📊 每批 {} 张图像, 每张 {} 个通道, 内存上限 {}, CPU {}",
        config.batch_size, config.num_channels, config.memory, config.cpus
    );
    info!("{}", "=".repeat(60));
}

/// 记录批次启动信息
///
/// # 参数
/// - `batch`: 批次
/// - `total_batches`: 批次总数
pub fn log_batch_launch(batch: &BatchDescriptor, total_batches: usize) {
    info!(
        "📦 启动第 {}/{} 批: 图像 {}-{} ({} 张)",
        batch.id,
        total_batches,
        batch.start,
        batch.last_index(),
        batch.image_count()
    );
}

/// 打印启动统计
pub fn print_launch_stats(started: usize, failed: usize, total: usize, log_file_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 批次启动统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已启动: {}/{}", started, total);
    info!("❌ 启动失败: {}", failed);
    info!("{}", "=".repeat(60));
    info!("💡 容器在后台运行，全部结束后再执行 merge");
    info!("\n启动日志已保存至: {}", log_file_path.display());
}

/// 打印合并统计
pub fn print_merge_stats(report: &MergeReport, output_dir: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 合并完成统计");
    info!("{}", "=".repeat(60));
    for (name, rows) in &report.written {
        info!("✅ {}.csv: {} 行", name, rows);
    }
    for (name, err) in &report.failed {
        info!("❌ {}: {}", name, err);
    }
    info!("{}", "=".repeat(60));
    info!(
        "共写出 {} 个表 ({} 行), 失败 {} 个",
        report.written.len(),
        report.total_rows(),
        report.failed.len()
    );
    info!("\n结果已保存至: {}", output_dir.display());
}
