//! 结果合并处理器 - 编排层
//!
//! 在所有 worker 结束之后单独调用，把各批次目录中的同名表合并到一个目录。
//! 不检查 worker 是否已经结束，这是调用方的责任。

use crate::error::{AppError, AppResult};
use crate::models::MergeReport;
use crate::services::merge;
use crate::utils::logging::print_merge_stats;
use std::path::PathBuf;
use tracing::info;

/// 合并多个批次目录
///
/// csv 读写是同步的，放到阻塞线程池里执行
pub async fn merge_outputs(
    source_dirs: Vec<PathBuf>,
    output_dir: PathBuf,
) -> AppResult<MergeReport> {
    if source_dirs.is_empty() {
        return Err(AppError::invalid_config("至少需要一个来源目录"));
    }

    info!(
        "🔗 合并 {} 个目录 → {}",
        source_dirs.len(),
        output_dir.display()
    );

    let target = output_dir.clone();
    let report = tokio::task::spawn_blocking(move || merge(&source_dirs, &target))
        .await
        .map_err(|e| AppError::write_failed(&output_dir, format!("合并任务异常退出: {}", e)))??;

    print_merge_stats(&report, &output_dir);
    Ok(report)
}
