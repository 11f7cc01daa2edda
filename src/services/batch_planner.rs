//! 批次规划器 - 业务能力层
//!
//! 纯函数：把 `[0, total)` 切成连续、不重叠、按起点排序的批次。
//! 负数数量在类型层面就无法表示（`usize`）。

use crate::error::{AppError, AppResult};
use crate::models::BatchDescriptor;

/// 规划批次
///
/// # 参数
/// - `total_logical_items`: 逻辑图像总数
/// - `batch_size`: 每批图像数，必须大于 0
///
/// # 返回
/// 按顺序排列的批次；最后一批的 `end` 被截断到 `total_logical_items`
pub fn plan(total_logical_items: usize, batch_size: usize) -> AppResult<Vec<BatchDescriptor>> {
    if batch_size == 0 {
        return Err(AppError::invalid_config("batch_size 必须大于 0"));
    }

    let batches = (0..total_logical_items)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, start)| {
            let end = start.saturating_add(batch_size).min(total_logical_items);
            BatchDescriptor::new(index + 1, start, end)
        })
        .collect();

    Ok(batches)
}
