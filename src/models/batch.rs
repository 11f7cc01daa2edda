//! 批次描述
//!
//! 一个批次是逻辑图像序列中连续的一段 `[start, end)`。

use std::fmt::Display;

/// 批次 ID 的固定宽度，保证字典序与数字顺序一致
pub const BATCH_ID_WIDTH: usize = 3;

/// 批次描述（不可变，由批次规划器生成）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDescriptor {
    /// 从 1 开始、补零到 3 位的批次序号，例如 "001"
    pub id: String,
    /// 起始索引（包含）
    pub start: usize,
    /// 结束索引（不包含）
    pub end: usize,
}

impl BatchDescriptor {
    /// 根据批次序号（从 1 开始）创建描述
    pub fn new(ordinal: usize, start: usize, end: usize) -> Self {
        Self {
            id: format!("{:0width$}", ordinal, width = BATCH_ID_WIDTH),
            start,
            end,
        }
    }

    /// 本批次包含的逻辑图像数
    pub fn image_count(&self) -> usize {
        self.end - self.start
    }

    /// 外部程序使用的闭区间结束索引，即 `end - 1`
    pub fn last_index(&self) -> usize {
        self.end - 1
    }
}

impl Display for BatchDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[批次 {} 图像 {}..{}]", self.id, self.start, self.end)
    }
}

/// 由原始文件数推算逻辑图像数
///
/// 兼容旧输出时结果为 `raw_files / num_channels + 1`，这个 +1 会让最后一个批次
/// 多出一个并不存在的图像；`exact` 为 true 时去掉它。
/// `num_channels` 为 0 时返回 `None`。
pub fn logical_image_count(raw_files: usize, num_channels: usize, exact: bool) -> Option<usize> {
    let whole = raw_files.checked_div(num_channels)?;
    Some(if exact { whole } else { whole + 1 })
}
