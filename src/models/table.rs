//! 合并相关的数据结构

use crate::error::AppError;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 表格文件扩展名（比较时忽略大小写）
pub const TABLE_EXTENSION: &str = "csv";

/// 保留的清单文件名，永远不参与合并
pub const MANIFEST_FILE_NAME: &str = "Experiment.csv";

/// 同一逻辑表名的所有来源文件，按目录处理顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeGroup {
    pub name: String,
    pub sources: Vec<PathBuf>,
}

impl MergeGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
        }
    }
}

/// 合并结果：每个逻辑表名要么写出成功（行数），要么失败
#[derive(Debug, Default)]
pub struct MergeReport {
    /// 逻辑表名 → 写出的数据行数（不含表头）
    pub written: BTreeMap<String, usize>,
    /// 逻辑表名 → 失败原因
    pub failed: BTreeMap<String, AppError>,
}

impl MergeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.written.values().sum()
    }
}
