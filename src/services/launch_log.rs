//! 启动日志服务 - 业务能力层
//!
//! 只负责把每个批次的启动结果追加到日志文件，方便操作员针对失败批次重跑

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::BatchDescriptor;

/// 启动日志
pub struct LaunchLog {
    log_file_path: PathBuf,
}

impl LaunchLog {
    /// 使用指定路径创建
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            log_file_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log_file_path
    }

    /// 写入日志头（覆盖旧文件）
    pub fn init(&self, image_reference: &str) -> Result<()> {
        let header = format!(
            "{}\n批次启动日志 - {} - {}\n{}\n\n",
            "=".repeat(60),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            image_reference,
            "=".repeat(60)
        );
        fs::write(&self.log_file_path, header)?;
        Ok(())
    }

    /// 记录启动成功
    pub fn record_started(&self, batch: &BatchDescriptor, container_id: &str) -> Result<()> {
        self.append(batch, &format!("started {}", container_id))
    }

    /// 记录启动失败
    pub fn record_failed(&self, batch: &BatchDescriptor, reason: &str) -> Result<()> {
        self.append(batch, &format!("FAILED {}", reason.replace('\n', " ")))
    }

    fn append(&self, batch: &BatchDescriptor, outcome: &str) -> Result<()> {
        debug!("写入启动日志: {} {}", batch.id, outcome);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)?;

        writeln!(
            file,
            "批次 {} | 图像 {}-{} | {}",
            batch.id,
            batch.start,
            batch.last_index(),
            outcome
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_one_line_per_batch() {
        let dir = TempDir::new().unwrap();
        let log = LaunchLog::with_path(dir.path().join("launch_log.txt"));
        log.init("cellprofiler/cellprofiler:4.2.6").unwrap();

        log.record_started(&BatchDescriptor::new(1, 0, 4), "abc123").unwrap();
        log.record_failed(&BatchDescriptor::new(2, 4, 6), "no such image\nretry later")
            .unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        assert!(text.contains("cellprofiler/cellprofiler:4.2.6"));
        assert!(text.contains("批次 001 | 图像 0-3 | started abc123"));
        assert!(text.contains("批次 002 | 图像 4-5 | FAILED no such image retry later"));
    }
}
