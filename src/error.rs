use std::path::{Path, PathBuf};
use thiserror::Error;

/// 应用程序错误类型
///
/// 分为两类：
/// - 致命错误（配置错误、路径不存在、I/O）：在任何工作开始之前中止
/// - 单项错误（启动失败、读取失败、写入失败）：只影响一个批次或一个表名，收集到报告里
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（扩展名不对、批大小非正、资源字符串格式错误等）
    #[error("配置错误: {reason}")]
    InvalidConfiguration { reason: String },

    /// 必需的文件或目录不存在
    #[error("路径不存在: {}", path.display())]
    NotFound { path: PathBuf },

    /// 某个批次的 worker 无法启动
    #[error("批次 {batch_id} 启动失败: {reason}")]
    LaunchFailure { batch_id: String, reason: String },

    /// 某个表文件无法解析
    #[error("读取表文件失败 ({}): {reason}", path.display())]
    ReadFailure { path: PathBuf, reason: String },

    /// 合并后的表无法写出
    #[error("写入表文件失败 ({}): {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },

    /// 目录创建、列举等文件系统错误
    #[error("文件系统错误 ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建配置错误
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        AppError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// 创建路径不存在错误
    pub fn not_found(path: impl AsRef<Path>) -> Self {
        AppError::NotFound {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 创建启动失败错误
    pub fn launch_failed(batch_id: impl Into<String>, reason: impl ToString) -> Self {
        AppError::LaunchFailure {
            batch_id: batch_id.into(),
            reason: reason.to_string(),
        }
    }

    /// 创建读取失败错误
    pub fn read_failed(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        AppError::ReadFailure {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// 创建写入失败错误
    pub fn write_failed(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        AppError::WriteFailure {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// 创建文件系统错误
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// 是否为致命错误（需要在开始工作前中止）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::InvalidConfiguration { .. } | AppError::NotFound { .. } | AppError::Io { .. }
        )
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::invalid_config("batch_size 必须大于 0").is_fatal());
        assert!(AppError::not_found("/no/such/dir").is_fatal());
        assert!(!AppError::launch_failed("001", "runtime unreachable").is_fatal());
        assert!(!AppError::read_failed("a/cells.csv", "bad row").is_fatal());
        assert!(!AppError::write_failed("out/cells.csv", "disk full").is_fatal());
    }

    #[test]
    fn test_read_failure_names_file() {
        let err = AppError::read_failed("batch/001/nuclei.csv", "字段数不一致");
        assert!(err.to_string().contains("batch/001/nuclei.csv"));
    }
}
