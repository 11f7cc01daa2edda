//! Worker 描述
//!
//! 一个 `WorkerSpec` 完整决定一次隔离执行，不同批次之间不共享可变状态。

use crate::config::{validate_memory, Config};
use crate::error::{AppError, AppResult};
use crate::models::batch::BatchDescriptor;
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// 内存上限，例如 "16G"（已校验）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLimit(String);

impl MemoryLimit {
    pub fn parse(value: &str) -> AppResult<Self> {
        validate_memory(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 运行 worker 的数字身份 (uid, gid)
///
/// 由调用方注入，输出文件因此归调用用户所有而不是 root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl RuntimeIdentity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// 当前进程的真实 uid/gid；非 Unix 平台没有这个概念，返回 `None`
    #[cfg(unix)]
    pub fn current() -> Option<Self> {
        // SAFETY: getuid/getgid 总是成功，没有前置条件
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Some(Self { uid, gid })
    }

    #[cfg(not(unix))]
    pub fn current() -> Option<Self> {
        None
    }

    /// 显式给出的 uid/gid 优先，缺少的部分取当前进程的身份
    ///
    /// 无法获取当前身份时，两者都必须显式给出
    pub fn resolve(uid: Option<u32>, gid: Option<u32>) -> AppResult<Self> {
        Self::resolve_with(uid, gid, Self::current())
    }

    fn resolve_with(uid: Option<u32>, gid: Option<u32>, current: Option<Self>) -> AppResult<Self> {
        match (uid, gid, current) {
            (Some(uid), Some(gid), _) => Ok(Self::new(uid, gid)),
            (uid, gid, Some(current)) => Ok(Self::new(
                uid.unwrap_or(current.uid),
                gid.unwrap_or(current.gid),
            )),
            _ => Err(AppError::invalid_config(
                "无法获取当前用户身份，请同时指定 --uid 和 --gid",
            )),
        }
    }
}

impl Display for RuntimeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// 单个批次的 worker 描述
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub batch: BatchDescriptor,
    /// 流程定义文件（绝对路径，只读挂载）
    pub pipeline_path: PathBuf,
    /// 共享图像目录（绝对路径，只读挂载）
    pub image_dir: PathBuf,
    /// 输出根目录，本批次写入 `{output_root}/{batch.id}`
    pub output_root: PathBuf,
    pub memory_limit: MemoryLimit,
    pub cpu_limit: f64,
    pub identity: RuntimeIdentity,
    /// 镜像引用，例如 `cellprofiler/cellprofiler:4.2.6`
    pub image: String,
    pub conserve_memory: bool,
}

impl WorkerSpec {
    /// 按配置为一个批次构建 worker 描述
    pub fn from_config(
        batch: BatchDescriptor,
        pipeline_path: &Path,
        image_dir: &Path,
        output_root: &Path,
        identity: RuntimeIdentity,
        config: &Config,
    ) -> AppResult<Self> {
        Ok(Self {
            batch,
            pipeline_path: pipeline_path.to_path_buf(),
            image_dir: image_dir.to_path_buf(),
            output_root: output_root.to_path_buf(),
            memory_limit: MemoryLimit::parse(&config.memory)?,
            cpu_limit: config.cpus,
            identity,
            image: config.image_reference(),
            conserve_memory: config.conserve_memory,
        })
    }

    /// 本批次专用的输出目录
    pub fn batch_output_dir(&self) -> PathBuf {
        self.output_root.join(&self.batch.id)
    }

    /// 容器名称
    pub fn container_name(&self) -> String {
        format!("cellprofiler_{}", self.batch.id)
    }
}
