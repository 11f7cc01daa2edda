//! 容器运行时 - 基础设施层
//!
//! 唯一直接调用外部容器运行时（默认 `docker`）的地方，只暴露"启动 worker"和"等待 worker"的能力。
//!
//! 每个 worker 有三个挂载点：
//! - 流程定义文件，只读，挂到 `/pipeline.cppipe`
//! - 本批次输出目录 `{output_root}/{batch_id}`，读写，挂到 `/output`
//! - 共享图像目录，只读，挂到 `/input`
//!
//! 启动是"发射后不管"的：运行时确认容器已创建就返回句柄，不等待分析结束。
//! 需要同步等待的调用方显式使用 [`ContainerRuntime::wait_all`]。

use crate::error::{AppError, AppResult};
use crate::models::WorkerSpec;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 容器内的挂载点
const PIPELINE_MOUNT: &str = "/pipeline.cppipe";
const OUTPUT_MOUNT: &str = "/output";
const INPUT_MOUNT: &str = "/input";

/// 已启动 worker 的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub batch_id: String,
    pub container_name: String,
    /// 运行时返回的容器 ID（可能为空）
    pub container_id: String,
}

/// 等待 worker 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 容器已退出，附带退出码
    Exited(i64),
    /// 无法得知结果（容器已被 --rm 清理、运行时不可达等）
    Unknown(String),
}

/// 容器运行时
pub struct ContainerRuntime {
    program: String,
    verbose_logging: bool,
}

impl ContainerRuntime {
    /// 创建新的运行时封装
    ///
    /// # 参数
    /// - `program`: 运行时可执行文件，例如 `docker` 或 `podman`
    /// - `verbose_logging`: 是否打印每个 worker 的完整命令行
    pub fn new(program: impl Into<String>, verbose_logging: bool) -> Self {
        Self {
            program: program.into(),
            verbose_logging,
        }
    }

    /// 构建 `run` 子命令的参数（不含运行时程序本身）
    ///
    /// 外部分析程序使用闭区间 `[-f, -l]`，所以 `-l` 传的是 `batch.end - 1`
    pub fn run_args(spec: &WorkerSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--name".into(),
            spec.container_name(),
            "--memory".into(),
            spec.memory_limit.as_str().into(),
            "--cpus".into(),
            spec.cpu_limit.to_string(),
            "--rm".into(),
            "-dit".into(),
            "-v".into(),
            format!("{}:{}:ro", spec.pipeline_path.display(), PIPELINE_MOUNT),
            "-v".into(),
            format!("{}:{}", spec.batch_output_dir().display(), OUTPUT_MOUNT),
            "-v".into(),
            format!("{}:{}:ro", spec.image_dir.display(), INPUT_MOUNT),
            "-u".into(),
            spec.identity.to_string(),
            spec.image.clone(),
        ];

        args.extend([
            "cellprofiler".into(),
            "-c".into(),
            "-r".into(),
            "-p".into(),
            PIPELINE_MOUNT.into(),
            "-f".into(),
            spec.batch.start.to_string(),
            "-l".into(),
            spec.batch.last_index().to_string(),
            "-o".into(),
            OUTPUT_MOUNT.into(),
            "-i".into(),
            INPUT_MOUNT.into(),
            "--conserve-memory".into(),
            if spec.conserve_memory { "True" } else { "False" }.into(),
        ]);

        args
    }

    /// 完整命令行（用于日志和 dry-run）
    pub fn command_line(&self, spec: &WorkerSpec) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(Self::run_args(spec));
        parts.join(" ")
    }

    /// 启动一个批次的 worker，容器创建后立即返回
    ///
    /// 会先创建本批次的输出目录。运行时不可达、进程无法创建或运行时返回非零状态
    /// 都报告为 `LaunchFailure`，不会影响其它批次。
    pub async fn launch(&self, spec: &WorkerSpec) -> AppResult<WorkerHandle> {
        let batch_id = spec.batch.id.as_str();
        let output_dir = spec.batch_output_dir();

        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            AppError::launch_failed(
                batch_id,
                format!("无法创建输出目录 {}: {}", output_dir.display(), e),
            )
        })?;

        if self.verbose_logging {
            info!("[批次 {}] {}", batch_id, self.command_line(spec));
        }

        let output = Command::new(&self.program)
            .args(Self::run_args(spec))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                AppError::launch_failed(batch_id, format!("无法执行 {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("{} 退出状态: {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(AppError::launch_failed(batch_id, reason));
        }

        let container_id = String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .to_string();
        debug!("[批次 {}] 容器已创建: {}", batch_id, container_id);

        Ok(WorkerHandle {
            batch_id: batch_id.to_string(),
            container_name: spec.container_name(),
            container_id,
        })
    }

    /// 等待一个 worker 结束
    pub async fn wait(&self, handle: &WorkerHandle) -> WaitOutcome {
        let output = Command::new(&self.program)
            .arg("wait")
            .arg(&handle.container_name)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match parse_exit_code(&stdout) {
                    Some(code) => WaitOutcome::Exited(code),
                    None => WaitOutcome::Unknown(format!("无法解析退出码: {:?}", stdout.trim())),
                }
            }
            Ok(output) => WaitOutcome::Unknown(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
            Err(e) => WaitOutcome::Unknown(format!("无法执行 {}: {}", self.program, e)),
        }
    }

    /// 依次等待所有 worker 结束（显式同步，可选）
    pub async fn wait_all(&self, handles: &[WorkerHandle]) -> Vec<(String, WaitOutcome)> {
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = self.wait(handle).await;
            match &outcome {
                WaitOutcome::Exited(0) => info!("[批次 {}] ✓ worker 已完成", handle.batch_id),
                WaitOutcome::Exited(code) => {
                    warn!("[批次 {}] ⚠️ worker 退出码: {}", handle.batch_id, code)
                }
                WaitOutcome::Unknown(reason) => {
                    warn!("[批次 {}] ⚠️ 无法获取 worker 结果: {}", handle.batch_id, reason)
                }
            }
            outcomes.push((handle.batch_id.clone(), outcome));
        }
        outcomes
    }
}

/// `wait` 子命令输出的最后一行是退出码
fn parse_exit_code(stdout: &str) -> Option<i64> {
    stdout.lines().last()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{BatchDescriptor, RuntimeIdentity};
    use crate::services::plan;
    use std::path::Path;
    use tempfile::TempDir;

    fn spec_for(batch: BatchDescriptor, output_root: &Path) -> WorkerSpec {
        WorkerSpec::from_config(
            batch,
            Path::new("/data/analysis.cppipe"),
            Path::new("/data/images"),
            output_root,
            RuntimeIdentity::new(1000, 1001),
            &Config::default(),
        )
        .unwrap()
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let pos = args.iter().position(|a| a == flag).unwrap();
        &args[pos + 1]
    }

    #[test]
    fn test_run_args_mounts_and_limits() {
        let spec = spec_for(BatchDescriptor::new(2, 32, 64), Path::new("/data/out"));
        let args = ContainerRuntime::run_args(&spec);

        assert_eq!(args[0], "run");
        assert_eq!(arg_after(&args, "--name"), "cellprofiler_002");
        assert_eq!(arg_after(&args, "--memory"), "16G");
        assert_eq!(arg_after(&args, "--cpus"), "1");
        assert_eq!(arg_after(&args, "-u"), "1000:1001");

        let mounts: Vec<_> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-v")
            .map(|(i, _)| args[i + 1].as_str())
            .collect();
        assert_eq!(
            mounts,
            [
                "/data/analysis.cppipe:/pipeline.cppipe:ro",
                "/data/out/002:/output",
                "/data/images:/input:ro",
            ]
        );
        assert!(args.contains(&"cellprofiler/cellprofiler:4.2.6".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("True"));
    }

    #[test]
    fn test_run_args_use_inclusive_end() {
        let out = Path::new("/data/out");
        let expected = [("0", "3"), ("4", "7"), ("8", "9")];

        for (batch, (first, last)) in plan(10, 4).unwrap().into_iter().zip(expected) {
            let args = ContainerRuntime::run_args(&spec_for(batch, out));
            assert_eq!(arg_after(&args, "-f"), first);
            assert_eq!(arg_after(&args, "-l"), last);
        }
    }

    #[test]
    fn test_single_item_batch_has_equal_bounds() {
        let batch = plan(9, 4).unwrap().pop().unwrap();
        let args = ContainerRuntime::run_args(&spec_for(batch, Path::new("/out")));
        assert_eq!(arg_after(&args, "-f"), "8");
        assert_eq!(arg_after(&args, "-l"), "8");
    }

    #[test]
    fn test_parse_exit_code() {
        assert_eq!(parse_exit_code("0\n"), Some(0));
        assert_eq!(parse_exit_code("137\n"), Some(137));
        assert_eq!(parse_exit_code(""), None);
        assert_eq!(parse_exit_code("Error: no such container"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_creates_output_dir_and_returns_handle() {
        let root = TempDir::new().unwrap();
        let spec = spec_for(BatchDescriptor::new(1, 0, 4), root.path());
        // echo 把收到的参数原样打印出来，代替真实的运行时
        let runtime = ContainerRuntime::new("echo", false);

        let handle = runtime.launch(&spec).await.unwrap();

        assert!(root.path().join("001").is_dir());
        assert_eq!(handle.batch_id, "001");
        assert_eq!(handle.container_name, "cellprofiler_001");
        assert!(handle.container_id.starts_with("run --name cellprofiler_001"));
        assert!(handle.container_id.contains("-f 0 -l 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_failure_on_nonzero_exit() {
        let root = TempDir::new().unwrap();
        let spec = spec_for(BatchDescriptor::new(5, 128, 160), root.path());
        let runtime = ContainerRuntime::new("false", false);

        let err = runtime.launch(&spec).await.unwrap_err();
        match err {
            AppError::LaunchFailure { batch_id, .. } => assert_eq!(batch_id, "005"),
            other => panic!("期望 LaunchFailure, 实际: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_launch_failure_when_runtime_missing() {
        let root = TempDir::new().unwrap();
        let spec = spec_for(BatchDescriptor::new(1, 0, 4), root.path());
        let runtime = ContainerRuntime::new("cellbatch-no-such-runtime", false);

        let result = runtime.launch(&spec).await;
        assert!(matches!(result, Err(AppError::LaunchFailure { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_reports_unknown_without_exit_code() {
        let runtime = ContainerRuntime::new("true", false);
        let handle = WorkerHandle {
            batch_id: "001".into(),
            container_name: "cellprofiler_001".into(),
            container_id: String::new(),
        };

        let outcomes = runtime.wait_all(&[handle]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, WaitOutcome::Unknown(_)));
    }
}
