//! 批量启动处理器 - 编排层
//!
//! ## 职责
//!
//! 1. **前置校验**：流程文件扩展名、流程文件和图像目录是否存在（任何工作开始前）
//! 2. **统计图像**：按通道数把原始文件数换算成逻辑图像数
//! 3. **规划批次**：调用纯函数 `plan`，得到不可变的批次序列
//! 4. **依次启动**：每个批次启动一个 worker，不等待它结束
//! 5. **结果汇总**：单个批次失败只记录，不中断循环，也不重试
//!
//! 编排器本身是单线程顺序执行的；并行只发生在外部容器运行时内部。

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{ContainerRuntime, WaitOutcome, WorkerHandle};
use crate::models::{logical_image_count, BatchDescriptor, RuntimeIdentity, WorkerSpec};
use crate::services::{plan, LaunchLog};
use crate::utils::logging::{log_batch_launch, log_startup, print_launch_stats};
use std::path::{Component, Path, PathBuf};
use tracing::{error, info, warn};

/// 流程定义文件的扩展名（比较时忽略大小写）
pub const PIPELINE_EXTENSION: &str = "cppipe";

/// 经过校验、已转为绝对路径的运行输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInputs {
    pub pipeline_file: PathBuf,
    pub image_dir: PathBuf,
    pub output_root: PathBuf,
}

/// 一次运行的结果
#[derive(Debug, Default)]
pub struct BatchRunReport {
    pub planned: Vec<BatchDescriptor>,
    pub started: Vec<WorkerHandle>,
    pub failed: Vec<(BatchDescriptor, AppError)>,
    /// 仅在显式等待时填充
    pub waited: Vec<(String, WaitOutcome)>,
}

impl BatchRunReport {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(b, _)| b.id.as_str()).collect()
    }
}

/// 批量启动器
pub struct BatchRunner {
    config: Config,
    identity: RuntimeIdentity,
    runtime: ContainerRuntime,
}

impl BatchRunner {
    /// 创建启动器，配置有问题时直接返回错误
    pub fn new(config: Config, identity: RuntimeIdentity) -> AppResult<Self> {
        config.validate()?;
        let runtime = ContainerRuntime::new(&config.runtime_program, config.verbose_logging);
        Ok(Self {
            config,
            identity,
            runtime,
        })
    }

    /// 校验输入路径并转为绝对路径
    ///
    /// 扩展名检查在前（`InvalidConfiguration`），然后是存在性检查（`NotFound`）
    pub fn prepare(
        &self,
        pipeline_file: &Path,
        output_dir: &Path,
        image_dir: &Path,
    ) -> AppResult<RunInputs> {
        let pipeline_file = absolute(pipeline_file)?;
        let output_root = absolute(output_dir)?;
        let image_dir = absolute(image_dir)?;

        let extension_ok = pipeline_file
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(PIPELINE_EXTENSION));
        if !extension_ok {
            return Err(AppError::invalid_config(format!(
                "流程文件必须是 .{} 文件: {}",
                PIPELINE_EXTENSION,
                pipeline_file.display()
            )));
        }

        if !pipeline_file.is_file() {
            return Err(AppError::not_found(&pipeline_file));
        }
        if !image_dir.is_dir() {
            return Err(AppError::not_found(&image_dir));
        }

        Ok(RunInputs {
            pipeline_file,
            image_dir,
            output_root,
        })
    }

    /// 统计逻辑图像数
    pub async fn count_images(&self, image_dir: &Path) -> AppResult<usize> {
        let mut raw_files = 0usize;
        let mut entries = tokio::fs::read_dir(image_dir)
            .await
            .map_err(|e| AppError::io(image_dir, e))?;
        while entries
            .next_entry()
            .await
            .map_err(|e| AppError::io(image_dir, e))?
            .is_some()
        {
            raw_files += 1;
        }

        logical_image_count(
            raw_files,
            self.config.num_channels,
            self.config.exact_image_count,
        )
        .ok_or_else(|| AppError::invalid_config("num_channels 必须大于 0"))
    }

    /// 规划并启动所有批次
    ///
    /// # 参数
    /// - `inputs`: 经过 `prepare` 校验的输入
    /// - `dry_run`: 只打印命令，不创建目录也不启动容器
    ///
    /// # 返回
    /// 只有前置条件错误才返回 `Err`；单个批次的启动失败记录在报告里
    pub async fn run(&self, inputs: &RunInputs, dry_run: bool) -> AppResult<BatchRunReport> {
        log_startup(&self.config, &inputs.image_dir, &inputs.output_root);

        let total_images = self.count_images(&inputs.image_dir).await?;
        info!("🖼️ 共找到 {} 张逻辑图像", total_images);

        let batches = plan(total_images, self.config.batch_size)?;
        let specs = batches
            .iter()
            .cloned()
            .map(|batch| {
                WorkerSpec::from_config(
                    batch,
                    &inputs.pipeline_file,
                    &inputs.image_dir,
                    &inputs.output_root,
                    self.identity,
                    &self.config,
                )
            })
            .collect::<AppResult<Vec<_>>>()?;

        let mut report = BatchRunReport {
            planned: batches,
            ..Default::default()
        };

        if dry_run {
            for spec in &specs {
                log_batch_launch(&spec.batch, specs.len());
                info!("[dry-run] {}", self.runtime.command_line(spec));
            }
            return Ok(report);
        }

        tokio::fs::create_dir_all(&inputs.output_root)
            .await
            .map_err(|e| AppError::io(&inputs.output_root, e))?;

        let launch_log_path = inputs.output_root.join(&self.config.launch_log_file);
        let launch_log = LaunchLog::with_path(launch_log_path);
        if let Err(e) = launch_log.init(&self.config.image_reference()) {
            warn!("⚠️ 无法写入启动日志 {}: {}", launch_log.path().display(), e);
        }

        for spec in &specs {
            log_batch_launch(&spec.batch, specs.len());

            let logged = match self.runtime.launch(spec).await {
                Ok(handle) => {
                    info!("[批次 {}] ✓ 容器 {} 已启动", spec.batch.id, handle.container_name);
                    let logged = launch_log.record_started(&spec.batch, &handle.container_id);
                    report.started.push(handle);
                    logged
                }
                Err(e) => {
                    error!("[批次 {}] ❌ {}", spec.batch.id, e);
                    let logged = launch_log.record_failed(&spec.batch, &e.to_string());
                    report.failed.push((spec.batch.clone(), e));
                    logged
                }
            };
            if let Err(e) = logged {
                warn!("⚠️ 无法写入启动日志: {}", e);
            }
        }

        print_launch_stats(
            report.started.len(),
            report.failed.len(),
            report.planned.len(),
            launch_log.path(),
        );

        Ok(report)
    }

    /// 显式等待所有已启动的 worker 结束
    pub async fn wait_all(&self, report: &mut BatchRunReport) {
        info!("⏳ 等待 {} 个 worker 结束...", report.started.len());
        report.waited = self.runtime.wait_all(&report.started).await;
    }
}

/// 转为绝对路径并按字面去掉 `.` 和 `..`，不解析符号链接
fn absolute(path: &Path) -> AppResult<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| AppError::io(path, e))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}
