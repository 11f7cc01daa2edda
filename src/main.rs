use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use cellbatch::utils::logging;
use cellbatch::{merge_outputs, AppError, BatchRunner, Config, RuntimeIdentity, WaitOutcome};

#[derive(Parser)]
#[command(name = "cellbatch")]
#[command(
    about = "Run CellProfiler in isolated containers on batches of images, then merge the results",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start one container per batch of images
    Run(RunArgs),

    /// Merge CSV files with the same name from different directories
    Merge {
        /// Directories containing CSV files, followed by the output directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,

        /// Enable verbose mode
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the CellProfiler pipeline (.cppipe) file
    pipeline_file: PathBuf,

    /// Parent output directory; each batch writes to <OUTPUT_DIR>/<batch id>
    output_dir: PathBuf,

    /// Directory containing input images
    image_dir: PathBuf,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of images to process in each batch [default: 32]
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of channels (raw files) per image [default: 4]
    #[arg(long)]
    num_channels: Option<usize>,

    /// Memory ceiling per container [default: 16G]
    #[arg(long)]
    memory: Option<String>,

    /// CellProfiler image version [default: 4.2.6]
    #[arg(long)]
    cellprofiler_version: Option<String>,

    /// CPU share per container [default: 1]
    #[arg(long)]
    cpus: Option<f64>,

    /// Container runtime executable [default: docker]
    #[arg(long)]
    runtime: Option<String>,

    /// User id to run containers as [default: invoking user]
    #[arg(long)]
    uid: Option<u32>,

    /// Group id to run containers as [default: invoking user's group]
    #[arg(long)]
    gid: Option<u32>,

    /// Do not add one extra image to the computed image count
    #[arg(long)]
    exact_count: bool,

    /// Print the container commands without starting anything
    #[arg(long)]
    dry_run: bool,

    /// Wait for every started container to exit
    #[arg(long)]
    wait: bool,

    /// Print verbose information
    #[arg(short, long)]
    verbose: bool,
}

impl RunArgs {
    /// 默认值 < 配置文件 < 环境变量 < 命令行
    fn load_config(&self) -> Result<Config> {
        let base = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };
        let mut config = base.with_env();

        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.num_channels {
            config.num_channels = v;
        }
        if let Some(v) = &self.memory {
            config.memory = v.clone();
        }
        if let Some(v) = &self.cellprofiler_version {
            config.cellprofiler_version = v.clone();
        }
        if let Some(v) = self.cpus {
            config.cpus = v;
        }
        if let Some(v) = &self.runtime {
            config.runtime_program = v.clone();
        }
        config.exact_image_count |= self.exact_count;
        config.verbose_logging |= self.verbose;

        Ok(config)
    }

    fn identity(&self) -> Result<RuntimeIdentity, AppError> {
        RuntimeIdentity::resolve(self.uid, self.gid)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Merge { mut paths, verbose } => {
            logging::init(verbose);
            let output_dir = paths.pop().context("缺少输出目录")?;
            merge_command(paths, output_dir).await
        }
    }
}

async fn run_command(args: RunArgs) -> Result<()> {
    let config = args.load_config()?;
    logging::init(config.verbose_logging);

    let runner = BatchRunner::new(config, args.identity().map_err(report_error)?)
        .map_err(report_error)?;
    let inputs = runner
        .prepare(&args.pipeline_file, &args.output_dir, &args.image_dir)
        .map_err(report_error)?;
    let mut report = runner
        .run(&inputs, args.dry_run)
        .await
        .map_err(report_error)?;

    if args.wait && !args.dry_run {
        runner.wait_all(&mut report).await;
        let unfinished = report
            .waited
            .iter()
            .filter(|(_, outcome)| *outcome != WaitOutcome::Exited(0))
            .count();
        info!("全部 worker 已结束, {} 个未正常退出", unfinished);
    }

    if !report.failed.is_empty() {
        bail!(
            "{} 个批次启动失败: {}",
            report.failed.len(),
            report.failed_ids().join(", ")
        );
    }
    Ok(())
}

async fn merge_command(source_dirs: Vec<PathBuf>, output_dir: PathBuf) -> Result<()> {
    let report = merge_outputs(source_dirs, output_dir)
        .await
        .map_err(report_error)?;

    if !report.is_complete() {
        let names: Vec<&str> = report.failed.keys().map(String::as_str).collect();
        bail!("{} 个表合并失败: {}", names.len(), names.join(", "));
    }
    Ok(())
}

/// 记录错误并转为 anyhow 错误；致命错误意味着还没有开始任何工作
fn report_error(err: AppError) -> anyhow::Error {
    if err.is_fatal() {
        error!("❌ 前置检查失败，未执行任何工作: {}", err);
    } else {
        error!("❌ {}", err);
    }
    err.into()
}
