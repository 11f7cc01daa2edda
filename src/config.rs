use crate::error::{AppError, AppResult};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

/// 程序配置
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// 每个批次包含的图像数量
    pub batch_size: usize,
    /// 每个逻辑图像对应的原始文件（通道）数量
    pub num_channels: usize,
    /// 每个 worker 的内存上限，例如 "16G"
    pub memory: String,
    /// CellProfiler 镜像版本
    pub cellprofiler_version: String,
    /// 每个 worker 的 CPU 份额
    pub cpus: f64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 容器运行时 ---
    pub runtime_program: String,
    pub worker_image: String,
    /// 传给 cellprofiler 的 --conserve-memory
    pub conserve_memory: bool,
    /// 为 true 时逻辑图像数不再额外 +1
    pub exact_image_count: bool,
    /// 启动日志文件名（位于输出根目录下）
    pub launch_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 32,
            num_channels: 4,
            memory: "16G".to_string(),
            cellprofiler_version: "4.2.6".to_string(),
            cpus: 1.0,
            verbose_logging: false,
            runtime_program: "docker".to_string(),
            worker_image: "cellprofiler/cellprofiler".to_string(),
            conserve_memory: true,
            exact_image_count: false,
            launch_log_file: "launch_log.txt".to_string(),
        }
    }
}

/// TOML 配置文件的内容，所有键都是可选的
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    batch_size: Option<usize>,
    num_channels: Option<usize>,
    memory: Option<String>,
    cellprofiler_version: Option<String>,
    cpus: Option<f64>,
    verbose: Option<bool>,
    runtime: Option<String>,
    worker_image: Option<String>,
    conserve_memory: Option<bool>,
    exact_image_count: Option<bool>,
    launch_log_file: Option<String>,
}

impl Config {
    /// 在当前配置之上叠加环境变量
    ///
    /// 无法解析的值会被忽略，保留下层的值
    pub fn with_env(self) -> Self {
        let base = self;
        Self {
            batch_size: env_parse("CELLBATCH_BATCH_SIZE").unwrap_or(base.batch_size),
            num_channels: env_parse("CELLBATCH_NUM_CHANNELS").unwrap_or(base.num_channels),
            memory: std::env::var("CELLBATCH_MEMORY").unwrap_or(base.memory),
            cellprofiler_version: std::env::var("CELLBATCH_CELLPROFILER_VERSION")
                .unwrap_or(base.cellprofiler_version),
            cpus: env_parse("CELLBATCH_CPUS").unwrap_or(base.cpus),
            verbose_logging: env_parse("CELLBATCH_VERBOSE").unwrap_or(base.verbose_logging),
            runtime_program: std::env::var("CELLBATCH_RUNTIME").unwrap_or(base.runtime_program),
            worker_image: std::env::var("CELLBATCH_WORKER_IMAGE").unwrap_or(base.worker_image),
            ..base
        }
    }

    /// 从 TOML 文件加载配置（叠加在默认值之上）
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::not_found(path)
            } else {
                AppError::io(path, e)
            }
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| AppError::invalid_config(format!("{}: {}", path.display(), e)))
    }

    fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(content)?;
        let base = Self::default();
        Ok(Self {
            batch_size: file.batch_size.unwrap_or(base.batch_size),
            num_channels: file.num_channels.unwrap_or(base.num_channels),
            memory: file.memory.unwrap_or(base.memory),
            cellprofiler_version: file.cellprofiler_version.unwrap_or(base.cellprofiler_version),
            cpus: file.cpus.unwrap_or(base.cpus),
            verbose_logging: file.verbose.unwrap_or(base.verbose_logging),
            runtime_program: file.runtime.unwrap_or(base.runtime_program),
            worker_image: file.worker_image.unwrap_or(base.worker_image),
            conserve_memory: file.conserve_memory.unwrap_or(base.conserve_memory),
            exact_image_count: file.exact_image_count.unwrap_or(base.exact_image_count),
            launch_log_file: file.launch_log_file.unwrap_or(base.launch_log_file),
        })
    }

    /// 完整镜像引用，例如 `cellprofiler/cellprofiler:4.2.6`
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.worker_image, self.cellprofiler_version)
    }

    /// 校验配置，任何问题都在开始工作前报告
    pub fn validate(&self) -> AppResult<()> {
        if self.batch_size == 0 {
            return Err(AppError::invalid_config("batch_size 必须大于 0"));
        }
        if self.num_channels == 0 {
            return Err(AppError::invalid_config("num_channels 必须大于 0"));
        }
        validate_memory(&self.memory)?;
        if !self.cpus.is_finite() || self.cpus <= 0.0 {
            return Err(AppError::invalid_config(format!(
                "cpus 必须是正数: {}",
                self.cpus
            )));
        }
        validate_version(&self.cellprofiler_version)?;
        if self.worker_image.trim().is_empty() {
            return Err(AppError::invalid_config("worker_image 不能为空"));
        }
        if self.runtime_program.trim().is_empty() {
            return Err(AppError::invalid_config("runtime 不能为空"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// 内存字符串：数字 + 可选单位 b/k/m/g（大小写均可）
pub fn validate_memory(memory: &str) -> AppResult<()> {
    let re = Regex::new(r"^[0-9]+[bkmgBKMG]?$")
        .map_err(|e| AppError::invalid_config(e.to_string()))?;
    let non_zero = memory
        .trim_end_matches(char::is_alphabetic)
        .parse::<u64>()
        .is_ok_and(|n| n > 0);
    if !re.is_match(memory) || !non_zero {
        return Err(AppError::invalid_config(format!(
            "内存上限格式错误: '{}' (示例: 16G, 512m)",
            memory
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> AppResult<()> {
    let re = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$")
        .map_err(|e| AppError::invalid_config(e.to_string()))?;
    if !re.is_match(version) {
        return Err(AppError::invalid_config(format!(
            "镜像版本格式错误: '{}'",
            version
        )));
    }
    Ok(())
}
