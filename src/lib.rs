//! # cellbatch
//!
//! 把大量图像切分成固定大小的批次，每个批次交给一个资源受限、相互隔离的
//! CellProfiler 容器处理，最后把各批次的结果表按表名合并。
//!
//! ## 架构设计
//!
//! ### ① 数据模型（Models）
//! - `models/` - `BatchDescriptor`、`WorkerSpec`、`MergeGroup`、`MergeReport`
//!
//! ### ② 业务能力层（Services）
//! - `batch_planner` - 纯函数批次规划
//! - `table_merger` - 同名表合并
//! - `launch_log` - 写启动日志
//!
//! ### ③ 基础设施层（Infrastructure）
//! - `ContainerRuntime` - 唯一调用外部容器运行时的地方
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 校验、规划、顺序启动
//! - `orchestrator/merge_processor` - 合并各批次输出

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{ContainerRuntime, WaitOutcome, WorkerHandle};
pub use models::{BatchDescriptor, MergeReport, RuntimeIdentity, WorkerSpec};
pub use orchestrator::{merge_outputs, BatchRunReport, BatchRunner, RunInputs};
pub use services::{merge, plan};
