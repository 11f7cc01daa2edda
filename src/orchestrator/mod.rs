//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量启动
//! - 校验输入、统计图像、规划批次
//! - 顺序启动每个批次的 worker，不等待结束
//! - 汇总启动结果，可选地显式等待所有 worker
//!
//! ### `merge_processor` - 结果合并
//! - 在所有 worker 结束后单独调用
//! - 按逻辑表名合并各批次的输出表
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<BatchDescriptor>)
//!     ↓
//! services::batch_planner (纯函数规划)  +  infrastructure::ContainerRuntime (启动 worker)
//!
//! merge_processor
//!     ↓
//! services::table_merger (读表、分组、写表)
//! ```

pub mod batch_processor;
pub mod merge_processor;

// 重新导出主要类型
pub use batch_processor::{BatchRunReport, BatchRunner, RunInputs};
pub use merge_processor::merge_outputs;
