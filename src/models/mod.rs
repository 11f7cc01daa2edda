pub mod batch;
pub mod table;
pub mod worker;

pub use batch::{logical_image_count, BatchDescriptor};
pub use table::{MergeGroup, MergeReport, MANIFEST_FILE_NAME, TABLE_EXTENSION};
pub use worker::{MemoryLimit, RuntimeIdentity, WorkerSpec};
