pub mod batch_planner;
pub mod launch_log;
pub mod table_merger;

pub use batch_planner::plan;
pub use launch_log::LaunchLog;
pub use table_merger::merge;
