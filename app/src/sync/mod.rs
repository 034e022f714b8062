//! 同步模块 - 单向增量同步

pub mod executor;
pub mod manager;
pub mod planner;

#[cfg(test)]
mod tests;

pub use executor::{SyncExecutor, SyncResult};
pub use manager::{SyncManager, SyncOptions, SyncPlan, SyncReport};
pub use planner::{classify_by_size, diff, FileGroups};
