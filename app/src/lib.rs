pub mod sync;

/// 公共API的prelude模块
/// 用户可以通过 `use app::prelude::*` 来导入最常用的类型
pub mod prelude {
    pub use crate::sync::{
        classify_by_size, diff, FileGroups, SyncExecutor, SyncManager, SyncOptions, SyncPlan,
        SyncReport, SyncResult,
    };
}
