//! Pure planning steps: what is new on the source, and how big it is.

use std::collections::HashSet;
use std::future::Future;

use serde::{Deserialize, Serialize};
use storage::StorageError;

/// 按大小划分的文件组
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroups {
    pub large_files: Vec<String>,
    pub small_files: Vec<String>,
    /// Files whose size could not be determined. They are not synced this run.
    #[serde(default)]
    pub unresolved: Vec<String>,
}

impl FileGroups {
    pub fn len(&self) -> usize {
        self.large_files.len() + self.small_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Paths of `source` absent from `target`, in source order.
///
/// Exact string identity only; nothing present on the target is ever reported.
pub fn diff(source: &[String], target: &[String]) -> Vec<String> {
    let existing: HashSet<&str> = target.iter().map(String::as_str).collect();
    source
        .iter()
        .filter(|path| !existing.contains(path.as_str()))
        .cloned()
        .collect()
}

/// 按阈值划分大小文件
///
/// A file is large when its size is strictly greater than `threshold`. A file
/// whose lookup fails is logged and kept out of both buckets.
pub async fn classify_by_size<F, Fut>(files: &[String], threshold: u64, mut size_lookup: F) -> FileGroups
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<u64, StorageError>>,
{
    let mut groups = FileGroups::default();

    for file in files {
        match size_lookup(file.clone()).await {
            Ok(size) if size > threshold => groups.large_files.push(file.clone()),
            Ok(_) => groups.small_files.push(file.clone()),
            Err(e) => {
                log::warn!("Could not get size for {}: {}", file, e);
                groups.unresolved.push(file.clone());
            }
        }
    }

    groups
}
