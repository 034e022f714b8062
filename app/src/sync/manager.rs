use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storage::{create_storage, Storage};
use utils::app_config::{AppConfig, SyncConfig, DEFAULT_CHUNK_SIZE};
use utils::error::Result;

use super::executor::{SyncExecutor, SyncResult};
use super::planner::{classify_by_size, diff, FileGroups};

/// 一次同步运行的参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    pub source_root: String,
    pub target_root: String,
    pub large_file_threshold: u64,
    /// Parallel transfers for small files.
    pub concurrency: usize,
    /// Parallel transfers for large files.
    pub large_concurrency: usize,
    pub staging_dir: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            source_root: String::from("/"),
            target_root: String::from("/"),
            large_file_threshold: DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            large_concurrency: 1,
            staging_dir: None,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            source_root: config.source_root.clone(),
            target_root: config.target_root.clone(),
            large_file_threshold: config.large_file_threshold,
            concurrency: config.concurrency,
            large_concurrency: config.large_concurrency,
            staging_dir: config.staging_dir.as_ref().map(PathBuf::from),
        }
    }
}

/// What a run would transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPlan {
    pub source_files: usize,
    pub target_files: usize,
    pub diff: Vec<String>,
    #[serde(flatten)]
    pub groups: FileGroups,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub plan: SyncPlan,
    pub results: SyncResult,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|ok| **ok).count()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(path, _)| path.as_str())
            .collect()
    }
}

/// 扫描 -> 差异 -> 分组 -> 同步
pub struct SyncManager {
    source: Arc<dyn Storage>,
    target: Arc<dyn Storage>,
    executor: SyncExecutor,
    options: SyncOptions,
}

impl SyncManager {
    pub fn new(source: Arc<dyn Storage>, target: Arc<dyn Storage>, options: SyncOptions) -> Self {
        let executor = SyncExecutor::new(source.clone(), target.clone())
            .with_staging_dir(options.staging_dir.clone());

        Self {
            source,
            target,
            executor,
            options,
        }
    }

    /// Resolves both endpoints from the connection table.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let source_id = &config.sync.source;
        let target_id = &config.sync.target;

        let source: Arc<dyn Storage> = Arc::new(create_storage(source_id, config.connection(source_id)?)?);
        let target: Arc<dyn Storage> = Arc::new(create_storage(target_id, config.connection(target_id)?)?);

        Ok(Self::new(source, target, SyncOptions::from(&config.sync)))
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Fails fast when either endpoint cannot be reached at all.
    pub async fn check_connections(&self) -> Result<()> {
        self.source.connect().await?;
        self.target.connect().await?;
        Ok(())
    }

    pub async fn scan_source(&self) -> Result<Vec<String>> {
        let files = self.source.list_files(&self.options.source_root).await?;
        log::info!("Source {} has {} files under {}", self.source.name(), files.len(), self.options.source_root);
        log::debug!("Source files: {:?}", files);
        Ok(files)
    }

    pub async fn scan_target(&self) -> Result<Vec<String>> {
        let files = self.target.list_files(&self.options.target_root).await?;
        log::info!("Target {} has {} files under {}", self.target.name(), files.len(), self.options.target_root);
        log::debug!("Target files: {:?}", files);
        Ok(files)
    }

    /// Source files not yet on the target.
    ///
    /// Target paths are mapped back under the source root first, so differing
    /// roots compare by relative location.
    pub fn diff_files(&self, source_files: &[String], target_files: &[String]) -> Vec<String> {
        let mapped: Vec<String> = target_files
            .iter()
            .filter_map(|f| {
                SyncExecutor::target_path(f, &self.options.target_root, &self.options.source_root)
            })
            .collect();

        let new_files = diff(source_files, &mapped);
        log::info!("New files: {}", new_files.len());
        log::debug!("New files: {:?}", new_files);
        new_files
    }

    pub async fn split_files(&self, files: &[String]) -> FileGroups {
        let source = self.source.clone();
        let groups = classify_by_size(files, self.options.large_file_threshold, |path| {
            let source = source.clone();
            async move { source.file_size(&path).await }
        })
        .await;

        log::info!(
            "Small files: {}, large files: {}, unresolved: {}",
            groups.small_files.len(),
            groups.large_files.len(),
            groups.unresolved.len()
        );
        groups
    }

    pub async fn plan(&self) -> Result<SyncPlan> {
        self.check_connections().await?;

        let source_files = self.scan_source().await?;
        let target_files = self.scan_target().await?;
        let new_files = self.diff_files(&source_files, &target_files);
        let groups = self.split_files(&new_files).await;

        Ok(SyncPlan {
            source_files: source_files.len(),
            target_files: target_files.len(),
            diff: new_files,
            groups,
        })
    }

    pub async fn run(&self) -> Result<SyncReport> {
        let plan = self.plan().await?;
        let source_root = &self.options.source_root;
        let target_root = &self.options.target_root;

        let (mut results, large) = futures::join!(
            self.executor.sync_concurrent(
                &plan.groups.small_files,
                source_root,
                target_root,
                self.options.concurrency,
            ),
            self.executor.sync_concurrent(
                &plan.groups.large_files,
                source_root,
                target_root,
                self.options.large_concurrency,
            ),
        );
        results.extend(large);

        let report = SyncReport { plan, results };
        log::info!(
            "Sync finished: {} synced, {} failed",
            report.succeeded(),
            report.failed().len()
        );
        Ok(report)
    }
}
