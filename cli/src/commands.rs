use app::sync::{SyncManager, SyncPlan};
use storage::{create_storage, Storage};
use utils::app_config::AppConfig;
use utils::error::{Error, Result};

use crate::SyncArgs;

/// 将命令行参数写入配置覆盖项
fn apply_overrides(args: &SyncArgs) -> Result<()> {
    let overrides = [
        ("sync.source", args.source.clone()),
        ("sync.target", args.target.clone()),
        ("sync.source_root", args.source_root.clone()),
        ("sync.target_root", args.target_root.clone()),
        ("sync.large_file_threshold", args.threshold.map(|v| v.to_string())),
        ("sync.concurrency", args.concurrency.map(|v| v.to_string())),
    ];

    for (key, value) in overrides {
        if let Some(value) = value {
            AppConfig::set(key, &value)?;
        }
    }
    Ok(())
}

fn manager(args: &SyncArgs) -> Result<SyncManager> {
    apply_overrides(args)?;
    let config = AppConfig::fetch()?;
    log::debug!("Sync settings: {:?}", config.sync);
    SyncManager::from_config(&config)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn print_plan(plan: &SyncPlan) {
    println!(
        "Source files: {}, target files: {}, new files: {}",
        plan.source_files,
        plan.target_files,
        plan.diff.len()
    );
    for file in &plan.groups.small_files {
        println!("small {}", file);
    }
    for file in &plan.groups.large_files {
        println!("large {}", file);
    }
    for file in &plan.groups.unresolved {
        println!("unresolved {}", file);
    }
}

pub async fn sync_cmd(args: &SyncArgs) -> Result<()> {
    let manager = manager(args)?;
    log::info!("Starting sync operation...");

    let report = manager.run().await?;

    if args.json {
        println!("{}", to_json(&report)?);
    } else {
        let failed = report.failed();
        for file in &failed {
            println!("failed {}", file);
        }
        println!(
            "Sync completed: {} synced, {} failed",
            report.succeeded(),
            failed.len()
        );
    }

    // 有文件失败时以非零状态退出，便于调度器告警
    let failed = report.failed().len();
    if failed > 0 {
        return Err(Error::new(format!("{} files failed to sync", failed)));
    }
    Ok(())
}

pub async fn diff_cmd(args: &SyncArgs) -> Result<()> {
    let plan = manager(args)?.plan().await?;

    if args.json {
        println!("{}", to_json(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

pub async fn scan_cmd(connection: &str, root: &str, json: bool) -> Result<()> {
    let config = AppConfig::fetch()?;
    let storage = create_storage(connection, config.connection(connection)?)?;
    log::info!("Scanning {} ({}) under {}", connection, storage.protocol(), root);

    storage.connect().await?;
    let files = storage.list_files(root).await?;

    if json {
        println!("{}", to_json(&files)?);
    } else {
        for file in &files {
            println!("{}", file);
        }
    }
    Ok(())
}
