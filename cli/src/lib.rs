use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "rust-sftpsync", version)]
#[command(about = "One-directional incremental sync between two SFTP endpoints", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file merged over the built-in defaults
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Set the logging level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

/// 覆盖 [sync] 配置段的参数
#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// Source connection id
    #[arg(long)]
    pub source: Option<String>,

    /// Target connection id
    #[arg(long)]
    pub target: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub source_root: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub target_root: Option<String>,

    /// Files strictly larger than this many bytes are synced as large files
    #[arg(long, value_name = "BYTES")]
    pub threshold: Option<u64>,

    /// Parallel transfers for small files
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy every source file missing on the target
    Sync(SyncArgs),

    /// List the files of one endpoint
    Scan {
        /// Connection id
        connection: String,

        /// Directory to list
        #[arg(default_value = "/")]
        root: String,

        #[arg(long)]
        json: bool,
    },

    /// Show what a sync would transfer without transferring anything
    Diff(SyncArgs),
}

pub async fn cli_match() -> utils::error::Result<()> {
    let cli = Cli::parse();

    utils::app_config::AppConfig::merge_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        utils::app_config::AppConfig::set("log.level", level)?;
    }

    // 日志依赖最终的配置
    let _guard = utils::logger::setup_logging()?;

    match &cli.command {
        Commands::Sync(args) => commands::sync_cmd(args).await?,
        Commands::Scan {
            connection,
            root,
            json,
        } => commands::scan_cmd(connection, root, *json).await?,
        Commands::Diff(args) => commands::diff_cmd(args).await?,
    }

    Ok(())
}
