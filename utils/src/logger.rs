use slog::o;
use slog::Drain;
use slog::Level;
use slog::LevelFilter;
#[cfg(all(target_os = "linux", feature = "journald"))]
use slog_journald::JournaldDrain;
#[cfg(feature = "syslog")]
use slog_syslog::Facility;

use std::fs::OpenOptions;
use std::path::PathBuf;

use super::error::Result;
use crate::app_config::{AppConfig, LogConfig};

const LOG_FILE_NAME: &str = "sftpsync.log";

pub fn setup_logging() -> Result<slog_scope::GlobalLoggerGuard> {
    let config = AppConfig::get::<LogConfig>("log").ok();
    let level = config
        .as_ref()
        .map(|c| parse_level(&c.level))
        .unwrap_or(Level::Info);

    let guard = slog_scope::set_global_logger(default_root_logger(level, config.as_ref())?);
    slog_stdlog::init_with_level(to_log_level(level))?;

    Ok(guard)
}

pub fn default_root_logger(level: Level, config: Option<&LogConfig>) -> Result<slog::Logger> {
    let term_drain = default_term_drain().unwrap_or(default_discard()?);
    let file_drain = default_file_drain(config).unwrap_or(default_discard()?);

    let drain = slog::Duplicate(term_drain, file_drain).fuse();

    #[cfg(feature = "syslog")]
    let drain = slog::Duplicate(default_syslog_drain().unwrap_or(default_discard()?), drain).fuse();
    #[cfg(feature = "journald")]
    #[cfg(target_os = "linux")]
    let drain = slog::Duplicate(
        default_journald_drain().unwrap_or(default_discard()?),
        drain,
    )
    .fuse();

    let drain = LevelFilter::new(drain, level).fuse();

    Ok(slog::Logger::root(drain, o!()))
}

/// 将配置中的日志级别字符串转换为slog级别，未知值回退到info
pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" | "warning" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

fn to_log_level(level: Level) -> log::Level {
    match level {
        Level::Critical | Level::Error => log::Level::Error,
        Level::Warning => log::Level::Warn,
        Level::Info => log::Level::Info,
        Level::Debug => log::Level::Debug,
        Level::Trace => log::Level::Trace,
    }
}

fn default_discard() -> Result<slog_async::Async> {
    let drain = slog_async::Async::new(slog::Discard).chan_size(1024).build();

    Ok(drain)
}

// term drain: stdout is reserved for command output
fn default_term_drain() -> Result<slog_async::Async> {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let term = slog_term::FullFormat::new(plain).use_custom_timestamp(slog_term::timestamp_local);

    #[cfg(feature = "termlog")]
    let term = term.use_file_location();

    let drain = slog_async::Async::new(term.build().fuse())
        .chan_size(1024)
        .build();

    Ok(drain)
}

fn log_dir(config: Option<&LogConfig>) -> Result<PathBuf> {
    if let Some(dir) = config.and_then(|c| c.dir.as_deref()).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    // 获取当前可执行文件所在目录
    let mut exe_dir = std::env::current_exe()?;
    exe_dir.pop();

    if !exe_dir.exists() {
        exe_dir = std::env::current_dir()?;
    }

    Ok(exe_dir.join("logs"))
}

// file drain: Log to file
fn default_file_drain(config: Option<&LogConfig>) -> Result<slog_async::Async> {
    let log_dir = log_dir(config)?;
    std::fs::create_dir_all(&log_dir)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))?;

    let decorator = slog_term::PlainSyncDecorator::new(file);
    let formatter = slog_term::FullFormat::new(decorator)
        .use_file_location()
        .use_custom_timestamp(slog_term::timestamp_local)
        .build()
        .fuse();

    let drain = slog_async::Async::new(formatter).chan_size(1024).build();

    Ok(drain)
}

// syslog drain: Log to syslog
#[cfg(feature = "syslog")]
fn default_syslog_drain() -> Result<slog_async::Async> {
    let syslog = slog_syslog::unix_3164(Facility::LOG_USER)?;

    let drain = slog_async::Async::new(syslog.fuse()).chan_size(1024).build();

    Ok(drain)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn default_journald_drain() -> Result<slog_async::Async> {
    let journald = JournaldDrain.ignore_res();
    let drain = slog_async::Async::new(journald).chan_size(1024).build();

    Ok(drain)
}
