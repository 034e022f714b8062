use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::RwLock;

use super::error::{Error, Result};

/// 默认分块/大文件阈值：10 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

const ENV_PREFIX: &str = "SFTPSYNC";

// 全局配置构建器，放在RwLock中以便运行时覆盖
lazy_static! {
    static ref BUILDER: RwLock<ConfigBuilder<DefaultState>> = RwLock::new(Config::builder());
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    /// 日志文件目录，未设置时使用可执行文件旁的 logs/
    #[serde(default)]
    pub dir: Option<String>,
}

/// 同步运行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: String,
    pub target: String,
    pub source_root: String,
    pub target_root: String,
    pub large_file_threshold: u64,
    pub concurrency: usize,
    pub large_concurrency: usize,
    #[serde(default)]
    pub staging_dir: Option<String>,
}

/// 连接协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Sftp,
    Local,
}

/// 列举时根目录不存在的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingRootPolicy {
    /// 返回空列表并记录警告
    #[default]
    Empty,
    /// 返回ListingError
    Error,
}

/// 单个命名连接的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub kind: ConnectionKind,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// 本地连接的根目录
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub missing_root: MissingRootPolicy,
}

impl ConnectionConfig {
    /// A local-directory endpoint with default transfer settings.
    pub fn local(root: impl Into<String>) -> Self {
        Self {
            kind: ConnectionKind::Local,
            host: None,
            port: default_port(),
            username: None,
            password: None,
            private_key: None,
            passphrase: None,
            root: Some(root.into()),
            chunk_size: default_chunk_size(),
            timeout_secs: default_timeout_secs(),
            missing_root: MissingRootPolicy::default(),
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub log: LogConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

impl AppConfig {
    /// 使用默认配置内容和环境变量初始化全局配置
    pub fn init(default_config: Option<&str>) -> Result<()> {
        let mut builder = Config::builder();

        if let Some(config_contents) = default_config {
            builder = builder.add_source(File::from_str(config_contents, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let mut w = BUILDER.write()?;
        *w = builder;

        Ok(())
    }

    /// 合并用户提供的配置文件
    pub fn merge_config(config_file: Option<&Path>) -> Result<()> {
        if let Some(config_file_path) = config_file {
            if !config_file_path.exists() {
                return Err(Error::new(format!(
                    "Config file not found: {}",
                    config_file_path.display()
                )));
            }

            let mut w = BUILDER.write()?;
            // 环境变量仍需优先于配置文件
            *w = w
                .clone()
                .add_source(File::from(config_file_path))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .prefix_separator("_")
                        .separator("__"),
                );
        }

        Ok(())
    }

    pub fn set(key: &str, value: &str) -> Result<()> {
        let mut w = BUILDER.write()?;
        *w = w.clone().set_override(key, value)?;

        Ok(())
    }

    pub fn get<'de, T>(key: &'de str) -> Result<T>
    where
        T: serde::Deserialize<'de>,
    {
        Ok(BUILDER.read()?.deref().clone().build()?.get::<T>(key)?)
    }

    pub fn fetch() -> Result<AppConfig> {
        let cfg = BUILDER.read()?.deref().clone().build()?;
        let app_config: AppConfig = cfg.try_deserialize()?;

        Ok(app_config)
    }

    /// 解析命名连接
    pub fn connection(&self, id: &str) -> Result<&ConnectionConfig> {
        self.connections
            .get(id)
            .ok_or_else(|| Error::new(format!("Unknown connection id: {}", id)))
    }
}
