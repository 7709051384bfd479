// 配置管理模块

pub mod prefs;
pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

pub use prefs::{PrefError, PrefName, PrefService, PrefValue};
pub use watcher::{reload_cleaner_config, ConfigWatcher};

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 清理触发配置
    #[serde(default)]
    pub cleaner: CleanerConfig,
    /// 历史存储配置
    #[serde(default)]
    pub history: HistoryConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 定时清理间隔上限（分钟），一年
pub const MAX_CLEAR_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// 清理触发配置
///
/// 修改 clear_on_interval 或 clear_interval_minutes 任意一项都会完整重建定时器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// 退出时清理
    #[serde(default = "default_clear_on_exit")]
    pub clear_on_exit: bool,
    /// 每个下载完成后清理
    #[serde(default)]
    pub clear_on_download: bool,
    /// 定时清理
    #[serde(default)]
    pub clear_on_interval: bool,
    /// 定时清理间隔（分钟）
    #[serde(default = "default_clear_interval_minutes")]
    pub clear_interval_minutes: u64,
    /// 下载历史出现后延迟删除（秒），留给下载通知和"打开文件"提示的时间
    #[serde(default = "default_clear_delay_secs")]
    pub clear_delay_secs: u64,
}

fn default_clear_on_exit() -> bool {
    true
}

fn default_clear_interval_minutes() -> u64 {
    60
}

fn default_clear_delay_secs() -> u64 {
    5
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            clear_on_exit: default_clear_on_exit(),
            clear_on_download: false,
            clear_on_interval: false,
            clear_interval_minutes: default_clear_interval_minutes(),
            clear_delay_secs: default_clear_delay_secs(),
        }
    }
}

impl CleanerConfig {
    /// 定时清理周期
    ///
    /// 未启用、间隔为 0 或超过 [`MAX_CLEAR_INTERVAL_MINUTES`] 时返回 None
    pub fn interval_period(&self) -> Option<Duration> {
        if !self.clear_on_interval || !self.has_valid_interval() {
            return None;
        }
        self.clear_interval_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
    }

    /// 间隔是否在有效范围内
    pub fn has_valid_interval(&self) -> bool {
        (1..=MAX_CLEAR_INTERVAL_MINUTES).contains(&self.clear_interval_minutes)
    }

    /// 删除延迟
    pub fn clear_delay(&self) -> Duration {
        Duration::from_secs(self.clear_delay_secs)
    }
}

/// 历史存储配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// 历史数据库路径
    #[serde(default = "default_history_db_path")]
    pub db_path: PathBuf,
}

fn default_history_db_path() -> PathBuf {
    PathBuf::from("data/history.db")
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_history_db_path(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（按天滚动，即保留的文件数）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| format!("解析配置文件失败: {:?}", path))?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("创建配置目录失败: {:?}", parent))?;
            }
        }

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {:?}", path))?;

        info!("配置已保存: {:?}", path);
        Ok(())
    }

    /// 加载配置，失败时返回默认配置
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load_from_file(path).await {
            Ok(config) => {
                info!("已加载配置文件: {:?}", path);
                config
            }
            Err(e) => {
                warn!("加载配置失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
