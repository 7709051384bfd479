use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use download_history_cleaner::{
    config::{ConfigWatcher, LogConfig},
    logging, AppConfig, DownloadHub, HistoryCleaner, PrefService, SqliteHistoryStore,
};
use tracing::{info, warn};

/// 配置文件路径
const CONFIG_PATH: &str = "config/app.toml";

/// 加载日志配置
///
/// 尝试从配置文件加载，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先加载日志配置，失败时使用默认配置
    let log_config = load_log_config().await;

    // 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&log_config);

    info!("Download History Cleaner v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(CONFIG_PATH).await;

    let store = Arc::new(
        SqliteHistoryStore::new(&config.history.db_path)
            .with_context(|| format!("打开历史数据库失败: {:?}", config.history.db_path))?,
    );

    let downloads = Arc::new(DownloadHub::new());
    let prefs = Arc::new(PrefService::new(config.cleaner.clone()));

    // 配置文件修改后热更新清理选项
    let _watcher = match ConfigWatcher::spawn(PathBuf::from(CONFIG_PATH), prefs.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("配置文件监听启动失败，修改配置需要重启: {:#}", e);
            None
        }
    };

    let cleaner = HistoryCleaner::new(store, downloads, prefs);
    cleaner.start();

    tokio::signal::ctrl_c()
        .await
        .context("等待退出信号失败")?;
    info!("收到 Ctrl+C，开始退出...");

    if let Some(report) = cleaner.quit_application_granted().await {
        info!("退出前清理完成，删除 {} 条下载历史", report.removed);
    }

    cleaner.shutdown();
    info!("应用已安全退出");

    Ok(())
}
