//! 日志系统配置
//!
//! 支持控制台输出和文件持久化，按天滚动，超出保留天数的文件自动删除

use std::fs;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogConfig;

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "download-history-cleaner";

/// 时间戳格式
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 创建按天滚动的文件输出
fn build_file_appender(config: &LogConfig) -> Result<RollingFileAppender, String> {
    fs::create_dir_all(&config.log_dir)
        .map_err(|e| format!("创建日志目录失败: {:?}, 错误: {}", config.log_dir, e))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.retention_days.max(1) as usize)
        .build(&config.log_dir)
        .map_err(|e| format!("创建日志文件失败: {}", e))
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别。返回的守卫需要保持存活直到程序结束。
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(true);

    if !config.enabled {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();

        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    }

    let appender = match build_file_appender(config) {
        Ok(appender) => appender,
        Err(e) => {
            // 回退到只使用控制台输出
            eprintln!("{}，回退到仅控制台输出", e);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
            return LogGuard { _file_guard: None };
        }
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);

    // 文件输出层（不带 ANSI 颜色）
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}",
        config.log_dir, config.retention_days, config.level
    );

    LogGuard {
        _file_guard: Some(file_guard),
    }
}
