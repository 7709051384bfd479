// Download History Cleaner Library
// 下载历史自动清理核心库

// 历史记录存储模块
pub mod history;

// 宿主下载列表模块
pub mod downloads;

// 配置与偏好设置模块
pub mod config;

// 日志模块
pub mod logging;

// 清理调度模块
pub mod cleaner;

#[cfg(test)]
mod test_support;

// 导出常用类型
pub use cleaner::{ActiveFlag, CorrelationOutcome, Correlator, HistoryCleaner, PendingCorrelation};
pub use config::{AppConfig, CleanerConfig, PrefName, PrefService, PrefValue};
pub use downloads::{DownloadDescriptor, DownloadEvent, DownloadHub, DownloadList};
pub use history::{
    DeleteReport, HistoryError, HistoryQuery, HistoryRecord, HistoryResult, HistoryStore,
    SqliteHistoryStore, Transition,
};
