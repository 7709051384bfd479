//! 下载历史查询

use tracing::{debug, warn};

use super::{HistoryQuery, HistoryRecord, HistoryStore};

/// 查询所有下载类型的历史记录
///
/// 每次调用反映存储的当前状态。查询构造、执行或遍历任一环节失败时
/// 返回空列表，本次清理直接放弃。
pub async fn query_download_history<S>(store: &S) -> Vec<HistoryRecord>
where
    S: HistoryStore + ?Sized,
{
    let query = HistoryQuery::downloads();

    match store.execute_query(&query).await {
        Ok(records) => {
            debug!("查询到 {} 条下载历史", records.len());
            records
        }
        Err(e) => {
            warn!("查询下载历史失败，放弃本次清理: {}", e);
            Vec::new()
        }
    }
}
