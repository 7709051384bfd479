//! 批量删除策略
//!
//! 记录数超过阈值时一次批量删除，否则逐条删除。
//! 批量删除有固定开销，小批量逐条删除更轻。

use tracing::{debug, info, warn};

use super::{HistoryRecord, HistoryStore};

/// 批量删除阈值，记录数严格大于该值才走批量删除
pub const BULK_DELETE_THRESHOLD: usize = 10;

/// 单次删除的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// 请求删除的记录数
    pub requested: usize,
    /// 成功删除数
    pub removed: usize,
    /// 失败数
    pub failed: usize,
    /// 是否走了批量删除
    pub bulk: bool,
}

/// 删除一组历史记录
///
/// 不向调用方返回错误：
/// - 逐条删除时单条失败（如记录已不存在）只计数，继续删除后续记录
/// - 批量删除失败则整批放弃
pub async fn delete_records<S>(store: &S, records: &[HistoryRecord]) -> DeleteReport
where
    S: HistoryStore + ?Sized,
{
    let mut report = DeleteReport {
        requested: records.len(),
        ..Default::default()
    };

    if records.is_empty() {
        return report;
    }

    if records.len() > BULK_DELETE_THRESHOLD {
        report.bulk = true;
        let uris: Vec<String> = records.iter().map(|r| r.uri.clone()).collect();

        match store.remove_pages(&uris).await {
            Ok(()) => report.removed = uris.len(),
            Err(e) => {
                warn!("批量删除 {} 条历史记录失败: {}", uris.len(), e);
                report.failed = uris.len();
            }
        }
    } else {
        for record in records {
            match store.remove_page(&record.uri).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    debug!("删除历史记录失败，跳过: {}, 错误: {}", record.uri, e);
                    report.failed += 1;
                }
            }
        }
    }

    if report.removed > 0 {
        info!(
            "已删除 {} 条下载历史（请求 {} 条，失败 {} 条，批量: {}）",
            report.removed, report.requested, report.failed, report.bulk
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingStore, StoreCall};
    use proptest::prelude::*;

    fn downloads(n: usize) -> Vec<HistoryRecord> {
        (0..n)
            .map(|i| HistoryRecord::download(RecordingStore::download_uri(i)))
            .collect()
    }

    #[tokio::test]
    async fn test_fifteen_records_use_one_bulk_call_in_order() {
        let store = RecordingStore::with_downloads(15);
        let records = downloads(15);

        let report = delete_records(&store, &records).await;

        let expected: Vec<String> = records.iter().map(|r| r.uri.clone()).collect();
        assert_eq!(store.calls(), vec![StoreCall::RemovePages(expected)]);
        assert!(report.bulk);
        assert_eq!(report.removed, 15);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_three_records_use_single_calls_in_order() {
        let store = RecordingStore::with_downloads(3);
        let records = downloads(3);

        let report = delete_records(&store, &records).await;

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::RemovePage(RecordingStore::download_uri(0)),
                StoreCall::RemovePage(RecordingStore::download_uri(1)),
                StoreCall::RemovePage(RecordingStore::download_uri(2)),
            ]
        );
        assert!(!report.bulk);
        assert_eq!(report.removed, 3);
    }

    #[tokio::test]
    async fn test_exactly_threshold_uses_single_calls() {
        let store = RecordingStore::with_downloads(BULK_DELETE_THRESHOLD);

        let report = delete_records(&store, &downloads(BULK_DELETE_THRESHOLD)).await;

        assert!(!report.bulk);
        assert_eq!(store.remove_page_calls().len(), BULK_DELETE_THRESHOLD);
        assert!(store.remove_pages_calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort_siblings() {
        let store = RecordingStore::with_downloads(3);
        store.fail_remove(&RecordingStore::download_uri(1));

        let report = delete_records(&store, &downloads(3)).await;

        assert_eq!(store.remove_page_calls().len(), 3);
        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 1);
        assert!(store.contains(&RecordingStore::download_uri(1)));
    }

    #[tokio::test]
    async fn test_already_deleted_record_is_swallowed() {
        // 存储中只有 1 条，但请求删除 2 条
        let store = RecordingStore::with_downloads(1);

        let report = delete_records(&store, &downloads(2)).await;

        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_bulk_failure_aborts_batch() {
        let store = RecordingStore::with_downloads(12);
        store.fail_bulk(true);

        let report = delete_records(&store, &downloads(12)).await;

        assert!(report.bulk);
        assert_eq!(report.removed, 0);
        assert_eq!(report.failed, 12);
        assert_eq!(store.remove_pages_calls().len(), 1);
        assert!(store.remove_page_calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_issues_no_calls() {
        let store = RecordingStore::with_downloads(0);

        let report = delete_records(&store, &[]).await;

        assert_eq!(report, DeleteReport::default());
        assert!(store.calls().is_empty());
    }

    proptest! {
        #[test]
        fn prop_call_shape_follows_threshold(n in 0usize..40) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let store = RecordingStore::with_downloads(n);
            runtime.block_on(delete_records(&store, &downloads(n)));

            if n > BULK_DELETE_THRESHOLD {
                prop_assert_eq!(store.remove_pages_calls().len(), 1);
                prop_assert_eq!(store.remove_page_calls().len(), 0);
            } else {
                prop_assert_eq!(store.remove_pages_calls().len(), 0);
                prop_assert_eq!(store.remove_page_calls().len(), n);
            }
        }
    }
}
