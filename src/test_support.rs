//! 测试辅助：可记录调用、可注入故障的内存历史存储

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::history::{
    HistoryError, HistoryQuery, HistoryRecord, HistoryResult, HistoryStore,
};

/// 存储调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreCall {
    Query,
    RemovePage(String),
    RemovePages(Vec<String>),
    IsVisited(String),
}

#[derive(Default)]
pub(crate) struct RecordingStore {
    records: Mutex<Vec<HistoryRecord>>,
    calls: Mutex<Vec<(Instant, StoreCall)>>,
    /// uri -> 第几次轮询开始可见
    visible_after: Mutex<HashMap<String, u32>>,
    polls: Mutex<HashMap<String, u32>>,
    failing_removes: Mutex<HashSet<String>>,
    fail_queries: AtomicBool,
    fail_bulk: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn download_uri(index: usize) -> String {
        format!("https://downloads.example/file-{}.bin", index)
    }

    pub(crate) fn with_downloads(count: usize) -> Self {
        let store = Self::default();
        for i in 0..count {
            store.push_record(HistoryRecord::download(Self::download_uri(i)));
        }
        store
    }

    pub(crate) fn push_record(&self, record: HistoryRecord) {
        self.records.lock().push(record);
    }

    pub(crate) fn contains(&self, uri: &str) -> bool {
        self.records.lock().iter().any(|r| r.uri == uri)
    }

    /// 该 uri 在第 n 次轮询时变为可见（同时写入记录）
    pub(crate) fn visible_after(&self, uri: &str, polls: u32) {
        self.visible_after.lock().insert(uri.to_string(), polls);
        if !self.contains(uri) {
            self.push_record(HistoryRecord::download(uri));
        }
    }

    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_bulk(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_remove(&self, uri: &str) {
        self.failing_removes.lock().insert(uri.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    pub(crate) fn timed_calls(&self) -> Vec<(Instant, StoreCall)> {
        self.calls.lock().clone()
    }

    pub(crate) fn query_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Query))
            .count()
    }

    pub(crate) fn remove_page_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::RemovePage(uri) => Some(uri),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn remove_pages_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::RemovePages(uris) => Some(uris),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn poll_count(&self, uri: &str) -> u32 {
        self.polls.lock().get(uri).copied().unwrap_or(0)
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push((Instant::now(), call));
    }
}

#[async_trait]
impl HistoryStore for RecordingStore {
    async fn execute_query(&self, query: &HistoryQuery) -> HistoryResult<Vec<HistoryRecord>> {
        self.record(StoreCall::Query);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(HistoryError::Lock("injected".to_string()));
        }
        if query.transitions.is_empty() {
            return Err(HistoryError::InvalidQuery("empty".to_string()));
        }

        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| query.transitions.contains(&r.transition))
            .cloned()
            .collect())
    }

    async fn remove_page(&self, uri: &str) -> HistoryResult<()> {
        self.record(StoreCall::RemovePage(uri.to_string()));
        if self.failing_removes.lock().contains(uri) {
            return Err(HistoryError::Lock("injected".to_string()));
        }

        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.uri != uri);
        if records.len() == before {
            return Err(HistoryError::NotFound(uri.to_string()));
        }
        Ok(())
    }

    async fn remove_pages(&self, uris: &[String]) -> HistoryResult<()> {
        self.record(StoreCall::RemovePages(uris.to_vec()));
        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(HistoryError::Lock("injected".to_string()));
        }

        self.records.lock().retain(|r| !uris.contains(&r.uri));
        Ok(())
    }

    async fn is_visited(&self, uri: &str) -> HistoryResult<bool> {
        self.record(StoreCall::IsVisited(uri.to_string()));

        let poll = {
            let mut polls = self.polls.lock();
            let count = polls.entry(uri.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(threshold) = self.visible_after.lock().get(uri) {
            return Ok(poll >= *threshold);
        }
        Ok(self.contains(uri))
    }
}
