//! 进程内下载列表
//!
//! 宿主通过 add / update 上报下载，订阅者通过广播通道收到事件

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{DownloadDescriptor, DownloadEvent, DownloadList};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 进程内下载列表
pub struct DownloadHub {
    /// 事件发送端
    events: broadcast::Sender<DownloadEvent>,
    /// 最近下载（按 ID）
    downloads: DashMap<String, DownloadDescriptor>,
    /// 已收尾的下载 ID
    finalized: DashSet<String>,
}

impl DownloadHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            downloads: DashMap::new(),
            finalized: DashSet::new(),
        }
    }

    /// 上报新增下载
    pub fn add(&self, download: DownloadDescriptor) {
        self.downloads.insert(download.id.clone(), download.clone());
        self.publish(DownloadEvent::Added(download));
    }

    /// 上报下载状态变化
    pub fn update(&self, download: DownloadDescriptor) {
        self.downloads.insert(download.id.clone(), download.clone());
        self.publish(DownloadEvent::Changed(download));
    }

    fn publish(&self, event: DownloadEvent) {
        // 没有订阅者时发送失败，属于正常情况
        if self.events.send(event).is_err() {
            debug!("下载事件无订阅者，已忽略");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.downloads.contains_key(id)
    }

    pub fn is_finalized(&self, id: &str) -> bool {
        self.finalized.contains(id)
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for DownloadHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownloadList for DownloadHub {
    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    async fn finalize(&self, download: &DownloadDescriptor) -> Result<()> {
        if !download.is_finished() {
            return Err(anyhow!("下载尚未结束，无法收尾: {}", download.id));
        }
        self.finalized.insert(download.id.clone());
        Ok(())
    }

    async fn remove(&self, download: &DownloadDescriptor) -> Result<()> {
        if self.downloads.remove(&download.id).is_some() {
            debug!("已从下载列表移除: {}", download.source_url);
        }
        self.finalized.remove(&download.id);
        Ok(())
    }

    async fn remove_finished(&self) -> Result<usize> {
        let finished: Vec<String> = self
            .downloads
            .iter()
            .filter(|entry| entry.value().is_finished())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &finished {
            self.downloads.remove(id);
            self.finalized.remove(id);
        }

        if !finished.is_empty() {
            info!("已从下载列表移除 {} 个已结束的下载", finished.len());
        }
        Ok(finished.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let hub = DownloadHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        let download = DownloadDescriptor::new("https://example.com/a.zip");
        hub.add(download.clone());
        hub.update(download.clone().into_succeeded());

        assert_eq!(rx.recv().await.unwrap(), DownloadEvent::Added(download.clone()));
        let changed = rx.recv().await.unwrap();
        assert!(changed.descriptor().succeeded);

        drop(rx);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = DownloadHub::new();
        hub.add(DownloadDescriptor::new("https://example.com/a.zip"));
        assert_eq!(hub.len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_requires_finished() {
        let hub = DownloadHub::new();
        let download = DownloadDescriptor::new("https://example.com/a.zip");
        hub.add(download.clone());

        assert!(hub.finalize(&download).await.is_err());

        let done = download.into_succeeded();
        hub.update(done.clone());
        hub.finalize(&done).await.unwrap();
        assert!(hub.is_finalized(&done.id));
    }

    #[tokio::test]
    async fn test_remove_and_remove_finished() {
        let hub = DownloadHub::new();
        let running = DownloadDescriptor::new("https://example.com/running.zip");
        let done = DownloadDescriptor::new("https://example.com/done.zip").into_succeeded();
        let canceled = DownloadDescriptor::new("https://example.com/c.zip").into_canceled(true);
        hub.add(running.clone());
        hub.add(done.clone());
        hub.add(canceled.clone());

        assert_eq!(hub.remove_finished().await.unwrap(), 2);
        assert!(hub.contains(&running.id));
        assert!(!hub.contains(&done.id));

        hub.remove(&running).await.unwrap();
        assert!(hub.is_empty());
    }
}
