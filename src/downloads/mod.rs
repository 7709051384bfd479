//! 宿主下载列表
//!
//! - DownloadDescriptor: 宿主跟踪的单个下载
//! - DownloadEvent: 新增 / 状态变化事件
//! - DownloadList: 下载列表抽象（事件订阅、收尾、移除）

pub mod hub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub use hub::DownloadHub;

/// 下载描述
///
/// 由宿主创建，本系统只读
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDescriptor {
    /// 下载 ID
    pub id: String,
    /// 下载来源 URI
    pub source_url: String,
    /// 是否成功完成
    pub succeeded: bool,
    /// 是否已取消
    pub canceled: bool,
    /// 是否已停止
    pub stopped: bool,
}

impl DownloadDescriptor {
    /// 新建一个进行中的下载
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_url: source_url.into(),
            succeeded: false,
            canceled: false,
            stopped: false,
        }
    }

    /// 标记为成功完成
    pub fn into_succeeded(mut self) -> Self {
        self.succeeded = true;
        self.stopped = true;
        self
    }

    /// 标记为已取消
    pub fn into_canceled(mut self, stopped: bool) -> Self {
        self.canceled = true;
        self.stopped = stopped;
        self
    }

    /// 是否已结束（成功，或取消且已停止）
    pub fn is_finished(&self) -> bool {
        self.succeeded || (self.canceled && self.stopped)
    }
}

/// 下载事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// 新增下载（可能已经完成）
    Added(DownloadDescriptor),
    /// 下载状态变化
    Changed(DownloadDescriptor),
}

impl DownloadEvent {
    pub fn descriptor(&self) -> &DownloadDescriptor {
        match self {
            Self::Added(d) | Self::Changed(d) => d,
        }
    }

    pub fn into_descriptor(self) -> DownloadDescriptor {
        match self {
            Self::Added(d) | Self::Changed(d) => d,
        }
    }
}

/// 宿主下载列表
#[async_trait]
pub trait DownloadList: Send + Sync {
    /// 订阅下载事件，丢弃接收端即取消订阅
    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent>;

    /// 下载收尾
    async fn finalize(&self, download: &DownloadDescriptor) -> anyhow::Result<()>;

    /// 从列表中移除单个下载
    async fn remove(&self, download: &DownloadDescriptor) -> anyhow::Result<()>;

    /// 移除所有已结束的下载，返回移除数量
    async fn remove_finished(&self) -> anyhow::Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_states() {
        let download = DownloadDescriptor::new("https://example.com/a.zip");
        assert!(!download.is_finished());

        assert!(download.clone().into_succeeded().is_finished());
        assert!(download.clone().into_canceled(true).is_finished());
        // 取消但尚未停止，仍视为进行中
        assert!(!download.into_canceled(false).is_finished());
    }

    #[test]
    fn test_event_descriptor() {
        let download = DownloadDescriptor::new("https://example.com/a.zip");
        let event = DownloadEvent::Changed(download.clone());
        assert_eq!(event.descriptor(), &download);
        assert_eq!(event.into_descriptor(), download);
    }
}
