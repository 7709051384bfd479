//! 下载与历史记录关联
//!
//! 下载完成通知和历史写入是宿主上两个独立调度的异步操作，先后顺序没有保证。
//! 因此下载结束后需要轮询历史存储，等记录可见后再延迟删除。
//!
//! ## 状态流转
//!
//! ```text
//! 下载结束 ──finalize──▶ 轮询(1) ──不可见──▶ 等 1 秒 ──▶ 轮询(2) ... 轮询(5) ──不可见──▶ 放弃
//!                          │
//!                          └──可见──▶ 等 clear_delay ──▶ 移出下载列表 + 删除历史
//! ```
//!
//! 每次关联都带着所属运行周期的取消令牌。停止后令牌被取消，等待中的步骤立即退出，
//! 之后再次启动也不会恢复上一周期的关联。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PrefService;
use crate::downloads::{DownloadDescriptor, DownloadList};
use crate::history::{delete_records, HistoryRecord, HistoryStore};

/// 最大轮询次数
pub const MAX_VISIT_POLLS: u32 = 5;

/// 两次轮询之间的间隔
pub const VISIT_POLL_DELAY: Duration = Duration::from_secs(1);

/// 单个下载的重试上下文
///
/// 不可变，每次重试生成新值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCorrelation {
    /// 对应的下载
    pub download: DownloadDescriptor,
    /// 当前是第几次轮询（从 1 开始）
    pub attempt: u32,
}

/// 一次轮询后的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// 历史记录已可见
    Found(DownloadDescriptor),
    /// 等待后重试
    Retry(PendingCorrelation),
    /// 重试次数用尽
    Exhausted(DownloadDescriptor),
}

impl PendingCorrelation {
    pub fn new(download: DownloadDescriptor) -> Self {
        Self {
            download,
            attempt: 1,
        }
    }

    /// 根据本次轮询结果决定下一步
    pub fn on_poll(self, visible: bool) -> PollStep {
        if visible {
            PollStep::Found(self.download)
        } else if self.attempt < MAX_VISIT_POLLS {
            PollStep::Retry(Self {
                attempt: self.attempt + 1,
                download: self.download,
            })
        } else {
            PollStep::Exhausted(self.download)
        }
    }
}

/// 关联结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// 已删除历史记录
    Removed,
    /// 历史记录始终不可见，放弃
    Abandoned,
    /// 已停止，丢弃
    Cancelled,
    /// 下载收尾失败
    Failed,
}

/// 下载历史关联器
#[derive(Clone)]
pub struct Correlator {
    store: Arc<dyn HistoryStore>,
    downloads: Arc<dyn DownloadList>,
    prefs: Arc<PrefService>,
}

impl Correlator {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        downloads: Arc<dyn DownloadList>,
        prefs: Arc<PrefService>,
    ) -> Self {
        Self {
            store,
            downloads,
            prefs,
        }
    }

    /// 处理一个已结束的下载，直到删除、放弃或被取消
    pub async fn correlate(
        &self,
        download: DownloadDescriptor,
        cancel: &CancellationToken,
    ) -> CorrelationOutcome {
        if cancel.is_cancelled() {
            return CorrelationOutcome::Cancelled;
        }
        if download.source_url.is_empty() {
            warn!("下载没有来源地址，跳过: {}", download.id);
            return CorrelationOutcome::Failed;
        }

        if let Err(e) = self.downloads.finalize(&download).await {
            debug!("下载收尾失败: {}, 错误: {:#}", download.source_url, e);
            return CorrelationOutcome::Failed;
        }

        let mut pending = PendingCorrelation::new(download);
        let download = loop {
            if cancel.is_cancelled() {
                return CorrelationOutcome::Cancelled;
            }

            let visible = self.poll(&pending).await;
            match pending.on_poll(visible) {
                PollStep::Found(download) => break download,
                PollStep::Retry(next) => {
                    if !wait(VISIT_POLL_DELAY, cancel).await {
                        debug!("轮询等待中被取消: {}", next.download.source_url);
                        return CorrelationOutcome::Cancelled;
                    }
                    pending = next;
                }
                PollStep::Exhausted(download) => {
                    debug!(
                        "{} 次轮询后仍未找到历史记录，放弃: {}",
                        MAX_VISIT_POLLS, download.source_url
                    );
                    return CorrelationOutcome::Abandoned;
                }
            }
        };

        // 延迟删除，避免下载通知 / 打开文件提示被提前移除
        let delay = self.prefs.snapshot().clear_delay();
        if !wait(delay, cancel).await || cancel.is_cancelled() {
            debug!("延迟删除被取消: {}", download.source_url);
            return CorrelationOutcome::Cancelled;
        }

        self.remove_entry(&download).await;
        CorrelationOutcome::Removed
    }

    /// 查询历史记录是否可见，存储出错视为不可见
    async fn poll(&self, pending: &PendingCorrelation) -> bool {
        let uri = &pending.download.source_url;
        match self.store.is_visited(uri).await {
            Ok(visible) => {
                debug!("第 {} 次轮询 {}: 可见={}", pending.attempt, uri, visible);
                visible
            }
            Err(e) => {
                debug!("第 {} 次轮询 {} 失败: {}", pending.attempt, uri, e);
                false
            }
        }
    }

    async fn remove_entry(&self, download: &DownloadDescriptor) {
        if let Err(e) = self.downloads.remove(download).await {
            warn!("从下载列表移除失败: {}, 错误: {:#}", download.source_url, e);
        }

        let report = delete_records(
            self.store.as_ref(),
            &[HistoryRecord::download(download.source_url.clone())],
        )
        .await;

        if report.removed > 0 {
            info!("已删除下载历史: {}", download.source_url);
        }
    }
}

/// 等待指定时长，被取消时返回 false
async fn wait(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
