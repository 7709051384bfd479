//! 下载历史清理器
//!
//! 根据偏好设置在以下时机删除下载历史：
//! - 单个下载结束后（等历史记录可见，再延迟删除）
//! - 固定间隔
//! - 手动触发
//! - 程序退出前
//!
//! 每次 `start` 开启一个新的运行周期，周期内派生的关联任务都持有该周期的取消令牌。
//! `shutdown` 取消令牌并清除运行标志，之后的回调全部变为空操作，再次 `start` 也不会恢复它们。

pub mod correlator;
mod interval;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PrefName, PrefService, MAX_CLEAR_INTERVAL_MINUTES};
use crate::downloads::{DownloadEvent, DownloadList};
use crate::history::{delete_records, query_download_history, DeleteReport, HistoryStore};

pub use correlator::{CorrelationOutcome, Correlator, PendingCorrelation, PollStep};
use interval::IntervalTimer;

/// 运行标志
///
/// 由清理器和它派生的所有延迟任务共享
#[derive(Debug, Clone, Default)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 置位，原本未置位时返回 true
    pub fn try_set(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 触发器句柄
#[derive(Default)]
struct TriggerState {
    /// 定时清理（最多一个）
    interval_timer: Option<IntervalTimer>,
    /// 下载事件监听任务
    download_listener: Option<JoinHandle<()>>,
    /// 偏好变化监听任务
    pref_listener: Option<JoinHandle<()>>,
}

struct CleanerInner {
    store: Arc<dyn HistoryStore>,
    downloads: Arc<dyn DownloadList>,
    prefs: Arc<PrefService>,
    active: ActiveFlag,
    /// 当前运行周期的取消令牌
    run_token: Mutex<CancellationToken>,
    correlator: Correlator,
    triggers: Mutex<TriggerState>,
    /// 正在关联的下载：下载 ID -> 关联序号
    pending: DashMap<String, u64>,
    next_correlation: AtomicU64,
}

/// 下载历史清理器
///
/// 可克隆，克隆体共享同一份状态。监听任务只持有弱引用。
#[derive(Clone)]
pub struct HistoryCleaner {
    inner: Arc<CleanerInner>,
}

impl HistoryCleaner {
    /// 创建清理器（未启动）
    pub fn new<S, D>(store: Arc<S>, downloads: Arc<D>, prefs: Arc<PrefService>) -> Self
    where
        S: HistoryStore + 'static,
        D: DownloadList + 'static,
    {
        let store: Arc<dyn HistoryStore> = store;
        let downloads: Arc<dyn DownloadList> = downloads;
        let correlator = Correlator::new(store.clone(), downloads.clone(), prefs.clone());

        Self {
            inner: Arc::new(CleanerInner {
                store,
                downloads,
                prefs,
                active: ActiveFlag::new(),
                run_token: Mutex::new(CancellationToken::new()),
                correlator,
                triggers: Mutex::new(TriggerState::default()),
                pending: DashMap::new(),
                next_correlation: AtomicU64::new(0),
            }),
        }
    }

    /// 启动：订阅偏好变化，按当前设置挂载下载监听和定时器
    pub fn start(&self) {
        {
            let mut run_token = self.inner.run_token.lock();
            if !self.inner.active.try_set() {
                warn!("历史清理器已在运行，忽略重复启动");
                return;
            }
            *run_token = CancellationToken::new();
        }

        let rx = self.inner.prefs.subscribe();
        let handle = tokio::spawn(run_pref_listener(Arc::downgrade(&self.inner), rx));
        self.inner.triggers.lock().pref_listener = Some(handle);

        self.sync_download_listener();
        self.rearm_interval_timer();

        let config = self.inner.prefs.snapshot();
        info!(
            "历史清理器已启动: 退出时清理={}, 下载后清理={}, 定时清理={} (间隔 {} 分钟), 延迟={} 秒",
            config.clear_on_exit,
            config.clear_on_download,
            config.clear_on_interval,
            config.clear_interval_minutes,
            config.clear_delay_secs
        );
    }

    /// 停止：清除运行标志，取消本周期的关联任务和所有触发器
    pub fn shutdown(&self) {
        {
            let run_token = self.inner.run_token.lock();
            self.inner.active.clear();
            run_token.cancel();
        }

        let mut triggers = self.inner.triggers.lock();
        if let Some(timer) = triggers.interval_timer.take() {
            timer.cancel();
        }
        if let Some(handle) = triggers.download_listener.take() {
            handle.abort();
        }
        if let Some(handle) = triggers.pref_listener.take() {
            handle.abort();
        }
        drop(triggers);

        let dropped = self.inner.pending.len();
        self.inner.pending.clear();
        info!("历史清理器已停止，丢弃 {} 个等待中的关联", dropped);
    }

    /// 处理偏好变化
    pub async fn handle_pref_change(&self, name: PrefName) {
        debug!("偏好变化: {}", name);
        match name {
            PrefName::ClearOnDownload => self.sync_download_listener(),
            PrefName::ClearOnInterval | PrefName::ClearInterval => self.rearm_interval_timer(),
            PrefName::ClearNow => {
                self.clear_now().await;
            }
            // 使用时再读取
            PrefName::ClearOnExit | PrefName::ClearDelay => {}
        }
    }

    /// 手动清理，不受其他设置影响
    pub async fn clear_now(&self) -> DeleteReport {
        info!("手动清理下载历史");
        self.clear_download_history().await
    }

    /// 程序退出前调用
    ///
    /// 开启了退出时清理才执行，返回 None 表示未执行
    pub async fn quit_application_granted(&self) -> Option<DeleteReport> {
        if !self.inner.active.is_set() {
            return None;
        }
        if !self.inner.prefs.snapshot().clear_on_exit {
            debug!("退出时清理未开启");
            return None;
        }

        info!("程序退出，清理下载历史");
        Some(self.clear_download_history().await)
    }

    /// 处理一个下载事件
    ///
    /// 只处理已结束的下载，同一个下载在关联期间的重复事件被忽略
    pub fn handle_download_event(&self, event: DownloadEvent) {
        let download = event.into_descriptor();
        if !download.is_finished() {
            return;
        }
        let cancel = {
            let run_token = self.inner.run_token.lock();
            if !self.inner.active.is_set() {
                return;
            }
            run_token.child_token()
        };

        let seq = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
        match self.inner.pending.entry(download.id.clone()) {
            Entry::Occupied(_) => {
                debug!("下载已在关联中，忽略重复事件: {}", download.source_url);
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(seq);
            }
        }

        let cleaner = self.clone();
        tokio::spawn(async move {
            let id = download.id.clone();
            let url = download.source_url.clone();
            let outcome = cleaner.inner.correlator.correlate(download, &cancel).await;
            // 只移除自己的登记，停止后重新启动的同一下载不受影响
            cleaner.inner.pending.remove_if(&id, |_, owner| *owner == seq);
            debug!("下载历史关联结束: {}, 结果: {:?}", url, outcome);
        });
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.is_set()
    }

    /// 当前定时器周期，未启动定时器时为 None
    pub fn interval_period(&self) -> Option<Duration> {
        self.inner
            .triggers
            .lock()
            .interval_timer
            .as_ref()
            .map(|timer| timer.period())
    }

    pub fn is_listening_downloads(&self) -> bool {
        self.inner.triggers.lock().download_listener.is_some()
    }

    /// 正在关联的下载数量
    pub fn pending_correlations(&self) -> usize {
        self.inner.pending.len()
    }

    /// 按 clearOnDownload 挂载或卸载下载监听
    fn sync_download_listener(&self) {
        let enabled = self.inner.active.is_set() && self.inner.prefs.snapshot().clear_on_download;
        let mut triggers = self.inner.triggers.lock();

        match (enabled, triggers.download_listener.is_some()) {
            (true, false) => {
                let rx = self.inner.downloads.subscribe();
                let handle =
                    tokio::spawn(run_download_listener(Arc::downgrade(&self.inner), rx));
                triggers.download_listener = Some(handle);
                info!("已开始监听下载事件");
            }
            (false, true) => {
                if let Some(handle) = triggers.download_listener.take() {
                    handle.abort();
                }
                info!("已停止监听下载事件");
            }
            _ => {}
        }
    }

    /// 取消当前定时器，按最新设置重新启动
    fn rearm_interval_timer(&self) {
        let config = self.inner.prefs.snapshot();
        let mut triggers = self.inner.triggers.lock();

        if let Some(timer) = triggers.interval_timer.take() {
            debug!("取消定时清理，原间隔 {:?}", timer.period());
            timer.cancel();
        }

        if !self.inner.active.is_set() || !config.clear_on_interval {
            return;
        }
        let Some(period) = config.interval_period() else {
            warn!(
                "定时清理间隔无效: {} 分钟（有效范围 1..={}），不启动定时器",
                config.clear_interval_minutes, MAX_CLEAR_INTERVAL_MINUTES
            );
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        triggers.interval_timer = Some(IntervalTimer::arm(period, move || {
            let weak = weak.clone();
            async move {
                if let Some(cleaner) = upgrade(&weak) {
                    cleaner.on_interval_tick().await;
                }
            }
        }));

        info!(
            "定时清理已启动，间隔: {} 分钟",
            config.clear_interval_minutes
        );
    }

    async fn on_interval_tick(&self) {
        if !self.inner.active.is_set() {
            return;
        }
        info!("定时清理下载历史");
        self.clear_download_history().await;
    }

    /// 全量清理：移除已结束的下载，查询并删除全部下载历史
    async fn clear_download_history(&self) -> DeleteReport {
        if let Err(e) = self.inner.downloads.remove_finished().await {
            warn!("移除已结束的下载失败: {:#}", e);
        }

        let records = query_download_history(self.inner.store.as_ref()).await;
        if records.is_empty() {
            debug!("没有需要清理的下载历史");
        }
        delete_records(self.inner.store.as_ref(), &records).await
    }
}

fn upgrade(weak: &Weak<CleanerInner>) -> Option<HistoryCleaner> {
    weak.upgrade().map(|inner| HistoryCleaner { inner })
}

/// 偏好变化监听循环
async fn run_pref_listener(weak: Weak<CleanerInner>, mut rx: broadcast::Receiver<PrefName>) {
    loop {
        match rx.recv().await {
            Ok(name) => {
                let Some(cleaner) = upgrade(&weak) else { break };
                cleaner.handle_pref_change(name).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("偏好变化通知积压，丢失 {} 条，重新同步触发器", skipped);
                let Some(cleaner) = upgrade(&weak) else { break };
                cleaner.sync_download_listener();
                cleaner.rearm_interval_timer();
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// 下载事件监听循环
async fn run_download_listener(weak: Weak<CleanerInner>, mut rx: broadcast::Receiver<DownloadEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Some(cleaner) = upgrade(&weak) else { break };
                cleaner.handle_download_event(event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("下载事件积压，丢失 {} 条", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
