//! 浏览历史模块
//!
//! 该模块负责与宿主历史存储交互，包括：
//! - 历史记录类型：URI + 访问类型（transition）
//! - 存储抽象：查询 / 单条删除 / 批量删除 / 异步存在性检查
//! - 下载历史查询与批量删除策略
//!
//! ## 设计原则
//!
//! 1. **尽力而为**: 清理只是后台维护任务，任何存储错误都不向调用方传播
//! 2. **不越界**: 查询必须带访问类型过滤，空过滤条件直接拒绝，绝不误删普通浏览记录

pub mod deleter;
pub mod query;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use deleter::{delete_records, DeleteReport, BULK_DELETE_THRESHOLD};
pub use query::query_download_history;
pub use sqlite::SqliteHistoryStore;

/// 访问类型
///
/// 数值与宿主 visit_type 列一致，下载为 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// 点击链接
    Link,
    /// 地址栏输入
    Typed,
    /// 书签
    Bookmark,
    /// 内嵌资源
    Embed,
    /// 永久重定向
    RedirectPermanent,
    /// 临时重定向
    RedirectTemporary,
    /// 下载
    Download,
    /// 框架内链接
    FramedLink,
    /// 重新加载
    Reload,
}

impl Transition {
    /// 转换为存储层数值
    pub fn code(self) -> i64 {
        match self {
            Self::Link => 1,
            Self::Typed => 2,
            Self::Bookmark => 3,
            Self::Embed => 4,
            Self::RedirectPermanent => 5,
            Self::RedirectTemporary => 6,
            Self::Download => 7,
            Self::FramedLink => 8,
            Self::Reload => 9,
        }
    }

    /// 从存储层数值解析
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Link),
            2 => Some(Self::Typed),
            3 => Some(Self::Bookmark),
            4 => Some(Self::Embed),
            5 => Some(Self::RedirectPermanent),
            6 => Some(Self::RedirectTemporary),
            7 => Some(Self::Download),
            8 => Some(Self::FramedLink),
            9 => Some(Self::Reload),
            _ => None,
        }
    }
}

/// 历史记录
///
/// 由存储持有，本系统只引用不修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// 资源 URI
    pub uri: String,
    /// 访问类型
    pub transition: Transition,
}

impl HistoryRecord {
    pub fn new(uri: impl Into<String>, transition: Transition) -> Self {
        Self {
            uri: uri.into(),
            transition,
        }
    }

    /// 下载类型的历史记录
    pub fn download(uri: impl Into<String>) -> Self {
        Self::new(uri, Transition::Download)
    }
}

/// 历史查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// 访问类型过滤（不能为空）
    pub transitions: Vec<Transition>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加访问类型过滤
    pub fn with_transition(mut self, transition: Transition) -> Self {
        if !self.transitions.contains(&transition) {
            self.transitions.push(transition);
        }
        self
    }

    /// 仅查询下载记录
    pub fn downloads() -> Self {
        Self::new().with_transition(Transition::Download)
    }
}

/// 历史存储错误
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("获取数据库锁失败: {0}")]
    Lock(String),

    #[error("后台任务失败: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("无效的查询: {0}")]
    InvalidQuery(String),

    #[error("无效的 URI: {0:?}")]
    InvalidUri(String),

    #[error("历史记录不存在: {0}")]
    NotFound(String),
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

/// 宿主历史存储
///
/// 所有调用都可能失败，调用方负责降级处理
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 执行查询，返回扁平、有序的结果
    ///
    /// 任意一行读取失败则整个查询失败，不返回部分结果
    async fn execute_query(&self, query: &HistoryQuery) -> HistoryResult<Vec<HistoryRecord>>;

    /// 删除单个页面（连同其全部访问记录）
    async fn remove_page(&self, uri: &str) -> HistoryResult<()>;

    /// 批量删除页面
    async fn remove_pages(&self, uris: &[String]) -> HistoryResult<()>;

    /// 该 URI 是否已有访问记录
    ///
    /// 历史写入可能晚于下载完成事件，调用方需要轮询
    async fn is_visited(&self, uri: &str) -> HistoryResult<bool>;
}
