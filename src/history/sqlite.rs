//! 历史记录 SQLite 存储
//!
//! 表结构与浏览器 places 数据库一致的最小子集：
//! - places: 每个 URI 一行
//! - visits: 每次访问一行，visit_type 即访问类型
//!
//! rusqlite 调用是阻塞的，异步接口统一放到 spawn_blocking 中执行

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{HistoryError, HistoryQuery, HistoryRecord, HistoryResult, HistoryStore, Transition};

/// SQLite 历史存储
pub struct SqliteHistoryStore {
    /// SQLite 连接
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// 打开（或创建）历史数据库
    pub fn new(db_path: &Path) -> HistoryResult<Self> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_tables()?;

        info!("历史数据库已打开: {:?}", db_path);
        Ok(store)
    }

    /// 内存数据库，仅用于测试和嵌入场景
    pub fn open_in_memory() -> HistoryResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn lock(&self) -> HistoryResult<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    /// 在阻塞线程池中使用连接
    async fn with_conn<T, F>(&self, f: F) -> HistoryResult<T>
    where
        F: FnOnce(&mut Connection) -> HistoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_conn(&conn)?;
            f(&mut *guard)
        })
        .await?
    }

    /// 初始化数据库表
    fn init_tables(&self) -> HistoryResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS places (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT,
                visit_count INTEGER NOT NULL DEFAULT 0,
                last_visit_date INTEGER
            );
            CREATE TABLE IF NOT EXISTS visits (
                id INTEGER PRIMARY KEY,
                place_id INTEGER NOT NULL REFERENCES places(id),
                visit_date INTEGER NOT NULL,
                visit_type INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_visits_type ON visits(visit_type, visit_date);
            CREATE INDEX IF NOT EXISTS idx_visits_place ON visits(place_id);
            "#,
        )?;

        Ok(())
    }

    /// 写入一次访问（宿主侧写入接口）
    ///
    /// visit_date 为微秒时间戳，None 表示当前时间
    pub fn add_visit(
        &self,
        uri: &str,
        transition: Transition,
        visit_date: Option<i64>,
    ) -> HistoryResult<()> {
        if uri.is_empty() {
            return Err(HistoryError::InvalidUri(uri.to_string()));
        }

        let visit_date = visit_date.unwrap_or_else(|| Utc::now().timestamp_micros());
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO places (url, visit_count) VALUES (?1, 0)",
            params![uri],
        )?;
        let place_id: i64 =
            tx.query_row("SELECT id FROM places WHERE url = ?1", params![uri], |row| {
                row.get(0)
            })?;
        tx.execute(
            "INSERT INTO visits (place_id, visit_date, visit_type) VALUES (?1, ?2, ?3)",
            params![place_id, visit_date, transition.code()],
        )?;
        tx.execute(
            r#"
            UPDATE places
            SET visit_count = visit_count + 1,
                last_visit_date = MAX(COALESCE(last_visit_date, 0), ?2)
            WHERE id = ?1
            "#,
            params![place_id, visit_date],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// 页面总数
    pub fn page_count(&self) -> HistoryResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM places", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 在事务内删除单个页面，返回是否存在
    fn remove_place(tx: &rusqlite::Transaction<'_>, uri: &str) -> HistoryResult<bool> {
        let place_id: Option<i64> = tx
            .query_row("SELECT id FROM places WHERE url = ?1", params![uri], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(place_id) = place_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM visits WHERE place_id = ?1", params![place_id])?;
        tx.execute("DELETE FROM places WHERE id = ?1", params![place_id])?;
        Ok(true)
    }
}

fn lock_conn(conn: &Mutex<Connection>) -> HistoryResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| HistoryError::Lock(e.to_string()))
}

/// 按访问类型查询，按页面去重，按最后一次匹配访问时间排序
fn query_by_transitions(
    conn: &Connection,
    transitions: &[Transition],
) -> HistoryResult<Vec<HistoryRecord>> {
    let placeholders = vec!["?"; transitions.len()].join(", ");
    let sql = format!(
        r#"
        SELECT p.url, v.visit_type, MAX(v.visit_date) AS last_date
        FROM places p
        JOIN visits v ON v.place_id = p.id
        WHERE v.visit_type IN ({})
        GROUP BY p.id
        ORDER BY last_date ASC, p.id ASC
        "#,
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(transitions.iter().map(|t| t.code())),
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
    )?;

    let mut records = Vec::new();
    for row in rows {
        let (uri, code) = row?;
        let transition = Transition::from_code(code)
            .ok_or_else(|| HistoryError::InvalidQuery(format!("未知的访问类型: {}", code)))?;
        records.push(HistoryRecord { uri, transition });
    }
    Ok(records)
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn execute_query(&self, query: &HistoryQuery) -> HistoryResult<Vec<HistoryRecord>> {
        if query.transitions.is_empty() {
            return Err(HistoryError::InvalidQuery(
                "至少需要一个访问类型过滤条件".to_string(),
            ));
        }

        let transitions = query.transitions.clone();
        let records = self
            .with_conn(move |conn| query_by_transitions(conn, &transitions))
            .await?;

        debug!("历史查询返回 {} 条记录", records.len());
        Ok(records)
    }

    async fn remove_page(&self, uri: &str) -> HistoryResult<()> {
        let owned = uri.to_string();
        let existed = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let existed = Self::remove_place(&tx, &owned)?;
                tx.commit()?;
                Ok(existed)
            })
            .await?;

        if existed {
            debug!("已删除历史页面: {}", uri);
            Ok(())
        } else {
            Err(HistoryError::NotFound(uri.to_string()))
        }
    }

    async fn remove_pages(&self, uris: &[String]) -> HistoryResult<()> {
        let requested = uris.len();
        let owned = uris.to_vec();
        let removed = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = 0usize;
                for uri in &owned {
                    if Self::remove_place(&tx, uri)? {
                        removed += 1;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;

        debug!("批量删除历史页面: 请求 {} 个，实际删除 {} 个", requested, removed);
        Ok(())
    }

    async fn is_visited(&self, uri: &str) -> HistoryResult<bool> {
        let owned = uri.to_string();
        self.with_conn(move |conn| {
            let visited = conn
                .query_row(
                    r#"
                    SELECT 1 FROM places p
                    WHERE p.url = ?1
                      AND EXISTS (SELECT 1 FROM visits v WHERE v.place_id = p.id)
                    "#,
                    params![owned],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            Ok(visited)
        })
        .await
    }
}
