//! 配置文件监听
//!
//! 配置文件被修改后重新读取 [cleaner] 段，把变化的选项推给偏好设置服务

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use super::{AppConfig, PrefName, PrefService};

/// 重新读取配置文件并应用清理选项，返回变化的偏好
pub fn reload_cleaner_config(path: &Path, prefs: &PrefService) -> Result<Vec<PrefName>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {:?}", path))?;

    Ok(prefs.replace(config.cleaner))
}

/// 配置文件监听器，drop 即停止监听
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// 开始监听配置文件
    ///
    /// 监听的是所在目录（编辑器保存时常常是替换文件）
    pub fn spawn(path: PathBuf, prefs: Arc<PrefService>) -> Result<Self> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("配置文件路径无效: {:?}", path))?;

        let target = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("配置文件监听出错: {}", e);
                    return;
                }
            };

            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            if !event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                return;
            }

            match reload_cleaner_config(&target, &prefs) {
                Ok(changed) if !changed.is_empty() => {
                    let names: Vec<&str> = changed.iter().map(|n| n.as_str()).collect();
                    info!("配置文件已更新，变化的选项: {:?}", names);
                }
                Ok(_) => {}
                // 写入过程中可能读到半截文件，下一次事件会再读
                Err(e) => warn!("重新加载配置失败，保留当前设置: {:#}", e),
            }
        })
        .context("创建配置文件监听器失败")?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("监听配置目录失败: {:?}", dir))?;

        info!("已开始监听配置文件: {:?}", path);
        Ok(Self {
            path,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
