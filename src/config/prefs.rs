//! 偏好设置服务
//!
//! 按名称读写清理选项，变化通过广播通道通知订阅者。
//! 丢弃接收端即移除监听。clearNow 是一次性触发，不保存值。

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use super::CleanerConfig;

/// 变化通知通道容量
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// 偏好名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefName {
    ClearOnExit,
    ClearOnDownload,
    ClearOnInterval,
    ClearInterval,
    ClearDelay,
    /// 手动触发清理（一次性）
    ClearNow,
}

impl PrefName {
    /// 持有值的偏好
    pub const STORED: [PrefName; 5] = [
        PrefName::ClearOnExit,
        PrefName::ClearOnDownload,
        PrefName::ClearOnInterval,
        PrefName::ClearInterval,
        PrefName::ClearDelay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClearOnExit => "clearOnExit",
            Self::ClearOnDownload => "clearOnDownload",
            Self::ClearOnInterval => "clearOnInterval",
            Self::ClearInterval => "clearInterval",
            Self::ClearDelay => "clearDelay",
            Self::ClearNow => "clearNow",
        }
    }
}

impl fmt::Display for PrefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrefName {
    type Err = PrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clearOnExit" => Ok(Self::ClearOnExit),
            "clearOnDownload" => Ok(Self::ClearOnDownload),
            "clearOnInterval" => Ok(Self::ClearOnInterval),
            "clearInterval" => Ok(Self::ClearInterval),
            "clearDelay" => Ok(Self::ClearDelay),
            "clearNow" => Ok(Self::ClearNow),
            other => Err(PrefError::Unknown(other.to_string())),
        }
    }
}

/// 偏好值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefValue {
    Bool(bool),
    /// 分钟或秒，取决于偏好名称
    Number(u64),
}

impl PrefValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Bool(_) => None,
        }
    }
}

/// 偏好设置错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefError {
    #[error("未知的偏好: {0}")]
    Unknown(String),

    #[error("偏好 {name} 类型不匹配，期望 {expected}")]
    TypeMismatch {
        name: PrefName,
        expected: &'static str,
    },

    #[error("偏好 {0} 只能触发，不能赋值")]
    TriggerOnly(PrefName),
}

/// 偏好设置服务
pub struct PrefService {
    values: RwLock<CleanerConfig>,
    changes: broadcast::Sender<PrefName>,
}

impl PrefService {
    pub fn new(initial: CleanerConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(initial),
            changes,
        }
    }

    /// 当前全部取值
    pub fn snapshot(&self) -> CleanerConfig {
        self.values.read().clone()
    }

    /// 按名称读取，clearNow 没有值
    pub fn get(&self, name: PrefName) -> Option<PrefValue> {
        let values = self.values.read();
        match name {
            PrefName::ClearOnExit => Some(PrefValue::Bool(values.clear_on_exit)),
            PrefName::ClearOnDownload => Some(PrefValue::Bool(values.clear_on_download)),
            PrefName::ClearOnInterval => Some(PrefValue::Bool(values.clear_on_interval)),
            PrefName::ClearInterval => Some(PrefValue::Number(values.clear_interval_minutes)),
            PrefName::ClearDelay => Some(PrefValue::Number(values.clear_delay_secs)),
            PrefName::ClearNow => None,
        }
    }

    /// 按名称赋值，值未变化时不发通知
    pub fn set(&self, name: PrefName, value: PrefValue) -> Result<(), PrefError> {
        let changed = {
            let mut values = self.values.write();
            match name {
                PrefName::ClearOnExit => {
                    update(&mut values.clear_on_exit, bool_value(name, value)?)
                }
                PrefName::ClearOnDownload => {
                    update(&mut values.clear_on_download, bool_value(name, value)?)
                }
                PrefName::ClearOnInterval => {
                    update(&mut values.clear_on_interval, bool_value(name, value)?)
                }
                PrefName::ClearInterval => {
                    update(&mut values.clear_interval_minutes, number_value(name, value)?)
                }
                PrefName::ClearDelay => {
                    update(&mut values.clear_delay_secs, number_value(name, value)?)
                }
                PrefName::ClearNow => return Err(PrefError::TriggerOnly(name)),
            }
        };

        if changed {
            self.notify(name);
        }
        Ok(())
    }

    /// 整体替换，逐项比较并通知变化的偏好
    pub fn replace(&self, next: CleanerConfig) -> Vec<PrefName> {
        let changed: Vec<PrefName> = {
            let mut values = self.values.write();
            let changed = PrefName::STORED
                .iter()
                .copied()
                .filter(|name| match name {
                    PrefName::ClearOnExit => values.clear_on_exit != next.clear_on_exit,
                    PrefName::ClearOnDownload => values.clear_on_download != next.clear_on_download,
                    PrefName::ClearOnInterval => values.clear_on_interval != next.clear_on_interval,
                    PrefName::ClearInterval => {
                        values.clear_interval_minutes != next.clear_interval_minutes
                    }
                    PrefName::ClearDelay => values.clear_delay_secs != next.clear_delay_secs,
                    PrefName::ClearNow => false,
                })
                .collect();
            *values = next;
            changed
        };

        for name in &changed {
            self.notify(*name);
        }
        changed
    }

    /// 手动触发一次清理
    pub fn trigger_clear_now(&self) {
        self.notify(PrefName::ClearNow);
    }

    /// 订阅偏好变化
    pub fn subscribe(&self) -> broadcast::Receiver<PrefName> {
        self.changes.subscribe()
    }

    /// 当前监听者数量
    pub fn listener_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn notify(&self, name: PrefName) {
        if self.changes.send(name).is_err() {
            debug!("偏好 {} 变化无监听者", name);
        }
    }
}

fn update<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn bool_value(name: PrefName, value: PrefValue) -> Result<bool, PrefError> {
    value.as_bool().ok_or(PrefError::TypeMismatch {
        name,
        expected: "bool",
    })
}

fn number_value(name: PrefName, value: PrefValue) -> Result<u64, PrefError> {
    value.as_number().ok_or(PrefError::TypeMismatch {
        name,
        expected: "number",
    })
}
