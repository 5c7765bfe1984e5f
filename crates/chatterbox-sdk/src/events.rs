//! 事件系统模块 - 同步层对外发布的事件
//!
//! 功能包括：
//! - 消息列表发布（界面层的数据入口）
//! - 连接断开提示
//! - 缓存写入失败、记录被排除、订阅失败等诊断事件
//! - 发送结果
//! - 事件广播和订阅机制

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::message::Message;
use crate::network::Connectivity;
use crate::utils::time::now_millis;

/// 当前消息列表的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    /// 远端实时快照
    Live,
    /// 本地缓存
    Cache,
}

/// 同步事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 发布了新的完整消息列表
    MessagesPublished {
        messages: Vec<Message>,
        source: SnapshotSource,
        timestamp: u64,
    },
    /// 连接状态变化
    ConnectivityChanged {
        old_state: Connectivity,
        new_state: Connectivity,
        timestamp: u64,
    },
    /// 连接断开（每次进入离线只提示一次）
    ConnectionLost {
        timestamp: u64,
    },
    /// 写缓存失败（不影响本次展示）
    CacheWriteFailed {
        error: String,
        timestamp: u64,
    },
    /// 远端记录被排除
    RecordRejected {
        record_id: String,
        reason: String,
        timestamp: u64,
    },
    /// 远端订阅失败，已回退到缓存
    SubscriptionFailed {
        error: String,
        timestamp: u64,
    },
    /// 消息已写入远端
    MessageSent {
        message_id: String,
        timestamp: u64,
    },
    /// 消息写入被拒绝（不会自动重试）
    MessageSendFailed {
        error: String,
        timestamp: u64,
    },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::MessagesPublished { .. } => "messages_published",
            SyncEvent::ConnectivityChanged { .. } => "connectivity_changed",
            SyncEvent::ConnectionLost { .. } => "connection_lost",
            SyncEvent::CacheWriteFailed { .. } => "cache_write_failed",
            SyncEvent::RecordRejected { .. } => "record_rejected",
            SyncEvent::SubscriptionFailed { .. } => "subscription_failed",
            SyncEvent::MessageSent { .. } => "message_sent",
            SyncEvent::MessageSendFailed { .. } => "message_send_failed",
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> u64 {
        match self {
            SyncEvent::MessagesPublished { timestamp, .. }
            | SyncEvent::ConnectivityChanged { timestamp, .. }
            | SyncEvent::ConnectionLost { timestamp }
            | SyncEvent::CacheWriteFailed { timestamp, .. }
            | SyncEvent::RecordRejected { timestamp, .. }
            | SyncEvent::SubscriptionFailed { timestamp, .. }
            | SyncEvent::MessageSent { timestamp, .. }
            | SyncEvent::MessageSendFailed { timestamp, .. } => *timestamp,
        }
    }

    /// 是否需要提示用户
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SyncEvent::ConnectionLost { .. } | SyncEvent::MessageSendFailed { .. }
        )
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SyncEvent>,
    /// 事件监听器映射
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        // 无订阅者时 send 会失败，属正常场景（无 UI 的客户端），仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器（"*" 表示所有事件）
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));

        info!("Added listener for event type: {}", event_type);
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    pub fn messages_published(messages: Vec<Message>, source: SnapshotSource) -> SyncEvent {
        SyncEvent::MessagesPublished {
            messages,
            source,
            timestamp: now_millis(),
        }
    }

    pub fn connectivity_changed(old_state: Connectivity, new_state: Connectivity) -> SyncEvent {
        SyncEvent::ConnectivityChanged {
            old_state,
            new_state,
            timestamp: now_millis(),
        }
    }

    pub fn connection_lost() -> SyncEvent {
        SyncEvent::ConnectionLost {
            timestamp: now_millis(),
        }
    }

    pub fn cache_write_failed(error: String) -> SyncEvent {
        SyncEvent::CacheWriteFailed {
            error,
            timestamp: now_millis(),
        }
    }

    pub fn record_rejected(record_id: String, reason: String) -> SyncEvent {
        SyncEvent::RecordRejected {
            record_id,
            reason,
            timestamp: now_millis(),
        }
    }

    pub fn subscription_failed(error: String) -> SyncEvent {
        SyncEvent::SubscriptionFailed {
            error,
            timestamp: now_millis(),
        }
    }

    pub fn message_sent(message_id: String) -> SyncEvent {
        SyncEvent::MessageSent {
            message_id,
            timestamp: now_millis(),
        }
    }

    pub fn message_send_failed(error: String) -> SyncEvent {
        SyncEvent::MessageSendFailed {
            error,
            timestamp: now_millis(),
        }
    }
}
