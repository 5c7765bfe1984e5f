//! 消息快照缓存
//!
//! 单槽位：一个固定键保存最近一次完整的有序消息列表，每次写入整体覆盖。
//! 读取永远不向调用方抛出解析错误，槽位为空、损坏或不可读时都视为“没有数据”。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ChatterboxError, Result};
use crate::message::Message;
use crate::storage::KvStore;
use crate::utils::time::now_millis;

/// 持久化的快照记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    /// 写入时间（UTC 毫秒时间戳）
    pub saved_at: u64,
    pub messages: Vec<Message>,
}

/// 快照缓存
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// 序列化并整体覆盖槽位
    async fn save(&self, snapshot: &[Message]) -> Result<()>;

    /// 读取槽位，无数据时返回空列表
    async fn load(&self) -> Vec<Message>;
}

fn encode_snapshot(snapshot: &[Message]) -> Result<Vec<u8>> {
    let record = CachedSnapshot {
        saved_at: now_millis(),
        messages: snapshot.to_vec(),
    };
    serde_json::to_vec(&record)
        .map_err(|e| ChatterboxError::Serialization(format!("序列化消息快照失败: {}", e)))
}

fn decode_snapshot(bytes: &[u8]) -> Vec<Message> {
    match serde_json::from_slice::<CachedSnapshot>(bytes) {
        Ok(record) => record.messages,
        Err(e) => {
            warn!("消息快照已损坏，按无缓存处理: {}", e);
            Vec::new()
        }
    }
}

/// 基于 sled 的快照缓存
#[derive(Debug, Clone)]
pub struct KvMessageCache {
    kv: Arc<KvStore>,
    key: String,
}

impl KvMessageCache {
    pub fn new<S: Into<String>>(kv: Arc<KvStore>, key: S) -> Self {
        Self { kv, key: key.into() }
    }
}

#[async_trait]
impl SnapshotCache for KvMessageCache {
    async fn save(&self, snapshot: &[Message]) -> Result<()> {
        let bytes = encode_snapshot(snapshot)?;
        self.kv.set_raw(self.key.as_bytes(), bytes).await?;
        debug!("已缓存 {} 条消息", snapshot.len());
        Ok(())
    }

    async fn load(&self) -> Vec<Message> {
        match self.kv.get_raw(self.key.as_bytes()).await {
            Ok(Some(bytes)) => decode_snapshot(&bytes),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("读取消息快照失败，按无缓存处理: {}", e);
                Vec::new()
            }
        }
    }
}

/// 内存快照缓存（不落盘，进程退出即丢失）
///
/// 保存序列化后的字节，读写语义与持久化实现一致。
#[derive(Debug, Default)]
pub struct MemoryMessageCache {
    slot: RwLock<Option<Vec<u8>>>,
}

impl MemoryMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置快照
    pub fn with_messages(messages: &[Message]) -> Result<Self> {
        Ok(Self {
            slot: RwLock::new(Some(encode_snapshot(messages)?)),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }
}

#[async_trait]
impl SnapshotCache for MemoryMessageCache {
    async fn save(&self, snapshot: &[Message]) -> Result<()> {
        let bytes = encode_snapshot(snapshot)?;
        *self.slot.write() = Some(bytes);
        Ok(())
    }

    async fn load(&self) -> Vec<Message> {
        let bytes = self.slot.read().clone();
        bytes.map(|b| decode_snapshot(&b)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Attachment, Author};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn messages(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| Message {
                id: format!("m{}", i),
                text: Some(format!("hello {}", i)),
                created_at: Utc.timestamp_millis_opt(1_700_000_000_000 - i as i64 * 1000).unwrap(),
                author: Some(Author::new("u1", "Alice")),
                attachment: if i == 1 {
                    Attachment::location(1.0, 2.0)
                } else {
                    Attachment::NoAttachment
                },
                is_system_message: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_kv_cache_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::new(temp_dir.path()).await.unwrap());
        let cache = KvMessageCache::new(kv, "messages");

        assert!(cache.load().await.is_empty());

        let snapshot = messages(3);
        cache.save(&snapshot).await.unwrap();
        assert_eq!(cache.load().await, snapshot);

        // 再保存一次读出的结果，内容不变
        let loaded = cache.load().await;
        cache.save(&loaded).await.unwrap();
        assert_eq!(cache.load().await, snapshot);
    }

    #[tokio::test]
    async fn test_kv_cache_overwrites_whole_slot() {
        let temp_dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::new(temp_dir.path()).await.unwrap());
        let cache = KvMessageCache::new(kv, "messages");

        cache.save(&messages(5)).await.unwrap();
        cache.save(&messages(2)).await.unwrap();
        assert_eq!(cache.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_slot_loads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::new(temp_dir.path()).await.unwrap());
        kv.set_raw("messages", b"\x00garbage".to_vec()).await.unwrap();

        let cache = KvMessageCache::new(kv, "messages");
        assert!(cache.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_cache_round_trip() {
        let cache = MemoryMessageCache::new();
        assert!(cache.is_empty());
        assert!(cache.load().await.is_empty());

        let snapshot = messages(4);
        cache.save(&snapshot).await.unwrap();
        assert_eq!(cache.load().await, snapshot);

        let seeded = MemoryMessageCache::with_messages(&snapshot[..2]).unwrap();
        assert_eq!(seeded.load().await.len(), 2);
    }
}
