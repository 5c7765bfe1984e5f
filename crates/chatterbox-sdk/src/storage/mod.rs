//! 存储模块 - 本地持久化层
//!
//! - KvStore: 基于 sled 的设备级键值存储
//! - SnapshotCache: 消息快照缓存（单槽位，整体覆盖）

pub mod kv;
pub mod message_cache;

pub use kv::KvStore;
pub use message_cache::{CachedSnapshot, KvMessageCache, MemoryMessageCache, SnapshotCache};

/// 缓存键常量
pub mod cache_keys {
    /// 消息快照（全设备唯一槽位）
    pub const MESSAGES: &str = "messages";
}
