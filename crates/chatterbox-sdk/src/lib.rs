//! Chatterbox SDK - 离线优先的单房间聊天同步内核
//!
//! 本 SDK 负责聊天界面背后的数据层：
//! - 📡 跟随连接状态在远端实时订阅与本地缓存之间切换
//! - 🔁 任何时刻最多一个存活订阅，离线/销毁时立即取消
//! - 🧹 把远端原始记录规范化为统一的消息模型，坏记录单独排除
//! - 💾 每次实时快照写穿到设备本地缓存，离线时展示最近一次快照
//! - ⚙️ 事件系统：消息发布、连接提示、缓存与发送结果
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatterbox_sdk::{
//!     Author, ChatSession, ChatterboxConfig, Connectivity, ConnectivityMonitor, MemoryFeed,
//!     OutgoingMessage,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChatterboxConfig::builder()
//!         .data_dir("/path/to/data")
//!         .build();
//!
//!     let monitor = Arc::new(ConnectivityMonitor::manual());
//!     monitor.set_status(Connectivity::Online).await;
//!
//!     let session = ChatSession::open(config, Arc::new(MemoryFeed::new()), monitor).await?;
//!
//!     session
//!         .on_messages(|messages| println!("共 {} 条消息", messages.len()))
//!         .await;
//!
//!     session
//!         .send(OutgoingMessage::text(Author::new("u1", "Alice"), "你好"))
//!         .await?;
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod message;
pub mod network;
pub mod normalizer;
pub mod session;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{ChatterboxConfig, ChatterboxConfigBuilder};
pub use error::{ChatterboxError, NormalizeError, Result};
pub use events::{EventManager, SnapshotSource, SyncEvent};
pub use feed::{
    FeedDelivery, FeedQuery, MemoryFeed, RawRecord, RemoteFeed, SnapshotSink, Subscription,
};
pub use message::{
    upload_reference, Attachment, Author, Coordinates, Message, MessageKind, OutgoingMessage,
};
pub use network::{Connectivity, ConnectivityEvent, ConnectivityListener, ConnectivityMonitor};
pub use normalizer::{normalize, normalize_batch, NormalizedBatch};
pub use session::ChatSession;
pub use storage::{KvMessageCache, KvStore, MemoryMessageCache, SnapshotCache};
pub use sync::{SyncController, SyncState};
pub use version::{version_summary, SDK_VERSION};
