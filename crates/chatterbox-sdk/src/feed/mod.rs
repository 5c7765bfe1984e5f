//! 远端消息源
//!
//! 远端是一个只追加的消息集合。订阅后先推送一次完整快照，之后每次集合变化
//! 再推送一次完整快照（不是增量）。订阅通过返回的 [`Subscription`] 取消，
//! 取消可重复调用。

pub mod memory;

pub use memory::MemoryFeed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

/// 远端原始记录：记录自身 ID + 字段表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub data: Map<String, Value>,
}

impl RawRecord {
    pub fn new<S: Into<String>>(id: S, data: Map<String, Value>) -> Self {
        Self { id: id.into(), data }
    }

    /// 由 JSON 对象构造，非对象时字段表为空
    pub fn from_json<S: Into<String>>(id: S, value: Value) -> Self {
        let data = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, data)
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// 有序查询
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuery {
    /// 集合名称
    pub collection: String,
    /// 排序字段
    pub order_by: String,
    pub direction: SortDirection,
}

impl FeedQuery {
    /// 按字段降序（最新的在前）
    pub fn newest_first<C: Into<String>, F: Into<String>>(collection: C, order_by: F) -> Self {
        Self {
            collection: collection.into(),
            order_by: order_by.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// 一次推送
#[derive(Debug, Clone, PartialEq)]
pub enum FeedDelivery {
    /// 当前完整快照
    Snapshot(Vec<RawRecord>),
    /// 订阅无法建立或已中断
    Failed(String),
}

/// 带订阅代次的推送，代次用于丢弃已取消订阅的迟到推送
pub type TaggedDelivery = (u64, FeedDelivery);

/// 推送入口（交给远端实现持有）
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    generation: u64,
    token: CancellationToken,
    sender: mpsc::UnboundedSender<TaggedDelivery>,
}

impl SnapshotSink {
    pub fn new(
        generation: u64,
        token: CancellationToken,
        sender: mpsc::UnboundedSender<TaggedDelivery>,
    ) -> Self {
        Self {
            generation,
            token,
            sender,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 推送完整快照，订阅已取消或接收端已关闭时返回 false
    pub fn deliver(&self, full: Vec<RawRecord>) -> bool {
        self.send(FeedDelivery::Snapshot(full))
    }

    /// 报告订阅失败
    pub fn fail<S: Into<String>>(&self, reason: S) -> bool {
        self.send(FeedDelivery::Failed(reason.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.sender.is_closed()
    }

    /// 供远端实现在后台任务中等待取消
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// 为本推送入口创建取消句柄
    pub fn subscription(&self) -> Subscription {
        Subscription::new(self.generation, self.token.clone())
    }

    fn send(&self, delivery: FeedDelivery) -> bool {
        if self.token.is_cancelled() {
            debug!("订阅 #{} 已取消，丢弃推送", self.generation);
            return false;
        }
        self.sender.send((self.generation, delivery)).is_ok()
    }
}

/// 取消回调
pub type CancelHook = Box<dyn FnOnce() + Send + Sync + 'static>;

/// 订阅取消句柄
///
/// `cancel` 可重复调用，只有第一次生效；句柄被丢弃时自动取消。
pub struct Subscription {
    generation: u64,
    token: CancellationToken,
    on_cancel: Option<CancelHook>,
}

impl Subscription {
    pub fn new(generation: u64, token: CancellationToken) -> Self {
        Self {
            generation,
            token,
            on_cancel: None,
        }
    }

    /// 取消时额外执行的清理（例如从远端注销监听），多次调用按顺序叠加
    pub fn with_cancel_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.on_cancel = Some(match self.on_cancel.take() {
            Some(previous) => Box::new(move || {
                previous();
                hook();
            }),
            None => Box::new(hook),
        });
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 取消订阅，返回本次调用是否真正执行了取消
    pub fn cancel(&mut self) -> bool {
        if self.token.is_cancelled() && self.on_cancel.is_none() {
            return false;
        }
        self.token.cancel();
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
        debug!("订阅 #{} 已取消", self.generation);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("generation", &self.generation)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// 远端消息源（由后端适配层实现）
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    /// 建立有序订阅；实现必须立即推送一次完整快照
    async fn subscribe(&self, query: &FeedQuery, sink: SnapshotSink) -> Result<Subscription>;

    /// 追加一条记录，返回远端分配的 ID
    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<String>;

    /// 开关远端网络访问（跟随连接状态）
    async fn set_network_enabled(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }
}
