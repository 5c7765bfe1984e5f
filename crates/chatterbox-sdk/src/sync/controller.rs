/// 同步控制器
///
/// 状态机：
/// - `Uninitialized | CacheOnly` + 在线 → `Subscribed`：先取消旧订阅，再按排序字段降序新建订阅
/// - `Subscribed | Uninitialized` + 离线 → `CacheOnly`：取消订阅，读取缓存快照并发布
/// - 状态未知时不做任何动作
/// - 销毁时无条件取消订阅
///
/// 所有方法都由会话 Actor 在同一个逻辑线程上按到达顺序调用，
/// 消息列表和缓存槽位只由本控制器修改。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ChatterboxError, Result};
use crate::events::{event_builders, EventManager, SnapshotSource};
use crate::feed::{
    FeedDelivery, FeedQuery, RawRecord, RemoteFeed, SnapshotSink, Subscription, TaggedDelivery,
};
use crate::message::{Message, OutgoingMessage};
use crate::network::Connectivity;
use crate::normalizer::{encode_outgoing, normalize_batch};
use crate::storage::SnapshotCache;
use crate::sync::SyncState;

/// 同步控制器
pub struct SyncController {
    /// 远端消息源
    feed: Arc<dyn RemoteFeed>,

    /// 本地快照缓存
    cache: Arc<dyn SnapshotCache>,

    /// 事件管理器（发布消息列表与提示）
    events: Arc<EventManager>,

    query: FeedQuery,
    state: SyncState,

    /// 最近一次收到的连接状态（含未知）
    connectivity: Connectivity,

    /// 最近一次明确的在线/离线信号，未知信号不会覆盖它
    last_definitive: Connectivity,

    /// 远端网络访问是否处于开启状态（远端初始为开启）
    network_enabled: bool,

    /// 唯一的订阅句柄，只在状态切换逻辑中设置/清除
    subscription: Option<Subscription>,

    /// 订阅代次，每次新建订阅递增
    generation: u64,

    delivery_sender: mpsc::UnboundedSender<TaggedDelivery>,

    /// 当前已发布的消息列表
    messages: Vec<Message>,
}

impl SyncController {
    /// 创建同步控制器
    ///
    /// 返回的接收端承载所有订阅的推送，调用方需按到达顺序交给 `handle_delivery`。
    pub fn new(
        feed: Arc<dyn RemoteFeed>,
        cache: Arc<dyn SnapshotCache>,
        events: Arc<EventManager>,
        query: FeedQuery,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedDelivery>) {
        let (delivery_sender, delivery_receiver) = mpsc::unbounded_channel();
        let controller = Self {
            feed,
            cache,
            events,
            query,
            state: SyncState::Uninitialized,
            connectivity: Connectivity::Unknown,
            last_definitive: Connectivity::Unknown,
            network_enabled: true,
            subscription: None,
            generation: 0,
            delivery_sender,
            messages: Vec::new(),
        };
        (controller, delivery_receiver)
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// 当前已发布的消息列表
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_active_subscription(&self) -> bool {
        self.subscription
            .as_ref()
            .map(|s| !s.is_cancelled())
            .unwrap_or(false)
    }

    /// 处理连接状态变化
    pub async fn handle_connectivity(&mut self, status: Connectivity) {
        let previous = self.connectivity;
        if previous != status {
            self.connectivity = status;
            info!("连接状态: {} → {}", previous, status);
            self.events
                .emit(event_builders::connectivity_changed(previous, status))
                .await;
        }

        match status {
            Connectivity::Unknown => {
                debug!("连接状态未知，保持当前数据源: {}", self.state);
            }
            Connectivity::Online => {
                self.last_definitive = Connectivity::Online;
                self.set_network_enabled(true).await;
                if self.state == SyncState::Subscribed && self.has_active_subscription() {
                    debug!("已处于实时订阅，忽略重复的在线信号");
                    return;
                }
                self.open_subscription().await;
            }
            Connectivity::Offline => {
                let was_offline = self.last_definitive == Connectivity::Offline;
                self.last_definitive = Connectivity::Offline;
                if was_offline && self.state == SyncState::CacheOnly {
                    debug!("已处于仅缓存状态，忽略重复的离线信号");
                    self.set_network_enabled(false).await;
                    return;
                }
                if !was_offline {
                    warn!("连接已断开，切换到本地缓存");
                    self.events.emit(event_builders::connection_lost()).await;
                }
                self.enter_cache_only().await;
                self.set_network_enabled(false).await;
            }
        }
    }

    /// 处理一次远端推送
    pub async fn handle_delivery(&mut self, generation: u64, delivery: FeedDelivery) {
        if generation != self.generation || self.state != SyncState::Subscribed {
            debug!(
                "丢弃过期推送: generation={}, current={}, state={}",
                generation, self.generation, self.state
            );
            return;
        }

        match delivery {
            FeedDelivery::Snapshot(records) => self.apply_snapshot(records).await,
            FeedDelivery::Failed(reason) => {
                warn!("远端订阅中断，回退到本地缓存: {}", reason);
                self.events
                    .emit(event_builders::subscription_failed(reason))
                    .await;
                self.enter_cache_only().await;
            }
        }
    }

    /// 发送消息（只转发给远端，不等待确认）
    ///
    /// 离线时拒绝发送；写入结果通过 `MessageSent` / `MessageSendFailed` 事件报告，失败不重试。
    pub fn send(&self, message: OutgoingMessage) -> Result<()> {
        if !self.connectivity.is_online() {
            return Err(ChatterboxError::NotConnected);
        }
        message.validate()?;

        let fields = encode_outgoing(&message);
        let feed = self.feed.clone();
        let events = self.events.clone();
        let collection = self.query.collection.clone();

        tokio::spawn(async move {
            match feed.insert(&collection, fields).await {
                Ok(message_id) => {
                    info!("消息已写入远端: {}", message_id);
                    events.emit(event_builders::message_sent(message_id)).await;
                }
                Err(e) => {
                    error!("消息写入失败: {}", e);
                    events
                        .emit(event_builders::message_send_failed(e.to_string()))
                        .await;
                }
            }
        });

        Ok(())
    }

    /// 销毁：无条件取消订阅
    pub async fn teardown(&mut self) {
        self.cancel_subscription();
        info!("同步控制器已关闭: state={}", self.state);
    }

    // ============================================================
    // 私有方法
    // ============================================================

    async fn open_subscription(&mut self) {
        self.cancel_subscription();

        self.generation += 1;
        let token = CancellationToken::new();
        let sink = SnapshotSink::new(self.generation, token.clone(), self.delivery_sender.clone());

        match self.feed.subscribe(&self.query, sink).await {
            Ok(subscription) => {
                info!(
                    "已订阅 {}（按 {} 降序）: #{}",
                    self.query.collection, self.query.order_by, self.generation
                );
                self.subscription = Some(subscription);
                self.state = SyncState::Subscribed;
            }
            Err(e) => {
                token.cancel();
                warn!("建立远端订阅失败，回退到本地缓存: {}", e);
                self.events
                    .emit(event_builders::subscription_failed(e.to_string()))
                    .await;
                self.enter_cache_only().await;
            }
        }
    }

    async fn enter_cache_only(&mut self) {
        self.cancel_subscription();
        let cached = self.cache.load().await;
        self.state = SyncState::CacheOnly;
        info!("使用本地缓存: {} 条消息", cached.len());
        self.publish(cached, SnapshotSource::Cache).await;
    }

    async fn apply_snapshot(&mut self, records: Vec<RawRecord>) {
        let batch = normalize_batch(&records);
        for rejected in batch.rejected {
            self.events
                .emit(event_builders::record_rejected(
                    rejected.record_id().to_string(),
                    rejected.to_string(),
                ))
                .await;
        }

        // 缓存写失败只影响下一次离线会话，不阻塞本次发布
        if let Err(e) = self.cache.save(&batch.messages).await {
            warn!("写入消息缓存失败: {}", e);
            self.events
                .emit(event_builders::cache_write_failed(e.to_string()))
                .await;
        }

        debug!("收到实时快照: {} 条消息", batch.messages.len());
        self.publish(batch.messages, SnapshotSource::Live).await;
    }

    async fn publish(&mut self, messages: Vec<Message>, source: SnapshotSource) {
        self.messages = messages;
        self.events
            .emit(event_builders::messages_published(self.messages.clone(), source))
            .await;
    }

    fn cancel_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            if subscription.cancel() {
                debug!("已取消订阅 #{}", subscription.generation());
            }
        }
    }

    /// 与远端网络开关不一致时才切换，失败时保留原状态以便下次重试
    async fn set_network_enabled(&mut self, enabled: bool) {
        if self.network_enabled == enabled {
            return;
        }
        match self.feed.set_network_enabled(enabled).await {
            Ok(()) => self.network_enabled = enabled,
            Err(e) => warn!("切换远端网络访问失败（enabled={}）: {}", enabled, e),
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.cancel_subscription();
    }
}
