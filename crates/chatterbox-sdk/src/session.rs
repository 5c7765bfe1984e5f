//! 聊天会话 Actor
//!
//! 核心设计：
//! - 同步控制器只存在于一个专用任务中
//! - 连接状态变化、远端推送和外部命令都在这个任务里按到达顺序处理
//! - 外部通过 channel 发送命令，不持有控制器的任何锁
//! - 会话被丢弃或关闭时取消订阅

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChatterboxConfig;
use crate::error::{ChatterboxError, Result};
use crate::events::{EventManager, SyncEvent};
use crate::feed::{RemoteFeed, TaggedDelivery};
use crate::message::{Message, OutgoingMessage};
use crate::network::{Connectivity, ConnectivityEvent, ConnectivityMonitor};
use crate::storage::{KvMessageCache, KvStore, SnapshotCache};
use crate::sync::{SyncController, SyncState};
use crate::version::version_summary;

/// 会话命令
pub enum SessionCommand {
    /// 发送消息
    Send {
        message: OutgoingMessage,
        respond_to: oneshot::Sender<Result<()>>,
    },

    /// 获取当前已发布的消息列表
    Messages {
        respond_to: oneshot::Sender<Vec<Message>>,
    },

    /// 获取同步状态与连接状态
    State {
        respond_to: oneshot::Sender<(SyncState, Connectivity)>,
    },

    /// 关闭会话
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// 聊天会话
pub struct ChatSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: Arc<EventManager>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// 启动会话
    ///
    /// 返回前已按当前连接状态完成第一次数据源选择：离线时缓存快照已发布，
    /// 在线时订阅已建立，首个快照由会话任务随后处理。
    pub async fn start(
        config: ChatterboxConfig,
        feed: Arc<dyn RemoteFeed>,
        cache: Arc<dyn SnapshotCache>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        config.validate()?;
        info!("启动聊天会话: {}", version_summary());
        if config.debug_mode {
            debug!("会话配置: {:?}", config);
        }

        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let (mut controller, deliveries) =
            SyncController::new(feed, cache, events.clone(), config.feed_query());

        // 先订阅再读取当前状态，避免漏掉两者之间的变化
        let connectivity = monitor.subscribe();
        let initial = monitor.get_status().await;
        controller.handle_connectivity(initial).await;

        let (commands, command_receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            controller,
            command_receiver,
            connectivity,
            monitor,
            deliveries,
        ));

        Ok(Self {
            commands,
            events,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// 使用 `config.data_dir` 下的 sled 缓存启动会话
    pub async fn open(
        config: ChatterboxConfig,
        feed: Arc<dyn RemoteFeed>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Self> {
        config.validate()?;
        let kv = Arc::new(KvStore::new(&config.data_dir).await?);
        let cache: Arc<dyn SnapshotCache> =
            Arc::new(KvMessageCache::new(kv, config.cache_key.clone()));
        Self::start(config, feed, cache, monitor).await
    }

    /// 注册消息列表发布回调
    ///
    /// 回调在会话任务中同步执行，只接收注册之后的发布；当前列表用 [`ChatSession::messages`] 获取。
    pub async fn on_messages<F>(&self, callback: F)
    where
        F: Fn(&[Message]) + Send + Sync + 'static,
    {
        self.events
            .add_listener("messages_published", move |event| {
                if let SyncEvent::MessagesPublished { messages, .. } = event {
                    callback(messages);
                }
            })
            .await;
    }

    /// 当前已发布的消息列表（最新的在前）
    pub async fn messages(&self) -> Result<Vec<Message>> {
        let (respond_to, response) = oneshot::channel();
        self.request(SessionCommand::Messages { respond_to })?;
        response.await.map_err(|_| session_closed())
    }

    pub async fn state(&self) -> Result<SyncState> {
        Ok(self.status().await?.0)
    }

    pub async fn connectivity(&self) -> Result<Connectivity> {
        Ok(self.status().await?.1)
    }

    /// 发送消息（仅在线时可用，写入结果通过事件报告）
    pub async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let (respond_to, response) = oneshot::channel();
        self.request(SessionCommand::Send { message, respond_to })?;
        response.await.map_err(|_| session_closed())?
    }

    /// 订阅会话事件
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// 关闭会话：取消订阅并等待会话任务退出，可重复调用
    pub async fn shutdown(&self) -> Result<()> {
        let task = self.task.lock().take();
        let task = match task {
            Some(task) => task,
            None => return Ok(()),
        };

        let (respond_to, response) = oneshot::channel();
        if self.request(SessionCommand::Shutdown { respond_to }).is_ok() {
            let _ = response.await;
        }
        if let Err(e) = task.await {
            warn!("会话任务异常退出: {}", e);
        }
        info!("聊天会话已关闭");
        Ok(())
    }

    // ===== 私有方法 =====

    async fn status(&self) -> Result<(SyncState, Connectivity)> {
        let (respond_to, response) = oneshot::channel();
        self.request(SessionCommand::State { respond_to })?;
        response.await.map_err(|_| session_closed())
    }

    fn request(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| session_closed())
    }
}

fn session_closed() -> ChatterboxError {
    ChatterboxError::ShuttingDown("聊天会话已关闭".to_string())
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("running", &!self.commands.is_closed())
            .finish()
    }
}

/// 会话任务主循环
async fn run_session(
    mut controller: SyncController,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    mut connectivity: broadcast::Receiver<ConnectivityEvent>,
    monitor: Arc<ConnectivityMonitor>,
    mut deliveries: mpsc::UnboundedReceiver<TaggedDelivery>,
) {
    let mut monitor_open = true;

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(SessionCommand::Shutdown { respond_to }) => {
                    controller.teardown().await;
                    let _ = respond_to.send(());
                    break;
                }
                Some(command) => handle_command(&controller, command),
                None => {
                    debug!("会话句柄已释放");
                    controller.teardown().await;
                    break;
                }
            },

            event = connectivity.recv(), if monitor_open => match event {
                Ok(event) => controller.handle_connectivity(event.new_status).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // 只关心最新状态
                    warn!("连接状态事件积压，跳过 {} 条", skipped);
                    let status = monitor.get_status().await;
                    controller.handle_connectivity(status).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("连接状态监控已关闭，保持当前数据源");
                    monitor_open = false;
                }
            },

            Some((generation, delivery)) = deliveries.recv() => {
                controller.handle_delivery(generation, delivery).await;
            }
        }
    }
}

fn handle_command(controller: &SyncController, command: SessionCommand) {
    match command {
        SessionCommand::Send { message, respond_to } => {
            let _ = respond_to.send(controller.send(message));
        }
        SessionCommand::Messages { respond_to } => {
            let _ = respond_to.send(controller.messages().to_vec());
        }
        SessionCommand::State { respond_to } => {
            let _ = respond_to.send((controller.state(), controller.connectivity()));
        }
        SessionCommand::Shutdown { respond_to } => {
            let _ = respond_to.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{MemoryFeed, RawRecord};
    use crate::message::Author;
    use crate::network::test_helpers::ScriptedConnectivityListener;
    use crate::storage::MemoryMessageCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn record(id: &str, seconds: i64) -> RawRecord {
        RawRecord::from_json(id, json!({
            "text": format!("hello {}", id),
            "createdAt": {"seconds": seconds, "nanoseconds": 0},
            "user": {"_id": "u2", "name": "Bob"},
        }))
    }

    fn feed_with(count: i64) -> MemoryFeed {
        let feed = MemoryFeed::new();
        for i in 1..=count {
            feed.put_record("messages", record(&format!("m{}", i), 1_700_000_000 + i));
        }
        feed
    }

    fn test_config(dir: &TempDir) -> ChatterboxConfig {
        ChatterboxConfig::builder().data_dir(dir.path()).build()
    }

    /// 轮询直到会话发布的消息数达到预期
    async fn wait_for_count(session: &ChatSession, expected: usize) -> Vec<Message> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let messages = session.messages().await.unwrap();
                if messages.len() == expected {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for publish")
    }

    async fn wait_for_state(session: &ChatSession, expected: SyncState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while session.state().await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for state");
    }

    #[tokio::test]
    async fn test_online_session_follows_remote_feed() {
        let dir = TempDir::new().unwrap();
        let feed = feed_with(3);
        let monitor = Arc::new(ConnectivityMonitor::manual());
        monitor.set_status(Connectivity::Online).await;

        let session = ChatSession::start(
            test_config(&dir),
            Arc::new(feed.clone()),
            Arc::new(MemoryMessageCache::new()),
            monitor,
        )
        .await
        .unwrap();

        let messages = wait_for_count(&session, 3).await;
        assert_eq!(messages[0].id, "m3");
        assert_eq!(session.state().await.unwrap(), SyncState::Subscribed);

        feed.put_record("messages", record("m4", 1_800_000_000));
        let messages = wait_for_count(&session, 4).await;
        assert_eq!(messages[0].id, "m4");

        session.shutdown().await.unwrap();
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_connectivity_changes_switch_sources() {
        let dir = TempDir::new().unwrap();
        let feed = feed_with(2);
        let cache = Arc::new(MemoryMessageCache::new());
        let monitor = Arc::new(ConnectivityMonitor::manual());

        let session = ChatSession::start(
            test_config(&dir),
            Arc::new(feed.clone()),
            cache.clone(),
            monitor.clone(),
        )
        .await
        .unwrap();
        assert_eq!(session.state().await.unwrap(), SyncState::Uninitialized);
        assert!(session.messages().await.unwrap().is_empty());

        monitor.set_status(Connectivity::Online).await;
        wait_for_count(&session, 2).await;
        assert_eq!(cache.load().await.len(), 2);

        monitor.set_status(Connectivity::Offline).await;
        wait_for_state(&session, SyncState::CacheOnly).await;
        assert_eq!(feed.active_subscriptions(), 0);
        assert_eq!(session.messages().await.unwrap().len(), 2);
        assert_eq!(session.connectivity().await.unwrap(), Connectivity::Offline);

        monitor.set_status(Connectivity::Online).await;
        wait_for_state(&session, SyncState::Subscribed).await;
        assert_eq!(feed.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_offline_start_reads_sled_cache() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let monitor = Arc::new(ConnectivityMonitor::manual());
            monitor.set_status(Connectivity::Online).await;
            let session = ChatSession::open(config.clone(), Arc::new(feed_with(3)), monitor)
                .await
                .unwrap();
            wait_for_count(&session, 3).await;
            session.shutdown().await.unwrap();
        }

        let monitor = Arc::new(ConnectivityMonitor::manual());
        monitor.set_status(Connectivity::Offline).await;
        let feed = MemoryFeed::new();
        let session = ChatSession::open(config, Arc::new(feed.clone()), monitor).await.unwrap();

        let messages = session.messages().await.unwrap();
        assert_eq!(
            messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m3", "m2", "m1"]
        );
        assert_eq!(session.state().await.unwrap(), SyncState::CacheOnly);
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_on_messages_callback_and_send() {
        let dir = TempDir::new().unwrap();
        let feed = MemoryFeed::new();
        let monitor = Arc::new(ConnectivityMonitor::manual());
        monitor.set_status(Connectivity::Online).await;

        let session = ChatSession::start(
            test_config(&dir),
            Arc::new(feed.clone()),
            Arc::new(MemoryMessageCache::new()),
            monitor.clone(),
        )
        .await
        .unwrap();

        let publishes = Arc::new(AtomicUsize::new(0));
        let counter = publishes.clone();
        session
            .on_messages(move |messages| {
                if !messages.is_empty() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        // 等待首个（空）快照处理完
        wait_for_state(&session, SyncState::Subscribed).await;

        let mut events = session.events();
        let author = Author::new("u1", "Alice");
        assert_ok!(session.send(OutgoingMessage::text(author.clone(), "hello")).await);

        let messages = wait_for_count(&session, 1).await;
        assert_eq!(messages[0].text.as_deref(), Some("hello"));
        assert_eq!(feed.record_count("messages"), 1);
        assert!(publishes.load(Ordering::SeqCst) >= 1);

        let sent = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(SyncEvent::MessageSent { message_id, .. }) = events.recv().await {
                    return message_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(sent, messages[0].id);

        monitor.set_status(Connectivity::Offline).await;
        wait_for_state(&session, SyncState::CacheOnly).await;
        let result = session.send(OutgoingMessage::text(author, "offline")).await;
        assert!(matches!(result, Err(ChatterboxError::NotConnected)));
    }

    #[tokio::test]
    async fn test_platform_listener_drives_session() {
        let dir = TempDir::new().unwrap();
        let feed = feed_with(1);
        let listener = Arc::new(ScriptedConnectivityListener::new(Connectivity::Offline));
        let monitor = Arc::new(ConnectivityMonitor::new(listener.clone()));
        monitor.start().await.unwrap();

        let session = ChatSession::start(
            test_config(&dir),
            Arc::new(feed.clone()),
            Arc::new(MemoryMessageCache::new()),
            monitor.clone(),
        )
        .await
        .unwrap();
        assert_eq!(session.state().await.unwrap(), SyncState::CacheOnly);

        listener.report(Connectivity::Online).await;
        wait_for_count(&session, 1).await;
        assert_eq!(feed.active_subscriptions(), 1);

        monitor.stop().await;
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_and_drop_cancel_subscription() {
        let dir = TempDir::new().unwrap();
        let feed = feed_with(1);
        let monitor = Arc::new(ConnectivityMonitor::manual());
        monitor.set_status(Connectivity::Online).await;

        let session = ChatSession::start(
            test_config(&dir),
            Arc::new(feed.clone()),
            Arc::new(MemoryMessageCache::new()),
            monitor.clone(),
        )
        .await
        .unwrap();
        wait_for_count(&session, 1).await;

        session.shutdown().await.unwrap();
        session.shutdown().await.unwrap();
        assert_eq!(feed.active_subscriptions(), 0);
        assert_err!(session.messages().await);

        let session = ChatSession::start(
            test_config(&dir),
            Arc::new(feed.clone()),
            Arc::new(MemoryMessageCache::new()),
            monitor,
        )
        .await
        .unwrap();
        assert_eq!(feed.active_subscriptions(), 1);
        drop(session);

        tokio::time::timeout(Duration::from_secs(2), async {
            while feed.active_subscriptions() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscription not cancelled after drop");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = ChatterboxConfig::builder()
            .data_dir(dir.path())
            .collection("  ")
            .build();

        let result = ChatSession::start(
            config,
            Arc::new(MemoryFeed::new()),
            Arc::new(MemoryMessageCache::new()),
            Arc::new(ConnectivityMonitor::manual()),
        )
        .await;
        assert!(matches!(result, Err(ChatterboxError::Config(_))));
    }
}
