//! 网络连接状态
//!
//! 平台层（Android/iOS/桌面）上报三态连接状态，SDK 只读取其变化。
//! 平台报告之前状态为 `Unknown`，此时同步逻辑不做任何动作。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::Result;
use crate::utils::time::now_millis;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// 平台尚未报告
    Unknown,
    /// 在线
    Online,
    /// 离线
    Offline,
}

impl Connectivity {
    /// 由平台的可空布尔值转换（null → Unknown）
    pub fn from_reachability(is_connected: Option<bool>) -> Self {
        match is_connected {
            Some(true) => Connectivity::Online,
            Some(false) => Connectivity::Offline,
            None => Connectivity::Unknown,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Unknown => write!(f, "未知"),
            Connectivity::Online => write!(f, "在线"),
            Connectivity::Offline => write!(f, "离线"),
        }
    }
}

/// 连接状态变化事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub old_status: Connectivity,
    pub new_status: Connectivity,
    pub timestamp: u64,
}

/// 连接状态监听器trait（由平台层实现，如 Android/iOS）
#[async_trait]
pub trait ConnectivityListener: Send + Sync + std::fmt::Debug {
    /// 获取当前连接状态
    async fn get_current_status(&self) -> Connectivity;

    /// 开始监听连接状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<ConnectivityEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 连接状态监控器
///
/// 保存最新状态并只在状态真正变化时广播。
#[derive(Debug)]
pub struct ConnectivityMonitor {
    listener: Option<Arc<dyn ConnectivityListener>>,
    status_sender: broadcast::Sender<ConnectivityEvent>,
    current_status: Arc<RwLock<Connectivity>>,
    forward_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(listener: Arc<dyn ConnectivityListener>) -> Self {
        Self::build(Some(listener))
    }

    /// 无平台监听器，由宿主通过 `set_status` 推送状态
    pub fn manual() -> Self {
        Self::build(None)
    }

    fn build(listener: Option<Arc<dyn ConnectivityListener>>) -> Self {
        let (status_sender, _) = broadcast::channel(100);

        Self {
            listener,
            status_sender,
            current_status: Arc::new(RwLock::new(Connectivity::Unknown)),
            forward_task: Mutex::new(None),
        }
    }

    /// 启动监控：读取平台当前状态并转发后续变化
    pub async fn start(&self) -> Result<()> {
        let listener = match &self.listener {
            Some(listener) => listener.clone(),
            None => return Ok(()),
        };

        let mut receiver = listener.start_monitoring().await?;
        self.set_status(listener.get_current_status().await).await;

        let status_sender = self.status_sender.clone();
        let current_status = self.current_status.clone();

        let handle = tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                let old_status = {
                    let mut status = current_status.write().await;
                    let old = *status;
                    *status = event.new_status;
                    old
                };
                if old_status == event.new_status {
                    continue;
                }

                let _ = status_sender.send(ConnectivityEvent {
                    old_status,
                    new_status: event.new_status,
                    timestamp: event.timestamp,
                });
            }
            debug!("平台连接状态流已结束");
        });

        if let Some(previous) = self.forward_task.lock().await.replace(handle) {
            previous.abort();
        }
        info!("连接状态监控已启动");
        Ok(())
    }

    /// 停止监控
    pub async fn stop(&self) {
        if let Some(listener) = &self.listener {
            listener.stop_monitoring().await;
        }
        if let Some(handle) = self.forward_task.lock().await.take() {
            handle.abort();
        }
    }

    /// 获取当前连接状态
    pub async fn get_status(&self) -> Connectivity {
        *self.current_status.read().await
    }

    /// 手动设置连接状态，状态未变化时不广播
    pub async fn set_status(&self, new_status: Connectivity) {
        let old_status = {
            let mut status = self.current_status.write().await;
            let old = *status;
            *status = new_status;
            old
        };
        if old_status == new_status {
            return;
        }

        debug!("连接状态变化: {} → {}", old_status, new_status);
        let _ = self.status_sender.send(ConnectivityEvent {
            old_status,
            new_status,
            timestamp: now_millis(),
        });
    }

    /// 订阅连接状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.status_sender.subscribe()
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// 测试用：可脚本化的连接状态监听器
    #[derive(Debug)]
    pub struct ScriptedConnectivityListener {
        status: RwLock<Connectivity>,
        sender: RwLock<Option<broadcast::Sender<ConnectivityEvent>>>,
    }

    impl ScriptedConnectivityListener {
        pub fn new(initial: Connectivity) -> Self {
            Self {
                status: RwLock::new(initial),
                sender: RwLock::new(None),
            }
        }

        /// 模拟平台上报新状态
        pub async fn report(&self, new_status: Connectivity) {
            let old_status = {
                let mut status = self.status.write().await;
                std::mem::replace(&mut *status, new_status)
            };
            if let Some(sender) = self.sender.read().await.as_ref() {
                let _ = sender.send(ConnectivityEvent {
                    old_status,
                    new_status,
                    timestamp: now_millis(),
                });
            }
        }
    }

    #[async_trait]
    impl ConnectivityListener for ScriptedConnectivityListener {
        async fn get_current_status(&self) -> Connectivity {
            *self.status.read().await
        }

        async fn start_monitoring(&self) -> Result<broadcast::Receiver<ConnectivityEvent>> {
            let (tx, rx) = broadcast::channel(16);
            *self.sender.write().await = Some(tx);
            Ok(rx)
        }

        async fn stop_monitoring(&self) {
            *self.sender.write().await = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::ScriptedConnectivityListener;
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_from_reachability() {
        assert_eq!(Connectivity::from_reachability(None), Connectivity::Unknown);
        assert_eq!(Connectivity::from_reachability(Some(true)), Connectivity::Online);
        assert_eq!(Connectivity::from_reachability(Some(false)), Connectivity::Offline);
    }

    #[tokio::test]
    async fn test_manual_monitor_broadcasts_only_changes() {
        let monitor = ConnectivityMonitor::manual();
        assert_eq!(monitor.get_status().await, Connectivity::Unknown);

        let mut rx = monitor.subscribe();
        monitor.set_status(Connectivity::Online).await;
        monitor.set_status(Connectivity::Online).await;
        monitor.set_status(Connectivity::Offline).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.old_status, Connectivity::Unknown);
        assert_eq!(first.new_status, Connectivity::Online);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.new_status, Connectivity::Offline);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_platform_listener_is_forwarded() {
        let listener = Arc::new(ScriptedConnectivityListener::new(Connectivity::Offline));
        let monitor = ConnectivityMonitor::new(listener.clone());
        let mut rx = monitor.subscribe();

        monitor.start().await.unwrap();
        assert_eq!(monitor.get_status().await, Connectivity::Offline);
        assert_eq!(rx.recv().await.unwrap().new_status, Connectivity::Offline);

        listener.report(Connectivity::Online).await;
        let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.old_status, Connectivity::Offline);
        assert_eq!(event.new_status, Connectivity::Online);
        assert_eq!(monitor.get_status().await, Connectivity::Online);

        monitor.stop().await;
    }
}
