//! 离线优先同步演示
//!
//! 运行: cargo run --example offline_demo

use std::sync::Arc;
use std::time::Duration;

use chatterbox_sdk::{
    error::Result, Attachment, Author, ChatSession, ChatterboxConfig, Connectivity,
    ConnectivityMonitor, MemoryFeed, OutgoingMessage, RawRecord, SyncEvent,
};
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let data_dir = std::env::temp_dir().join("chatterbox_offline_demo");
    let config = ChatterboxConfig::builder()
        .data_dir(&data_dir)
        .debug_mode(true)
        .build();

    // ========== 准备远端历史消息 ==========
    let feed = MemoryFeed::new();
    feed.put_record(
        "messages",
        RawRecord::from_json("welcome", json!({
            "text": "欢迎来到聊天室",
            "createdAt": {"seconds": 1_700_000_000, "nanoseconds": 0},
            "system": true,
        })),
    );

    let monitor = Arc::new(ConnectivityMonitor::manual());
    monitor.set_status(Connectivity::Online).await;

    let session = ChatSession::open(config, Arc::new(feed.clone()), monitor.clone()).await?;
    session
        .on_messages(|messages| {
            info!("📨 消息列表更新: {} 条", messages.len());
            for message in messages {
                info!("   [{}] {:?}", message.kind().as_str(), message.text);
            }
        })
        .await;

    let mut events = session.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::ConnectionLost { .. } => warn!("⚠️ 网络已断开，显示本地缓存"),
                SyncEvent::MessageSendFailed { error, .. } => warn!("❌ 发送失败: {}", error),
                event if event.is_user_visible() => info!("🔔 {}", event.event_type()),
                _ => {}
            }
        }
    });

    // ========== 在线：发送消息 ==========
    let alice = Author::new("u1", "Alice");
    session
        .send(OutgoingMessage::text(alice.clone(), "大家好"))
        .await?;
    session
        .send(OutgoingMessage::attachment(alice.clone(), Attachment::location(31.23, 121.47)))
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // ========== 离线：切换到本地缓存 ==========
    monitor.set_status(Connectivity::Offline).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("离线状态: {}", session.state().await?);

    if let Err(e) = session.send(OutgoingMessage::text(alice, "发不出去")).await {
        warn!("离线时发送被拒绝: {}", e);
    }

    // ========== 恢复在线 ==========
    monitor.set_status(Connectivity::Online).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(
        "恢复后状态: {}，共 {} 条消息",
        session.state().await?,
        session.messages().await?.len()
    );

    session.shutdown().await?;
    info!("✅ 演示结束");
    Ok(())
}
