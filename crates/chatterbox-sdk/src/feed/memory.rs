//! 进程内消息源
//!
//! 只追加的内存集合，行为与远端一致：订阅时立即推送完整有序快照，
//! 每次写入后向该集合的所有存活订阅推送新的完整快照。
//! 与远端一样，缺少排序字段的记录不会出现在有序查询结果中。

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{FeedQuery, RawRecord, RemoteFeed, SnapshotSink, SortDirection, Subscription};
use crate::error::{ChatterboxError, Result};
use crate::utils::time::BackendTimestamp;

struct Watcher {
    id: u64,
    query: FeedQuery,
    sink: SnapshotSink,
}

struct FeedInner {
    collections: HashMap<String, Vec<RawRecord>>,
    watchers: Vec<Watcher>,
    network_enabled: bool,
    next_watcher_id: u64,
}

impl FeedInner {
    fn ordered_snapshot(&self, query: &FeedQuery) -> Vec<RawRecord> {
        let records = match self.collections.get(&query.collection) {
            Some(records) => records,
            None => return Vec::new(),
        };

        let mut keyed: Vec<(i128, &RawRecord)> = records
            .iter()
            .filter_map(|record| {
                record
                    .data
                    .get(&query.order_by)
                    .and_then(order_key)
                    .map(|key| (key, record))
            })
            .collect();

        // 稳定排序：排序键相同的记录保持写入顺序
        match query.direction {
            SortDirection::Ascending => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
            SortDirection::Descending => keyed.sort_by(|a, b| b.0.cmp(&a.0)),
        }

        keyed.into_iter().map(|(_, record)| record.clone()).collect()
    }

    fn notify(&mut self, collection: &str) {
        self.watchers.retain(|w| !w.sink.is_cancelled());

        let snapshots: Vec<(usize, Vec<RawRecord>)> = self
            .watchers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.query.collection == collection)
            .map(|(index, w)| (index, self.ordered_snapshot(&w.query)))
            .collect();

        for (index, snapshot) in snapshots {
            let watcher = &self.watchers[index];
            debug!("向订阅 #{} 推送 {} 条记录", watcher.id, snapshot.len());
            watcher.sink.deliver(snapshot);
        }
    }
}

/// 排序键：结构化时间戳取总纳秒数，整数直接使用
fn order_key(value: &Value) -> Option<i128> {
    if let Some(ts) = BackendTimestamp::from_value(value) {
        return Some(ts.total_nanos());
    }
    value.as_i64().map(i128::from)
}

/// 进程内消息源
#[derive(Clone)]
pub struct MemoryFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                collections: HashMap::new(),
                watchers: Vec::new(),
                network_enabled: true,
                next_watcher_id: 1,
            })),
        }
    }

    /// 写入一条已带 ID 的记录（导入历史数据），并通知订阅者
    pub fn put_record(&self, collection: &str, record: RawRecord) {
        let mut inner = self.inner.lock();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
        inner.notify(collection);
    }

    /// 当前存活的订阅数
    pub fn active_subscriptions(&self) -> usize {
        let inner = self.inner.lock();
        inner.watchers.iter().filter(|w| !w.sink.is_cancelled()).count()
    }

    /// 集合中的记录数（包括缺少排序字段的记录）
    pub fn record_count(&self, collection: &str) -> usize {
        let inner = self.inner.lock();
        inner.collections.get(collection).map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_network_enabled(&self) -> bool {
        self.inner.lock().network_enabled
    }

    fn remove_watcher(inner: &Weak<Mutex<FeedInner>>, watcher_id: u64) {
        if let Some(inner) = inner.upgrade() {
            let mut inner = inner.lock();
            inner.watchers.retain(|w| w.id != watcher_id);
            debug!("订阅 #{} 已注销", watcher_id);
        }
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFeed for MemoryFeed {
    async fn subscribe(&self, query: &FeedQuery, sink: SnapshotSink) -> Result<Subscription> {
        let watcher_id = {
            let mut inner = self.inner.lock();
            if !inner.network_enabled {
                return Err(ChatterboxError::NotConnected);
            }

            let watcher_id = inner.next_watcher_id;
            inner.next_watcher_id += 1;

            let snapshot = inner.ordered_snapshot(query);
            sink.deliver(snapshot);
            inner.watchers.push(Watcher {
                id: watcher_id,
                query: query.clone(),
                sink: sink.clone(),
            });
            watcher_id
        };

        info!("集合 {} 新增订阅 #{}", query.collection, watcher_id);
        let weak = Arc::downgrade(&self.inner);
        Ok(sink
            .subscription()
            .with_cancel_hook(move || MemoryFeed::remove_watcher(&weak, watcher_id)))
    }

    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
        if !self.is_network_enabled() {
            return Err(ChatterboxError::NotConnected);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.put_record(collection, RawRecord::new(id.clone(), fields));
        Ok(id)
    }

    async fn set_network_enabled(&self, enabled: bool) -> Result<()> {
        self.inner.lock().network_enabled = enabled;
        info!("内存消息源网络已{}", if enabled { "启用" } else { "禁用" });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedDelivery, TaggedDelivery};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn record(id: &str, seconds: i64) -> RawRecord {
        RawRecord::from_json(id, json!({
            "text": id,
            "createdAt": {"seconds": seconds, "nanoseconds": 0},
        }))
    }

    fn sink(generation: u64) -> (SnapshotSink, mpsc::UnboundedReceiver<TaggedDelivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SnapshotSink::new(generation, CancellationToken::new(), tx), rx)
    }

    fn snapshot_ids(delivery: TaggedDelivery) -> Vec<String> {
        match delivery.1 {
            FeedDelivery::Snapshot(records) => records.into_iter().map(|r| r.id).collect(),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot_newest_first() {
        let feed = MemoryFeed::new();
        feed.put_record("messages", record("old", 10));
        feed.put_record("messages", record("new", 20));
        feed.put_record("messages", RawRecord::from_json("untimed", json!({"text": "x"})));

        let (sink, mut rx) = sink(1);
        let query = FeedQuery::newest_first("messages", "createdAt");
        let _subscription = feed.subscribe(&query, sink).await.unwrap();

        assert_eq!(snapshot_ids(rx.try_recv().unwrap()), vec!["new", "old"]);
        assert_eq!(feed.record_count("messages"), 3);
    }

    #[tokio::test]
    async fn test_insert_pushes_full_snapshot() {
        let feed = MemoryFeed::new();
        let (sink, mut rx) = sink(1);
        let query = FeedQuery::newest_first("messages", "createdAt");
        let _subscription = feed.subscribe(&query, sink).await.unwrap();
        assert!(snapshot_ids(rx.try_recv().unwrap()).is_empty());

        let mut fields = Map::new();
        fields.insert("createdAt".to_string(), json!({"seconds": 5, "nanoseconds": 0}));
        let id = feed.insert("messages", fields).await.unwrap();

        assert_eq!(snapshot_ids(rx.try_recv().unwrap()), vec![id]);
    }

    #[tokio::test]
    async fn test_cancel_unregisters_watcher() {
        let feed = MemoryFeed::new();
        let (sink, mut rx) = sink(1);
        let query = FeedQuery::newest_first("messages", "createdAt");
        let mut subscription = feed.subscribe(&query, sink).await.unwrap();
        assert_eq!(feed.active_subscriptions(), 1);
        let _ = rx.try_recv();

        subscription.cancel();
        subscription.cancel();
        assert_eq!(feed.active_subscriptions(), 0);

        feed.put_record("messages", record("after", 1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_network_refuses_requests() {
        let feed = MemoryFeed::new();
        feed.set_network_enabled(false).await.unwrap();

        let (sink, _rx) = sink(1);
        let query = FeedQuery::newest_first("messages", "createdAt");
        assert!(matches!(
            feed.subscribe(&query, sink).await,
            Err(ChatterboxError::NotConnected)
        ));
        assert!(feed.insert("messages", Map::new()).await.is_err());
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_ascending_query_and_integer_keys() {
        let feed = MemoryFeed::new();
        feed.put_record("scores", RawRecord::from_json("b", json!({"rank": 2})));
        feed.put_record("scores", RawRecord::from_json("a", json!({"rank": 1})));

        let (sink, mut rx) = sink(1);
        let query = FeedQuery {
            collection: "scores".to_string(),
            order_by: "rank".to_string(),
            direction: SortDirection::Ascending,
        };
        let _subscription = feed.subscribe(&query, sink).await.unwrap();
        assert_eq!(snapshot_ids(rx.try_recv().unwrap()), vec!["a", "b"]);
    }
}
