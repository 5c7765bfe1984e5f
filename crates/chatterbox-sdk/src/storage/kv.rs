//! KV 存储模块 - 基于 sled 的键值存储
//!
//! 数据按设备（安装实例）划分，所有键位于同一个 Tree 中。
//! 单键写入由 sled 保证原子性，读者看不到写了一半的值。

use std::path::Path;

use sled::{Db, Tree};

use crate::error::{ChatterboxError, Result};

/// 设备级 Tree 名称
const DEVICE_TREE: &str = "device";

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Db,
    tree: Tree,
}

impl KvStore {
    /// 打开（或创建）`base_path/kv` 下的存储
    pub async fn new(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| ChatterboxError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个会话可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 100;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tracing::debug!("sled 数据库被占用，{}ms 后重试", delay_ms);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            ChatterboxError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let tree = db
            .open_tree(DEVICE_TREE)
            .map_err(|e| ChatterboxError::KvStore(format!("打开设备 Tree 失败: {}", e)))?;

        tracing::info!("KV 存储已打开: {}", kv_path.display());

        Ok(Self { db, tree })
    }

    /// 写入原始字节并落盘
    pub async fn set_raw<K>(&self, key: K, value: Vec<u8>) -> Result<()>
    where
        K: AsRef<[u8]>,
    {
        self.tree
            .insert(key, value)
            .map_err(|e| ChatterboxError::KvStore(format!("设置键值对失败: {}", e)))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| ChatterboxError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }

    /// 读取原始字节
    pub async fn get_raw<K>(&self, key: K) -> Result<Option<Vec<u8>>>
    where
        K: AsRef<[u8]>,
    {
        let result = self
            .tree
            .get(key)
            .map_err(|e| ChatterboxError::KvStore(format!("获取键值对失败: {}", e)))?;
        Ok(result.map(|v| v.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_kv_store_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::new(temp_dir.path()).await.unwrap();

        assert_eq!(store.get_raw("slot").await.unwrap(), None);

        store.set_raw("slot", b"first".to_vec()).await.unwrap();
        store.set_raw("slot", b"second".to_vec()).await.unwrap();
        assert_eq!(store.get_raw("slot").await.unwrap(), Some(b"second".to_vec()));
        assert!(temp_dir.path().join("kv").is_dir());
    }

    #[tokio::test]
    async fn test_kv_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = KvStore::new(temp_dir.path()).await.unwrap();
            store.set_raw("persisted", b"[1,2,3]".to_vec()).await.unwrap();
        }

        let reopened = KvStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(
            reopened.get_raw("persisted").await.unwrap(),
            Some(b"[1,2,3]".to_vec())
        );
    }
}
