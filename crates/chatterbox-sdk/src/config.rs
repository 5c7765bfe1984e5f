//! SDK 配置

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ChatterboxError, Result};
use crate::feed::FeedQuery;
use crate::storage::cache_keys;

/// Chatterbox SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatterboxConfig {
    /// 数据存储目录（KV 缓存位于 `data_dir/kv`）
    pub data_dir: PathBuf,
    /// 远端消息集合名称
    pub collection: String,
    /// 排序字段（按此字段降序订阅）
    pub order_by: String,
    /// 消息快照缓存键（全设备唯一槽位）
    pub cache_key: String,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for ChatterboxConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            collection: "messages".to_string(),
            order_by: "createdAt".to_string(),
            cache_key: cache_keys::MESSAGES.to_string(),
            event_buffer_size: 1000,
            debug_mode: false,
        }
    }
}

impl ChatterboxConfig {
    pub fn builder() -> ChatterboxConfigBuilder {
        ChatterboxConfigBuilder::new()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(ChatterboxError::Config("集合名称不能为空".to_string()));
        }
        if self.order_by.trim().is_empty() {
            return Err(ChatterboxError::Config("排序字段不能为空".to_string()));
        }
        if self.cache_key.trim().is_empty() {
            return Err(ChatterboxError::Config("缓存键不能为空".to_string()));
        }
        if self.event_buffer_size == 0 {
            return Err(ChatterboxError::Config("事件缓冲区大小必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 消息订阅查询（最新的在前）
    pub fn feed_query(&self) -> FeedQuery {
        FeedQuery::newest_first(self.collection.clone(), self.order_by.clone())
    }
}

/// 获取默认数据目录 ~/.chatterbox/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".chatterbox")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".chatterbox")
    } else {
        PathBuf::from("./chatterbox_data")
    }
}

/// Chatterbox SDK 配置构建器
#[derive(Debug, Clone, Default)]
pub struct ChatterboxConfigBuilder {
    config: ChatterboxConfig,
}

impl ChatterboxConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn collection<S: Into<String>>(mut self, collection: S) -> Self {
        self.config.collection = collection.into();
        self
    }

    pub fn order_by<S: Into<String>>(mut self, field: S) -> Self {
        self.config.order_by = field.into();
        self
    }

    pub fn cache_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.cache_key = key.into();
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> ChatterboxConfig {
        self.config
    }
}
