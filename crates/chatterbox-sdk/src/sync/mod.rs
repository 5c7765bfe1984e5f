/// 消息同步模块
///
/// 职责：
/// - 根据连接状态选择数据源（远端实时订阅 / 本地缓存）
/// - 管理订阅生命周期，任何时刻最多一个存活订阅
/// - 每次实时推送规范化后写穿到本地缓存再发布

pub mod controller;

pub use controller::SyncController;

/// 同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncState {
    /// 尚未收到明确的在线/离线信号
    Uninitialized,
    /// 已订阅远端
    Subscribed,
    /// 仅使用本地缓存
    CacheOnly,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Uninitialized => write!(f, "未初始化"),
            SyncState::Subscribed => write!(f, "实时订阅"),
            SyncState::CacheOnly => write!(f, "仅缓存"),
        }
    }
}
