use std::fmt;

/// 单条原始记录规范化失败的原因
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("记录 {record_id} 缺少时间戳字段 {field}")]
    MissingTimestamp {
        record_id: String,
        field: String,
    },

    #[error("记录 {record_id} 的时间戳字段 {field} 格式无效")]
    InvalidTimestamp {
        record_id: String,
        field: String,
    },

    #[error("记录 {record_id} 的字段 {field} 类型错误: 期望 {expected}")]
    InvalidField {
        record_id: String,
        field: String,
        expected: &'static str,
    },

    #[error("同一快照中出现重复的记录 ID: {record_id}")]
    DuplicateId {
        record_id: String,
    },
}

impl NormalizeError {
    /// 出错记录的 ID
    pub fn record_id(&self) -> &str {
        match self {
            NormalizeError::MissingTimestamp { record_id, .. }
            | NormalizeError::InvalidTimestamp { record_id, .. }
            | NormalizeError::InvalidField { record_id, .. }
            | NormalizeError::DuplicateId { record_id } => record_id,
        }
    }
}

#[derive(Debug)]
pub enum ChatterboxError {
    JsonError(String),
    InvalidInput(String),
    KvStore(String),
    Serialization(String),
    IO(String),
    NotConnected,
    /// 远端消息源错误（订阅建立失败、写入被拒绝等）
    Feed(String),
    Normalize(NormalizeError),
    Config(String),
    ShuttingDown(String),
}

impl fmt::Display for ChatterboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatterboxError::JsonError(e) => write!(f, "JSON error: {}", e),
            ChatterboxError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            ChatterboxError::KvStore(e) => write!(f, "KV store error: {}", e),
            ChatterboxError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ChatterboxError::IO(e) => write!(f, "IO error: {}", e),
            ChatterboxError::NotConnected => write!(f, "Not connected"),
            ChatterboxError::Feed(e) => write!(f, "Remote feed error: {}", e),
            ChatterboxError::Normalize(e) => write!(f, "Malformed record: {}", e),
            ChatterboxError::Config(e) => write!(f, "Config error: {}", e),
            ChatterboxError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
        }
    }
}

impl std::error::Error for ChatterboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatterboxError::Normalize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ChatterboxError {
    fn from(error: serde_json::Error) -> Self {
        ChatterboxError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for ChatterboxError {
    fn from(error: std::io::Error) -> Self {
        ChatterboxError::IO(error.to_string())
    }
}

impl From<sled::Error> for ChatterboxError {
    fn from(error: sled::Error) -> Self {
        ChatterboxError::KvStore(error.to_string())
    }
}

impl From<NormalizeError> for ChatterboxError {
    fn from(error: NormalizeError) -> Self {
        ChatterboxError::Normalize(error)
    }
}

impl ChatterboxError {
    /// 是否属于网络不可用类错误（界面上按“连接断开”处理）
    pub fn is_connectivity_error(&self) -> bool {
        matches!(self, ChatterboxError::NotConnected | ChatterboxError::Feed(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatterboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_error_record_id() {
        let err = NormalizeError::MissingTimestamp {
            record_id: "abc".to_string(),
            field: "createdAt".to_string(),
        };
        assert_eq!(err.record_id(), "abc");
        assert!(err.to_string().contains("createdAt"));

        let wrapped: ChatterboxError = err.into();
        assert!(matches!(wrapped, ChatterboxError::Normalize(_)));
        assert!(std::error::Error::source(&wrapped).is_some());
    }

    #[test]
    fn test_connectivity_error_classification() {
        assert!(ChatterboxError::NotConnected.is_connectivity_error());
        assert!(ChatterboxError::Feed("unavailable".to_string()).is_connectivity_error());
        assert!(!ChatterboxError::KvStore("disk full".to_string()).is_connectivity_error());
    }
}
