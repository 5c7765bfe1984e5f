//! 时间处理工具模块
//!
//! 后端以结构化时间戳（秒 + 纳秒）保存 `createdAt`，SDK 内部统一使用
//! 毫秒精度的 UTC 时间（`DateTime<Utc>`），持久化时写为 UTC 毫秒时间戳。
//!
//! - **接收**: `BackendTimestamp::from_value` → `to_datetime`（与后端 `toMillis()` 等价，截断到毫秒）
//! - **发送**: `BackendTimestamp::from_datetime` → `to_value`

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const NANOS_PER_MILLI: u32 = 1_000_000;
const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// 后端结构化时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackendTimestamp {
    /// 自 UNIX 纪元起的秒数
    pub seconds: i64,
    /// 秒内纳秒偏移，取值 [0, 1e9)
    pub nanoseconds: u32,
}

impl BackendTimestamp {
    pub fn new(seconds: i64, nanoseconds: u32) -> Option<Self> {
        if nanoseconds >= NANOS_PER_SECOND {
            return None;
        }
        Some(Self { seconds, nanoseconds })
    }

    /// 从原始记录字段解析
    ///
    /// 支持 `{seconds, nanoseconds}` 与 `{_seconds, _nanoseconds}` 两种形态，
    /// 其它任何形态都返回 `None`。
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let seconds = object
            .get("seconds")
            .or_else(|| object.get("_seconds"))?
            .as_i64()?;
        let nanoseconds = match object.get("nanoseconds").or_else(|| object.get("_nanoseconds")) {
            Some(v) => u32::try_from(v.as_u64()?).ok()?,
            None => 0,
        };
        Self::new(seconds, nanoseconds)
    }

    /// 转换为后端字段形态
    pub fn to_value(&self) -> Value {
        json!({
            "seconds": self.seconds,
            "nanoseconds": self.nanoseconds,
        })
    }

    /// UTC 毫秒时间戳（纳秒部分截断），超出 i64 范围时返回 `None`
    pub fn to_millis(&self) -> Option<i64> {
        self.seconds
            .checked_mul(1000)?
            .checked_add(i64::from(self.nanoseconds / NANOS_PER_MILLI))
    }

    /// 规范化为毫秒精度的 UTC 时间
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.to_millis()?).single()
    }

    pub fn from_datetime(datetime: &DateTime<Utc>) -> Self {
        Self {
            seconds: datetime.timestamp(),
            nanoseconds: datetime.timestamp_subsec_nanos() % NANOS_PER_SECOND,
        }
    }

    /// 用于排序比较的总纳秒数
    pub fn total_nanos(&self) -> i128 {
        i128::from(self.seconds) * i128::from(NANOS_PER_SECOND) + i128::from(self.nanoseconds)
    }
}

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// 截断到毫秒精度（SDK 内部时间的规范形态）
pub fn truncate_to_millis(datetime: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(datetime.timestamp_millis())
        .single()
        .unwrap_or(datetime)
}
