//! 消息规范化
//!
//! 把远端原始记录映射为 [`Message`]，以及把 [`OutgoingMessage`] 编码为远端字段。
//!
//! 原始记录字段约定：
//! - `text`: 文本
//! - `createdAt`: 结构化时间戳（必填）
//! - `user`: `{ _id, name }`
//! - `image` / `audio`: 附件 URL
//! - `location`: `{ latitude, longitude }`
//! - `system`: 系统消息标记
//!
//! 消息 ID 永远取记录自身的 ID，字段表里的 `_id` 会被忽略。

use std::collections::HashSet;

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::NormalizeError;
use crate::feed::RawRecord;
use crate::message::{Attachment, Author, Coordinates, Message, OutgoingMessage};
use crate::utils::time::BackendTimestamp;

/// 字段名常量
pub mod fields {
    pub const TEXT: &str = "text";
    pub const CREATED_AT: &str = "createdAt";
    pub const USER: &str = "user";
    pub const USER_ID: &str = "_id";
    pub const USER_NAME: &str = "name";
    pub const IMAGE: &str = "image";
    pub const LOCATION: &str = "location";
    pub const AUDIO: &str = "audio";
    pub const SYSTEM: &str = "system";
}

/// 一批记录的规范化结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// 规范化成功的消息，保持推送顺序
    pub messages: Vec<Message>,
    /// 被排除的记录
    pub rejected: Vec<NormalizeError>,
}

/// 规范化单条记录
pub fn normalize(record: &RawRecord) -> Result<Message, NormalizeError> {
    let data = &record.data;

    let created_at = match data.get(fields::CREATED_AT) {
        None | Some(Value::Null) => {
            return Err(NormalizeError::MissingTimestamp {
                record_id: record.id.clone(),
                field: fields::CREATED_AT.to_string(),
            })
        }
        Some(value) => BackendTimestamp::from_value(value)
            .and_then(|ts| ts.to_datetime())
            .ok_or_else(|| NormalizeError::InvalidTimestamp {
                record_id: record.id.clone(),
                field: fields::CREATED_AT.to_string(),
            })?,
    };

    let text = optional_string(record, fields::TEXT)?;
    let author = parse_author(record)?;
    let attachment = parse_attachment(record)?;
    let is_system_message = match data.get(fields::SYSTEM) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => return Err(invalid_field(record, fields::SYSTEM, "boolean")),
    };

    Ok(Message {
        id: record.id.clone(),
        text,
        created_at,
        author,
        attachment,
        is_system_message,
    })
}

/// 规范化一整批快照
///
/// 只排除出错的记录，其余记录照常返回；同一批内重复的 ID 只保留第一条规范化成功的记录。
pub fn normalize_batch(records: &[RawRecord]) -> NormalizedBatch {
    let mut batch = NormalizedBatch {
        messages: Vec::with_capacity(records.len()),
        rejected: Vec::new(),
    };
    let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());

    for record in records {
        if seen.contains(record.id.as_str()) {
            warn!("快照中出现重复记录 {}，已忽略", record.id);
            batch.rejected.push(NormalizeError::DuplicateId {
                record_id: record.id.clone(),
            });
            continue;
        }
        match normalize(record) {
            Ok(message) => {
                seen.insert(record.id.as_str());
                batch.messages.push(message);
            }
            Err(e) => {
                warn!("记录规范化失败，已排除: {}", e);
                batch.rejected.push(e);
            }
        }
    }

    batch
}

/// 把待发送消息编码为远端字段
pub fn encode_outgoing(message: &OutgoingMessage) -> Map<String, Value> {
    let mut data = Map::new();

    data.insert(
        fields::CREATED_AT.to_string(),
        BackendTimestamp::from_datetime(&message.created_at).to_value(),
    );

    let mut user = Map::new();
    user.insert(fields::USER_ID.to_string(), json!(message.author.id));
    if let Some(name) = &message.author.display_name {
        user.insert(fields::USER_NAME.to_string(), json!(name));
    }
    data.insert(fields::USER.to_string(), Value::Object(user));

    if let Some(text) = &message.text {
        data.insert(fields::TEXT.to_string(), json!(text));
    }

    match &message.attachment {
        Attachment::NoAttachment => {}
        Attachment::Image { url } => {
            data.insert(fields::IMAGE.to_string(), json!(url));
        }
        Attachment::Location(coords) => {
            data.insert(
                fields::LOCATION.to_string(),
                json!({"latitude": coords.latitude, "longitude": coords.longitude}),
            );
        }
        Attachment::Audio { url } => {
            data.insert(fields::AUDIO.to_string(), json!(url));
        }
    }

    if message.is_system_message {
        data.insert(fields::SYSTEM.to_string(), Value::Bool(true));
    }

    data
}

fn invalid_field(record: &RawRecord, field: &str, expected: &'static str) -> NormalizeError {
    NormalizeError::InvalidField {
        record_id: record.id.clone(),
        field: field.to_string(),
        expected,
    }
}

fn optional_string(record: &RawRecord, field: &str) -> Result<Option<String>, NormalizeError> {
    match record.data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid_field(record, field, "string")),
    }
}

fn parse_author(record: &RawRecord) -> Result<Option<Author>, NormalizeError> {
    let user = match record.data.get(fields::USER) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(user)) => user,
        Some(_) => return Err(invalid_field(record, fields::USER, "object")),
    };

    let id = match user.get(fields::USER_ID) {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(invalid_field(record, "user._id", "string or number")),
    };
    let display_name = match user.get(fields::USER_NAME) {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(_) => return Err(invalid_field(record, "user.name", "string")),
    };

    Ok(Some(Author { id, display_name }))
}

fn parse_attachment(record: &RawRecord) -> Result<Attachment, NormalizeError> {
    let mut found = Vec::new();

    if let Some(url) = optional_string(record, fields::IMAGE)? {
        found.push(Attachment::Image { url });
    }
    match record.data.get(fields::LOCATION) {
        None | Some(Value::Null) => {}
        Some(value) => {
            let coords: Coordinates = serde_json::from_value(value.clone())
                .map_err(|_| invalid_field(record, fields::LOCATION, "{latitude, longitude}"))?;
            found.push(Attachment::Location(coords));
        }
    }
    if let Some(url) = optional_string(record, fields::AUDIO)? {
        found.push(Attachment::Audio { url });
    }

    if found.len() > 1 {
        warn!("记录 {} 含有 {} 个附件字段，仅保留第一个", record.id, found.len());
    }
    Ok(found.into_iter().next().unwrap_or_default())
}
