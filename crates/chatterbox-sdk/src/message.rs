//! 规范消息模型
//!
//! 远端记录经过 [`crate::normalizer`] 规范化后得到 [`Message`]，本地缓存与界面层
//! 只接触这一种形态。附件用带标签的枚举表示，界面层可以穷尽匹配。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatterboxError, Result};
use crate::utils::time::truncate_to_millis;

/// 发送者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Author {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, display_name: N) -> Self {
        Self {
            id: id.into(),
            display_name: Some(display_name.into()),
        }
    }
}

/// 经纬度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// 消息附件
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    #[default]
    NoAttachment,
    Image {
        url: String,
    },
    Location(Coordinates),
    Audio {
        url: String,
    },
}

impl Attachment {
    pub fn is_none(&self) -> bool {
        matches!(self, Attachment::NoAttachment)
    }

    pub fn image<S: Into<String>>(url: S) -> Self {
        Attachment::Image { url: url.into() }
    }

    pub fn audio<S: Into<String>>(url: S) -> Self {
        Attachment::Audio { url: url.into() }
    }

    pub fn location(latitude: f64, longitude: f64) -> Self {
        Attachment::Location(Coordinates { latitude, longitude })
    }
}

/// 消息类别（由内容推导，不单独存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Location,
    Audio,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Location => "location",
            MessageKind::Audio => "audio",
            MessageKind::System => "system",
        }
    }
}

/// 规范消息
///
/// 创建后不可变；只会在新快照到达时整体替换。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 远端分配的唯一 ID
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// 毫秒精度的 UTC 时间，持久化为 UTC 毫秒时间戳
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Attachment::is_none")]
    pub attachment: Attachment,
    #[serde(default)]
    pub is_system_message: bool,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        if self.is_system_message {
            return MessageKind::System;
        }
        match self.attachment {
            Attachment::NoAttachment => MessageKind::Text,
            Attachment::Image { .. } => MessageKind::Image,
            Attachment::Location(_) => MessageKind::Location,
            Attachment::Audio { .. } => MessageKind::Audio,
        }
    }

    /// 是否由指定用户发送
    pub fn is_from(&self, user_id: &str) -> bool {
        self.author.as_ref().map(|a| a.id == user_id).unwrap_or(false)
    }
}

/// 待发送的消息（远端写入时再分配 ID）
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub author: Author,
    pub attachment: Attachment,
    pub is_system_message: bool,
    pub created_at: DateTime<Utc>,
}

impl OutgoingMessage {
    /// 文本消息
    pub fn text<S: Into<String>>(author: Author, text: S) -> Self {
        Self {
            text: Some(text.into()),
            author,
            attachment: Attachment::NoAttachment,
            is_system_message: false,
            created_at: truncate_to_millis(Utc::now()),
        }
    }

    /// 附件消息（图片/位置/语音，由外部采集与上传后得到）
    pub fn attachment(author: Author, attachment: Attachment) -> Self {
        Self {
            text: None,
            author,
            attachment,
            is_system_message: false,
            created_at: truncate_to_millis(Utc::now()),
        }
    }

    /// 系统提示
    pub fn system<S: Into<String>>(author: Author, text: S) -> Self {
        Self {
            is_system_message: true,
            ..Self::text(author, text)
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = truncate_to_millis(created_at);
        self
    }

    /// 校验：文本（非空白）与附件至少有一个
    pub fn validate(&self) -> Result<()> {
        if self.author.id.is_empty() {
            return Err(ChatterboxError::InvalidInput("发送者 ID 不能为空".to_string()));
        }
        let has_text = self
            .text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        if !has_text && self.attachment.is_none() {
            return Err(ChatterboxError::InvalidInput("消息内容为空".to_string()));
        }
        if self.is_system_message && !has_text {
            return Err(ChatterboxError::InvalidInput("系统消息必须包含文本".to_string()));
        }
        Ok(())
    }
}

/// 生成附件上传的对象引用名：`{userId}-{毫秒时间戳}-{文件名}`
///
/// 文件名取来源 URI 最后一个 `/` 之后的部分。
pub fn upload_reference(user_id: &str, source_uri: &str, timestamp_millis: i64) -> String {
    let file_name = source_uri.rsplit('/').next().unwrap_or(source_uri);
    format!("{}-{}-{}", user_id, timestamp_millis, file_name)
}
