//! 消息总线消息类型定义
//!
//! The gateway and its clients exchange [`BusMessage`] frames. The wire
//! framing itself (type byte, ids, length prefix) lives in the server's
//! transport layer; this module defines the envelope and payload typing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

use crate::payload::{CommandEnvelope, CommandResponse, HandshakePayload, SnapshotPayload};

/// 协议版本号
pub const PROTOCOL_VERSION: u16 = 1;

/// Message bus event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Connection handshake carrying the identity claim.
    Handshake = 0,
    /// Client command for the auction engine.
    Command = 1,
    /// Per-request reply (handshake result, command accept/reject).
    Response = 2,
    /// Versioned full-state broadcast.
    Snapshot = 3,
}

impl TryFrom<u8> for EventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::Handshake),
            1 => Ok(EventType::Command),
            2 => Ok(EventType::Response),
            3 => Ok(EventType::Snapshot),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Handshake => write!(f, "handshake"),
            EventType::Command => write!(f, "command"),
            EventType::Response => write!(f, "response"),
            EventType::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// 消息总线消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    /// Links a Response to the request it answers.
    pub correlation_id: Option<Uuid>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            correlation_id: None,
            payload,
        }
    }

    /// 设置关联 ID (用于请求响应)
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// 创建握手消息
    pub fn handshake(payload: &HandshakePayload) -> Self {
        Self::new(
            EventType::Handshake,
            serde_json::to_vec(payload).expect("Failed to serialize handshake payload"),
        )
    }

    /// 创建指令消息
    pub fn command(payload: &CommandEnvelope) -> Self {
        Self::new(
            EventType::Command,
            serde_json::to_vec(payload).expect("Failed to serialize command envelope"),
        )
    }

    /// 创建响应消息
    pub fn response(payload: &CommandResponse) -> Self {
        Self::new(
            EventType::Response,
            serde_json::to_vec(payload).expect("Failed to serialize command response"),
        )
    }

    /// 创建快照消息
    pub fn snapshot(payload: &SnapshotPayload) -> Self {
        Self::new(
            EventType::Snapshot,
            serde_json::to_vec(payload).expect("Failed to serialize snapshot payload"),
        )
    }

    /// 解析载荷为指定类型
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
