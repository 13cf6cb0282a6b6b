//! SDK 错误定义

use crate::events::ErrorPayload;
use thiserror::Error;

/// 连接层错误（传输、协议、使用方式）
#[derive(Error, Debug, Clone)]
pub enum SdkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Too many failed connection attempts: {0}")]
    RetriesExhausted(u32),
}

/// 单个请求的失败结果
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// 服务端对该请求返回了 error
    #[error("Server rejected request: {}", .0.tl_key)]
    Server(ErrorPayload),

    /// 请求帧无法编码
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 被更新的同名无状态请求取代
    #[error("Superseded by a newer request for the same action")]
    Superseded,

    /// 已发送表溢出，被挤出
    #[error("Evicted from the sent-request history before a response arrived")]
    Evicted,

    /// 客户端关闭时仍未完成
    #[error("Request abandoned")]
    Abandoned,

    /// 响应体缺少期望的 key 或结构不符
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        RequestError::Decode(e.to_string())
    }
}
