//! 错误类型定义

use thiserror::Error;

/// 棋盘错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// 坐标越界
    #[error("Out of bounds: ({x}, {y})")]
    OutOfBounds { x: i32, y: i32 },

    /// 棋盘尺寸无效
    #[error("Invalid board size: {width}x{height}")]
    InvalidSize { width: usize, height: usize },

    /// 无效的棋子编码
    #[error("Invalid piece code: {0}")]
    InvalidPieceCode(u8),
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 负载不是合法的 JSON
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// 帧头不完整
    #[error("Truncated header: {received} of 4 bytes")]
    TruncatedHeader { received: usize },

    /// 消息体不完整
    #[error("Truncated body: {received} of {expected} bytes")]
    TruncatedBody { received: usize, expected: usize },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 数据包结构错误（不是以整数类型开头的数组）
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// 未知的数据包类型
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(i64),

    /// 字段缺失或类型错误
    #[error("Invalid field {index} in packet type {packet_type}: {reason}")]
    InvalidField {
        packet_type: u8,
        index: usize,
        reason: String,
    },

    /// 棋盘错误
    #[error("Board error: {0}")]
    Board(#[from] BoardError),
}

impl ProtocolError {
    /// 是否为帧层错误（只需关闭连接，无需回复）
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::TruncatedHeader { .. }
                | ProtocolError::TruncatedBody { .. }
                | ProtocolError::FrameTooLarge { .. }
                | ProtocolError::ConnectionClosed
                | ProtocolError::Io(_)
        )
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
