//! 协议常量定义

use std::time::Duration;

/// 默认棋盘边长
pub const DEFAULT_BOARD_SIZE: usize = 8;

/// 棋盘最小边长（每方至少一排棋子）
pub const MIN_BOARD_SIZE: usize = 4;

/// 棋盘最大边长
pub const MAX_BOARD_SIZE: usize = 16;

/// 昵称最小长度
pub const MIN_PSEUDONYM_LEN: usize = 3;

/// 昵称最大长度
pub const MAX_PSEUDONYM_LEN: usize = 24;

/// 房间码最小长度
pub const MIN_ROOM_CODE_LEN: usize = 4;

/// 房间码最大长度
pub const MAX_ROOM_CODE_LEN: usize = 32;

/// 随机生成的房间码长度
pub const GENERATED_ROOM_CODE_LEN: usize = 6;

/// 聊天消息最大长度
pub const MAX_CHAT_LEN: usize = 256;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 帧头大小：4 字节小端序长度
pub const HEADER_SIZE: usize = 4;

/// 每个连接的发送队列容量
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// 默认服务端端口
pub const DEFAULT_PORT: u16 = 2332;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 升王奖励分
pub const PROMOTION_BONUS: u32 = 2;
