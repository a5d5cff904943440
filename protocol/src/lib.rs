//! 跳棋共享协议库
//!
//! 包含:
//! - 棋子、棋盘、格子等核心数据结构
//! - 走法生成和规则验证（连吃、升王、胜负与僵局判定）
//! - 数据包定义 (ClientPacket, ServerPacket)
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - 帧编解码 (FrameReader, FrameWriter)

mod board;
mod constants;
mod error;
mod message;
mod piece;
mod transport;

pub use board::{Board, MoveOutcome};
pub use constants::*;
pub use error::{BoardError, ProtocolError, Result};
pub use message::{ClientPacket, ClientPacketType, Packet, ServerPacket, ServerPacketType};
pub use piece::{color_of, promote, Cell, Color, Piece};
pub use transport::{
    encode_frame, Connection, Connector, FrameReader, FrameWriter, Listener,
    TcpConnection, TcpConnector, TcpListener,
};
