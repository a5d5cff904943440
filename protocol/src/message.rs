//! 数据包定义
//!
//! 数据包在线上是一个自描述数组：第一个元素为整数类型，其余为该类型的负载，
//! 例如 `[4, [2, 2], [4, 4]]` 表示从 (2,2) 走到 (4,4)。
//! 客户端→服务端与服务端→客户端各自使用独立的类型编号空间。

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::piece::{Cell, Color, Piece};

/// 通用数据包信封
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    packet_type: u8,
    fields: Vec<Value>,
}

impl Packet {
    pub fn new(packet_type: u8, fields: Vec<Value>) -> Self {
        Self { packet_type, fields }
    }

    /// 从 JSON 数组构造，校验第一个元素为类型编号
    pub fn from_values(mut values: Vec<Value>) -> Result<Self> {
        if values.is_empty() {
            return Err(ProtocolError::MalformedPacket("empty packet".to_string()));
        }
        let tag = values.remove(0);
        let raw = tag
            .as_i64()
            .ok_or_else(|| ProtocolError::MalformedPacket(format!("packet type is not an integer: {}", tag)))?;
        let packet_type = u8::try_from(raw).map_err(|_| ProtocolError::UnknownPacketType(raw))?;
        Ok(Self::new(packet_type, values))
    }

    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// 序列化为负载字节（不含帧头）
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut values = Vec::with_capacity(self.fields.len() + 1);
        values.push(Value::from(self.packet_type));
        values.extend(self.fields.iter().cloned());
        Ok(serde_json::to_vec(&values)?)
    }

    /// 从负载字节反序列化
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value {
            Value::Array(values) => Self::from_values(values),
            other => Err(ProtocolError::MalformedPacket(format!("expected an array, got {}", other))),
        }
    }

    /// 读取必需字段
    fn field<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.fields.get(index).ok_or_else(|| ProtocolError::InvalidField {
            packet_type: self.packet_type,
            index,
            reason: "missing".to_string(),
        })?;
        self.decode(index, value)
    }

    /// 读取可选字段，缺失或为 null 时返回 None
    fn optional_field<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>> {
        match self.fields.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.decode(index, value).map(Some),
        }
    }

    fn decode<T: DeserializeOwned>(&self, index: usize, value: &Value) -> Result<T> {
        T::deserialize(value).map_err(|e| ProtocolError::InvalidField {
            packet_type: self.packet_type,
            index,
            reason: e.to_string(),
        })
    }
}

fn value<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

/// 客户端数据包类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientPacketType {
    Handshake = 1,
    Room = 2,
    Ready = 3,
    Move = 4,
    Cancel = 5,
    Chat = 6,
}

impl TryFrom<u8> for ClientPacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => ClientPacketType::Handshake,
            2 => ClientPacketType::Room,
            3 => ClientPacketType::Ready,
            4 => ClientPacketType::Move,
            5 => ClientPacketType::Cancel,
            6 => ClientPacketType::Chat,
            other => return Err(ProtocolError::UnknownPacketType(other as i64)),
        })
    }
}

/// 服务端数据包类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerPacketType {
    Handshake = 1,
    Error = 2,
    Room = 3,
    Waiting = 4,
    Start = 5,
    Conclusion = 6,
    Color = 7,
    Moves = 8,
    Promotion = 9,
    Turn = 10,
    Chat = 11,
}

impl TryFrom<u8> for ServerPacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => ServerPacketType::Handshake,
            2 => ServerPacketType::Error,
            3 => ServerPacketType::Room,
            4 => ServerPacketType::Waiting,
            5 => ServerPacketType::Start,
            6 => ServerPacketType::Conclusion,
            7 => ServerPacketType::Color,
            8 => ServerPacketType::Moves,
            9 => ServerPacketType::Promotion,
            10 => ServerPacketType::Turn,
            11 => ServerPacketType::Chat,
            other => return Err(ProtocolError::UnknownPacketType(other as i64)),
        })
    }
}

/// 客户端发送给服务端的数据包
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    /// 握手，可附带希望的棋盘边长
    Handshake {
        pseudonym: String,
        board_size: Option<usize>,
    },
    /// 加入房间，`None` 表示随机生成房间码
    Room { code: Option<String> },
    /// 准备
    Ready,
    /// 走子
    Move { source: Cell, destination: Cell },
    /// 放弃连吃，交出回合
    Cancel,
    /// 聊天
    Chat { text: String },
}

impl ClientPacket {
    pub fn packet_type(&self) -> ClientPacketType {
        match self {
            ClientPacket::Handshake { .. } => ClientPacketType::Handshake,
            ClientPacket::Room { .. } => ClientPacketType::Room,
            ClientPacket::Ready => ClientPacketType::Ready,
            ClientPacket::Move { .. } => ClientPacketType::Move,
            ClientPacket::Cancel => ClientPacketType::Cancel,
            ClientPacket::Chat { .. } => ClientPacketType::Chat,
        }
    }

    pub fn to_packet(&self) -> Packet {
        let fields = match self {
            ClientPacket::Handshake { pseudonym, board_size } => {
                let mut fields = vec![value(pseudonym)];
                if let Some(size) = board_size {
                    fields.push(value(size));
                }
                fields
            }
            ClientPacket::Room { code } => vec![value(&code.clone().unwrap_or_default())],
            ClientPacket::Ready | ClientPacket::Cancel => Vec::new(),
            ClientPacket::Move { source, destination } => vec![value(source), value(destination)],
            ClientPacket::Chat { text } => vec![value(text)],
        };
        Packet::new(self.packet_type() as u8, fields)
    }
}

impl TryFrom<Packet> for ClientPacket {
    type Error = ProtocolError;

    fn try_from(packet: Packet) -> Result<Self> {
        Ok(match ClientPacketType::try_from(packet.packet_type())? {
            ClientPacketType::Handshake => ClientPacket::Handshake {
                pseudonym: packet.field(0)?,
                board_size: packet.optional_field(1)?,
            },
            ClientPacketType::Room => ClientPacket::Room {
                code: packet
                    .optional_field::<String>(0)?
                    .filter(|code| !code.is_empty()),
            },
            ClientPacketType::Ready => ClientPacket::Ready,
            ClientPacketType::Move => ClientPacket::Move {
                source: packet.field(0)?,
                destination: packet.field(1)?,
            },
            ClientPacketType::Cancel => ClientPacket::Cancel,
            ClientPacketType::Chat => ClientPacket::Chat {
                text: packet.field(0)?,
            },
        })
    }
}

/// 服务端发送给客户端的数据包
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    /// 握手成功
    Handshake,
    /// 错误消息
    Error { message: String },
    /// 已加入房间
    Room { code: String },
    /// 等待对手
    Waiting,
    /// 对局开始，附带 `matrix[x][y]` 形式的棋盘
    Start { board: Vec<Vec<Option<Piece>>> },
    /// 对局结束，`None` 为和棋或中止
    Conclusion { winner: Option<Color> },
    /// 分配的颜色
    Color { color: Color },
    /// 需要重放的走法
    Moves { moves: Vec<(Cell, Cell)> },
    /// 升王
    Promotion { cell: Cell, piece: Piece },
    /// 轮到你走，`forced` 为必须继续连吃的棋子
    Turn { forced: Option<Cell> },
    /// 聊天
    Chat { pseudonym: String, text: String },
}

impl ServerPacket {
    pub fn error(message: impl Into<String>) -> Self {
        ServerPacket::Error {
            message: message.into(),
        }
    }

    pub fn packet_type(&self) -> ServerPacketType {
        match self {
            ServerPacket::Handshake => ServerPacketType::Handshake,
            ServerPacket::Error { .. } => ServerPacketType::Error,
            ServerPacket::Room { .. } => ServerPacketType::Room,
            ServerPacket::Waiting => ServerPacketType::Waiting,
            ServerPacket::Start { .. } => ServerPacketType::Start,
            ServerPacket::Conclusion { .. } => ServerPacketType::Conclusion,
            ServerPacket::Color { .. } => ServerPacketType::Color,
            ServerPacket::Moves { .. } => ServerPacketType::Moves,
            ServerPacket::Promotion { .. } => ServerPacketType::Promotion,
            ServerPacket::Turn { .. } => ServerPacketType::Turn,
            ServerPacket::Chat { .. } => ServerPacketType::Chat,
        }
    }

    pub fn to_packet(&self) -> Packet {
        let fields = match self {
            ServerPacket::Handshake | ServerPacket::Waiting => Vec::new(),
            ServerPacket::Error { message } => vec![value(message)],
            ServerPacket::Room { code } => vec![value(code)],
            ServerPacket::Start { board } => vec![value(board)],
            ServerPacket::Conclusion { winner } => vec![value(winner)],
            ServerPacket::Color { color } => vec![value(color)],
            ServerPacket::Moves { moves } => moves
                .iter()
                .flat_map(|(source, destination)| [value(source), value(destination)])
                .collect(),
            ServerPacket::Promotion { cell, piece } => vec![value(cell), value(piece)],
            ServerPacket::Turn { forced } => vec![value(forced)],
            ServerPacket::Chat { pseudonym, text } => vec![value(pseudonym), value(text)],
        };
        Packet::new(self.packet_type() as u8, fields)
    }
}

impl TryFrom<Packet> for ServerPacket {
    type Error = ProtocolError;

    fn try_from(packet: Packet) -> Result<Self> {
        Ok(match ServerPacketType::try_from(packet.packet_type())? {
            ServerPacketType::Handshake => ServerPacket::Handshake,
            ServerPacketType::Error => ServerPacket::Error {
                message: packet.field(0)?,
            },
            ServerPacketType::Room => ServerPacket::Room {
                code: packet.field(0)?,
            },
            ServerPacketType::Waiting => ServerPacket::Waiting,
            ServerPacketType::Start => ServerPacket::Start {
                board: packet.field(0)?,
            },
            ServerPacketType::Conclusion => ServerPacket::Conclusion {
                winner: packet.optional_field(0)?,
            },
            ServerPacketType::Color => ServerPacket::Color {
                color: packet.field(0)?,
            },
            ServerPacketType::Moves => {
                let count = packet.fields().len();
                if count % 2 != 0 {
                    return Err(ProtocolError::InvalidField {
                        packet_type: packet.packet_type(),
                        index: count - 1,
                        reason: "unpaired source cell".to_string(),
                    });
                }
                let mut moves = Vec::with_capacity(count / 2);
                for index in (0..count).step_by(2) {
                    moves.push((packet.field(index)?, packet.field(index + 1)?));
                }
                ServerPacket::Moves { moves }
            }
            ServerPacketType::Promotion => ServerPacket::Promotion {
                cell: packet.field(0)?,
                piece: packet.field(1)?,
            },
            ServerPacketType::Turn => ServerPacket::Turn {
                forced: packet.optional_field(0)?,
            },
            ServerPacketType::Chat => ServerPacket::Chat {
                pseudonym: packet.field(0)?,
                text: packet.field(1)?,
            },
        })
    }
}

impl From<ClientPacket> for Packet {
    fn from(packet: ClientPacket) -> Self {
        packet.to_packet()
    }
}

impl From<ServerPacket> for Packet {
    fn from(packet: ServerPacket) -> Self {
        packet.to_packet()
    }
}
