//! 客户端会话
//!
//! 会话不带界面：负责握手、发送请求、接收服务端数据包，并用收到的
//! START/MOVES/PROMOTION 维护本地棋盘副本。走子前先在副本上校验，
//! 明显非法的走法不会发往服务端。

use protocol::{
    Board, BoardError, Cell, ClientPacket, Color, Connector, FrameReader, FrameWriter, ProtocolError,
    ServerPacket, TcpConnector,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

/// 会话错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("协议错误: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("棋盘错误: {0}")]
    Board(#[from] BoardError),

    /// 服务端拒绝握手
    #[error("服务器拒绝: {0}")]
    Rejected(String),

    #[error("意外的数据包: {0:?}")]
    Unexpected(ServerPacket),

    #[error("当前没有进行中的对局")]
    NoMatch,

    #[error("还没轮到你")]
    NotYourTurn,

    #[error("{0} 上没有你的棋子")]
    NotYourPiece(Cell),

    #[error("非法走法: {0} -> {1}")]
    IllegalMove(Cell, Cell),

    #[error("必须用 {0} 上的棋子继续吃子")]
    MustContinueFrom(Cell),

    #[error("连吃时必须吃子")]
    MustCapture,

    #[error("没有可以放弃的连吃")]
    NoContinuation,

    /// 服务端下发的走法在本地副本上不成立
    #[error("棋盘不同步: {0}")]
    Desync(String),
}

/// 本地棋盘副本
#[derive(Debug, Clone, Default)]
pub struct Replica {
    board: Option<Board>,
    color: Option<Color>,
    my_turn: bool,
    forced: Option<Cell>,
    room: Option<String>,
    winner: Option<Option<Color>>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前棋盘，对局开始前为 None
    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn color(&self) -> Option<Color> {
        self.color
    }

    pub fn is_my_turn(&self) -> bool {
        self.my_turn
    }

    /// 必须继续连吃的棋子
    pub fn forced(&self) -> Option<Cell> {
        self.forced
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// 最近一次对局结果，`Some(None)` 为和棋或中止
    pub fn winner(&self) -> Option<Option<Color>> {
        self.winner
    }

    /// 对局是否进行中
    pub fn in_match(&self) -> bool {
        self.board.is_some() && self.winner.is_none()
    }

    /// 用服务端数据包更新副本
    pub fn apply(&mut self, packet: &ServerPacket) -> Result<(), SessionError> {
        match packet {
            ServerPacket::Room { code } => {
                self.room = Some(code.clone());
            }
            ServerPacket::Waiting => {
                self.my_turn = false;
                self.forced = None;
            }
            ServerPacket::Color { color } => {
                self.color = Some(*color);
            }
            ServerPacket::Start { board } => {
                self.board = Some(Board::from_matrix(board)?);
                self.my_turn = false;
                self.forced = None;
                self.winner = None;
            }
            ServerPacket::Moves { moves } => {
                let board = self
                    .board
                    .as_mut()
                    .ok_or_else(|| SessionError::Desync("对局开始前收到走法".to_string()))?;
                for (source, destination) in moves {
                    if board.get(*source).is_none() || !board.legal_destinations(*source).contains(destination) {
                        return Err(SessionError::Desync(format!("{} -> {}", source, destination)));
                    }
                    board.apply_move(*source, *destination);
                }
                self.my_turn = false;
                self.forced = None;
            }
            ServerPacket::Promotion { cell, piece } => {
                let board = self
                    .board
                    .as_mut()
                    .ok_or_else(|| SessionError::Desync("对局开始前收到升王".to_string()))?;
                board.place(*cell, *piece)?;
            }
            ServerPacket::Turn { forced } => {
                self.my_turn = true;
                self.forced = *forced;
            }
            ServerPacket::Conclusion { winner } => {
                self.my_turn = false;
                self.forced = None;
                self.winner = Some(*winner);
            }
            ServerPacket::Handshake | ServerPacket::Error { .. } | ServerPacket::Chat { .. } => {}
        }
        Ok(())
    }

    /// 在副本上检查走法，规则与服务端一致
    pub fn validate_move(&self, source: Cell, destination: Cell) -> Result<(), SessionError> {
        let board = match &self.board {
            Some(board) if self.winner.is_none() => board,
            _ => return Err(SessionError::NoMatch),
        };
        if !self.my_turn {
            return Err(SessionError::NotYourTurn);
        }

        match (board.get(source), self.color) {
            (Some(piece), Some(color)) if piece.color() == color => {}
            _ => return Err(SessionError::NotYourPiece(source)),
        }

        if let Some(forced) = self.forced {
            if source != forced {
                return Err(SessionError::MustContinueFrom(forced));
            }
        }

        if !board.legal_destinations(source).contains(&destination) {
            return Err(SessionError::IllegalMove(source, destination));
        }

        if self.forced.is_some() && !board.capture_destinations(source).contains(&destination) {
            return Err(SessionError::MustCapture);
        }

        Ok(())
    }
}

/// 客户端会话
pub struct ClientSession<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    pseudonym: String,
    replica: Replica,
}

impl ClientSession<OwnedReadHalf, OwnedWriteHalf> {
    /// 连接服务器并握手
    pub async fn connect(addr: &str, pseudonym: &str, board_size: Option<usize>) -> Result<Self, SessionError> {
        let conn = TcpConnector.connect(addr).await?;
        let (reader, writer) = conn.split();
        info!(addr, "已连接服务器");
        Self::handshake(reader, writer, pseudonym, board_size).await
    }
}

impl<R, W> ClientSession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// 在已建立的读写端上握手
    pub async fn handshake(
        mut reader: FrameReader<R>,
        mut writer: FrameWriter<W>,
        pseudonym: &str,
        board_size: Option<usize>,
    ) -> Result<Self, SessionError> {
        writer
            .send(ClientPacket::Handshake {
                pseudonym: pseudonym.to_string(),
                board_size,
            })
            .await?;

        match reader.recv::<ServerPacket>().await? {
            ServerPacket::Handshake => {
                info!(pseudonym, "握手成功");
                Ok(Self {
                    reader,
                    writer,
                    pseudonym: pseudonym.to_string(),
                    replica: Replica::new(),
                })
            }
            ServerPacket::Error { message } => Err(SessionError::Rejected(message)),
            other => Err(SessionError::Unexpected(other)),
        }
    }

    pub fn pseudonym(&self) -> &str {
        &self.pseudonym
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// 加入房间，`None` 让服务端生成房间码
    pub async fn join_room(&mut self, code: Option<String>) -> Result<(), SessionError> {
        self.writer.send(ClientPacket::Room { code }).await?;
        Ok(())
    }

    pub async fn ready(&mut self) -> Result<(), SessionError> {
        self.writer.send(ClientPacket::Ready).await?;
        Ok(())
    }

    /// 本地校验通过后发送走法
    pub async fn play(&mut self, source: Cell, destination: Cell) -> Result<(), SessionError> {
        self.replica.validate_move(source, destination)?;
        self.writer.send(ClientPacket::Move { source, destination }).await?;
        debug!(%source, %destination, "走法已发送");
        Ok(())
    }

    /// 放弃连吃
    pub async fn cancel(&mut self) -> Result<(), SessionError> {
        if !self.replica.my_turn || self.replica.forced.is_none() {
            return Err(SessionError::NoContinuation);
        }
        self.writer.send(ClientPacket::Cancel).await?;
        Ok(())
    }

    pub async fn chat(&mut self, text: &str) -> Result<(), SessionError> {
        self.writer
            .send(ClientPacket::Chat {
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    /// 等待下一个服务端数据包并更新副本
    ///
    /// 可以放在 `tokio::select!` 中取消，未读完的帧留在缓冲区。
    pub async fn next_event(&mut self) -> Result<ServerPacket, SessionError> {
        let packet = self.reader.recv::<ServerPacket>().await?;
        if let Err(e) = self.replica.apply(&packet) {
            warn!(error = %e, "本地棋盘副本更新失败");
            return Err(e);
        }
        Ok(packet)
    }

    /// 关闭写端
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
