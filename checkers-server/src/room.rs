//! 房间系统

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use protocol::{
    Board, BoardError, Cell, Color, MoveOutcome, GENERATED_ROOM_CODE_LEN, MAX_ROOM_CODE_LEN,
    MIN_ROOM_CODE_LEN, PROMOTION_BONUS,
};
use rand::Rng;
use thiserror::Error;

use crate::client::ConnId;
use crate::storage::{MatchReport, SideReport};

/// 房间状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// 0 或 1 人
    Open,
    /// 2 人，等待准备
    Full,
    /// 对局中
    InProgress,
    /// 对局结束，等待再来一局
    Finished,
}

impl RoomState {
    pub fn name(&self) -> &'static str {
        match self {
            RoomState::Open => "等待加入",
            RoomState::Full => "等待准备",
            RoomState::InProgress => "对局中",
            RoomState::Finished => "已结束",
        }
    }
}

/// 房间内的操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("房间已满")]
    Full,

    #[error("对局未开始")]
    NotInProgress,

    #[error("对局进行中")]
    AlreadyInProgress,

    #[error("不是你的回合")]
    NotYourTurn,

    #[error("{0} 上没有你的棋子")]
    NotYourPiece(Cell),

    #[error("无效走法: {0} -> {1}")]
    IllegalMove(Cell, Cell),

    #[error("必须继续用 {0} 上的棋子吃子")]
    MustContinueFrom(Cell),

    #[error("连吃时必须吃子")]
    MustCapture,

    #[error("没有可取消的连吃")]
    NoContinuation,

    #[error("不在房间中")]
    NotInRoom,
}

impl RoomError {
    /// 是否为状态错误（数据包出现在错误的阶段）
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, RoomError::NotInProgress | RoomError::AlreadyInProgress)
    }
}

/// 一方的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub score: u32,
    pub king_count: u32,
    /// 本方剩余棋子数，对方吃子时减少
    pub remaining_pieces: u32,
}

/// 座位（按加入顺序）
#[derive(Debug, Clone, Copy)]
struct Seat {
    conn: ConnId,
    ready: bool,
}

/// 走子后轮到谁
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTurn {
    /// 同一方必须继续从该格吃子
    Continue(Cell),
    /// 轮到对方
    Pass(Color),
    /// 对局结束（胜方，僵局时为 None）
    Concluded(Option<Color>),
}

/// 一次走子的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub mover: Color,
    pub outcome: MoveOutcome,
    pub next: NextTurn,
}

/// 准备后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// 还在等对方
    Waiting,
    /// 双方就绪，对局开始
    Started,
}

/// 离开房间的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// 留下的一方
    pub remaining: Option<ConnId>,
}

/// 房间
pub struct Room {
    pub code: String,
    pub state: RoomState,
    seats: Vec<Seat>,
    board: Board,
    black_stats: Statistics,
    white_stats: Statistics,
    turn: Color,
    forced: Option<Cell>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Room {
    /// 创建新房间（空棋盘）
    pub fn new(code: String, board_size: usize) -> Result<Self, BoardError> {
        Ok(Self {
            code,
            state: RoomState::Open,
            seats: Vec::with_capacity(2),
            board: Board::new(board_size, board_size)?,
            black_stats: Statistics::default(),
            white_stats: Statistics::default(),
            turn: Color::Black,
            forced: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    /// 连吃中必须使用的棋子位置
    pub fn forced(&self) -> Option<Cell> {
        self.forced
    }

    pub fn statistics(&self, color: Color) -> Statistics {
        match color {
            Color::Black => self.black_stats,
            Color::White => self.white_stats,
        }
    }

    fn statistics_mut(&mut self, color: Color) -> &mut Statistics {
        match color {
            Color::Black => &mut self.black_stats,
            Color::White => &mut self.white_stats,
        }
    }

    pub fn is_full(&self) -> bool {
        self.seats.len() == 2
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn has_client(&self, conn: ConnId) -> bool {
        self.seats.iter().any(|s| s.conn == conn)
    }

    /// 房间内的连接（按加入顺序）
    pub fn clients(&self) -> Vec<ConnId> {
        self.seats.iter().map(|s| s.conn).collect()
    }

    /// 连接的颜色：先加入者执黑
    pub fn color_of(&self, conn: ConnId) -> Option<Color> {
        match self.seats.iter().position(|s| s.conn == conn)? {
            0 => Some(Color::Black),
            _ => Some(Color::White),
        }
    }

    /// 执某色的连接
    pub fn client_of(&self, color: Color) -> Option<ConnId> {
        let index = match color {
            Color::Black => 0,
            Color::White => 1,
        };
        self.seats.get(index).map(|s| s.conn)
    }

    pub fn is_ready(&self, conn: ConnId) -> bool {
        self.seats.iter().any(|s| s.conn == conn && s.ready)
    }

    /// 加入房间
    pub fn join(&mut self, conn: ConnId) -> Result<(), RoomError> {
        if self.has_client(conn) {
            return Ok(());
        }
        if self.is_full() {
            return Err(RoomError::Full);
        }
        if self.state == RoomState::InProgress {
            return Err(RoomError::AlreadyInProgress);
        }

        self.seats.push(Seat { conn, ready: false });
        self.state = if self.is_full() {
            RoomState::Full
        } else {
            RoomState::Open
        };
        Ok(())
    }

    /// 准备；双方都准备好时开始对局
    pub fn set_ready(&mut self, conn: ConnId) -> Result<ReadyOutcome, RoomError> {
        match self.state {
            RoomState::InProgress => return Err(RoomError::AlreadyInProgress),
            RoomState::Finished => {
                // 再来一局
                for seat in &mut self.seats {
                    seat.ready = false;
                }
                self.state = RoomState::Full;
            }
            RoomState::Open | RoomState::Full => {}
        }

        let seat = self
            .seats
            .iter_mut()
            .find(|s| s.conn == conn)
            .ok_or(RoomError::NotInRoom)?;
        seat.ready = true;

        if self.state == RoomState::Full && self.seats.iter().all(|s| s.ready) {
            self.start();
            Ok(ReadyOutcome::Started)
        } else {
            Ok(ReadyOutcome::Waiting)
        }
    }

    /// 开始对局
    fn start(&mut self) {
        self.board.setup();
        self.black_stats = Statistics {
            remaining_pieces: self.board.count(Color::Black) as u32,
            ..Statistics::default()
        };
        self.white_stats = Statistics {
            remaining_pieces: self.board.count(Color::White) as u32,
            ..Statistics::default()
        };
        self.turn = Color::Black;
        self.forced = None;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.state = RoomState::InProgress;
    }

    /// 执行走子
    pub fn play(&mut self, conn: ConnId, source: Cell, destination: Cell) -> Result<MoveReport, RoomError> {
        if self.state != RoomState::InProgress {
            return Err(RoomError::NotInProgress);
        }

        let mover = self.color_of(conn).ok_or(RoomError::NotInRoom)?;
        if mover != self.turn {
            return Err(RoomError::NotYourTurn);
        }

        match self.board.piece_at(source) {
            Ok(Some(piece)) if piece.color() == mover => {}
            Ok(_) => return Err(RoomError::NotYourPiece(source)),
            Err(_) => return Err(RoomError::IllegalMove(source, destination)),
        }

        if let Some(forced) = self.forced {
            if source != forced {
                return Err(RoomError::MustContinueFrom(forced));
            }
        }

        if !self.board.legal_destinations(source).contains(&destination) {
            return Err(RoomError::IllegalMove(source, destination));
        }

        if self.forced.is_some() && self.board.move_piece(source, destination, false).is_empty() {
            return Err(RoomError::MustCapture);
        }

        let outcome = self.board.apply_move(source, destination);
        let captures = outcome.captured.len() as u32;

        let stats = self.statistics_mut(mover);
        stats.score += captures;
        if outcome.promoted {
            stats.score += PROMOTION_BONUS;
            stats.king_count += 1;
        }
        let opponent = self.statistics_mut(mover.opponent());
        opponent.remaining_pieces = opponent.remaining_pieces.saturating_sub(captures);

        let next = if self.board.winner().is_some() || self.board.is_blocked() {
            self.forced = None;
            NextTurn::Concluded(self.board.winner())
        } else if captures > 0 && self.board.can_capture_from(destination) {
            self.forced = Some(destination);
            NextTurn::Continue(destination)
        } else {
            self.forced = None;
            self.turn = mover.opponent();
            NextTurn::Pass(self.turn)
        };

        Ok(MoveReport {
            mover,
            outcome,
            next,
        })
    }

    /// 放弃继续连吃，交出回合
    pub fn cancel(&mut self, conn: ConnId) -> Result<Color, RoomError> {
        let color = self.color_of(conn).ok_or(RoomError::NotInRoom)?;
        if self.state != RoomState::InProgress || self.forced.is_none() {
            return Err(RoomError::NoContinuation);
        }
        if color != self.turn {
            return Err(RoomError::NotYourTurn);
        }

        self.forced = None;
        self.turn = color.opponent();
        Ok(self.turn)
    }

    /// 结束对局
    pub fn finish(&mut self) {
        self.state = RoomState::Finished;
        self.forced = None;
        self.ended_at = Some(Utc::now());
    }

    /// 离开房间
    ///
    /// 对局中离开时调用方应先结算（`finish`），这里只负责座位。
    pub fn leave(&mut self, conn: ConnId) -> LeaveOutcome {
        self.seats.retain(|s| s.conn != conn);
        for seat in &mut self.seats {
            seat.ready = false;
        }
        self.state = RoomState::Open;
        self.forced = None;

        LeaveOutcome {
            remaining: self.seats.first().map(|s| s.conn),
        }
    }

    /// 直接替换棋盘并重新统计剩余棋子
    #[cfg(test)]
    pub(crate) fn replace_board(&mut self, board: Board) {
        self.board = board;
        self.black_stats.remaining_pieces = self.board.count(Color::Black) as u32;
        self.white_stats.remaining_pieces = self.board.count(Color::White) as u32;
    }

    /// 生成结算数据
    pub fn report<'a>(&self, pseudonym: impl Fn(ConnId) -> Option<&'a str>) -> Option<MatchReport> {
        let side = |color: Color| -> Option<SideReport> {
            let stats = self.statistics(color);
            Some(SideReport {
                pseudonym: pseudonym(self.client_of(color)?)?.to_string(),
                score: stats.score,
                king_count: stats.king_count,
                remaining_pieces: stats.remaining_pieces,
            })
        };

        Some(MatchReport {
            black: side(Color::Black)?,
            white: side(Color::White)?,
            started_at: self.started_at?,
            ended_at: self.ended_at.unwrap_or_else(Utc::now),
        })
    }
}

/// 房间管理器
pub struct RoomManager {
    rooms: HashMap<String, Room>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// 验证房间号
    pub fn validate_code(code: &str) -> Result<(), &'static str> {
        let len = code.chars().count();
        if len < MIN_ROOM_CODE_LEN {
            return Err("房间号太短");
        }
        if len > MAX_ROOM_CODE_LEN {
            return Err("房间号太长");
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err("房间号包含非法字符");
        }
        Ok(())
    }

    /// 生成未被占用的随机房间号
    pub fn generate_code(&self) -> String {
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..GENERATED_ROOM_CODE_LEN)
                .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// 获取房间，不存在时创建
    pub fn get_or_create(&mut self, code: &str, board_size: usize) -> Result<(&mut Room, bool), BoardError> {
        match self.rooms.entry(code.to_string()) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => {
                let room = Room::new(code.to_string(), board_size)?;
                Ok((entry.insert(room), true))
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn remove(&mut self, code: &str) -> Option<Room> {
        self.rooms.remove(code)
    }

    /// 所有房间（按房间号排序）
    pub fn list(&self) -> Vec<&Room> {
        let mut rooms: Vec<&Room> = self.rooms.values().collect();
        rooms.sort_by(|a, b| a.code.cmp(&b.code));
        rooms
    }

    /// 对局中的房间号
    pub fn in_progress(&self) -> Vec<String> {
        self.rooms
            .values()
            .filter(|r| r.state == RoomState::InProgress)
            .map(|r| r.code.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
