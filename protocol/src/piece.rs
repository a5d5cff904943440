//! 棋子定义

use serde::{Deserialize, Serialize};

use crate::error::BoardError;

/// 阵营
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Color {
    /// 黑方（先手，从 y=0 一侧出发）
    Black = 1,
    /// 白方（后手，从 y=height-1 一侧出发）
    White = 2,
}

impl Color {
    /// 获取对方阵营
    pub fn opponent(&self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// 前进方向（y 轴符号）
    pub fn forward(&self) -> i32 {
        match self {
            Color::Black => 1,
            Color::White => -1,
        }
    }

    /// 升王所在行
    pub fn promotion_row(&self, height: usize) -> i32 {
        match self {
            Color::Black => height as i32 - 1,
            Color::White => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Color::Black => "黑方",
            Color::White => "白方",
        }
    }
}

impl From<Color> for u8 {
    fn from(color: Color) -> u8 {
        color as u8
    }
}

impl TryFrom<u8> for Color {
    type Error = BoardError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Color::Black),
            2 => Ok(Color::White),
            other => Err(BoardError::InvalidPieceCode(other)),
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 棋子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Piece {
    BlackMan = 1,
    WhiteMan = 2,
    BlackKing = 3,
    WhiteKing = 4,
}

impl Piece {
    /// 某一方的兵
    pub fn man(color: Color) -> Self {
        match color {
            Color::Black => Piece::BlackMan,
            Color::White => Piece::WhiteMan,
        }
    }

    /// 某一方的王
    pub fn king(color: Color) -> Self {
        match color {
            Color::Black => Piece::BlackKing,
            Color::White => Piece::WhiteKing,
        }
    }

    pub fn color(&self) -> Color {
        color_of(*self)
    }

    /// 升王（幂等）
    pub fn to_king(&self) -> Piece {
        promote(*self)
    }

    pub fn is_king(&self) -> bool {
        matches!(self, Piece::BlackKing | Piece::WhiteKing)
    }

    /// 线上编码
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// 终端显示字符
    pub fn display_char(&self) -> char {
        match self {
            Piece::BlackMan => 'b',
            Piece::WhiteMan => 'w',
            Piece::BlackKing => 'B',
            Piece::WhiteKing => 'W',
        }
    }
}

/// 去掉等级，只保留颜色
pub fn color_of(piece: Piece) -> Color {
    match piece {
        Piece::BlackMan | Piece::BlackKing => Color::Black,
        Piece::WhiteMan | Piece::WhiteKing => Color::White,
    }
}

/// 升王，对王调用不产生变化
pub fn promote(piece: Piece) -> Piece {
    Piece::king(color_of(piece))
}

impl From<Piece> for u8 {
    fn from(piece: Piece) -> u8 {
        piece.code()
    }
}

impl TryFrom<u8> for Piece {
    type Error = BoardError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Piece::BlackMan),
            2 => Ok(Piece::WhiteMan),
            3 => Ok(Piece::BlackKing),
            4 => Ok(Piece::WhiteKing),
            other => Err(BoardError::InvalidPieceCode(other)),
        }
    }
}

/// 棋盘格子，线上格式为 `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 获取偏移后的格子（不检查边界）
    pub fn offset(&self, dx: i32, dy: i32) -> Cell {
        Cell::new(self.x + dx, self.y + dy)
    }

    /// 是否为深色格（开局摆子的格子）
    pub fn is_dark(&self) -> bool {
        (self.x + self.y).rem_euclid(2) == 1
    }
}

impl From<(i32, i32)> for Cell {
    fn from((x, y): (i32, i32)) -> Self {
        Cell::new(x, y)
    }
}

impl From<Cell> for (i32, i32) {
    fn from(cell: Cell) -> Self {
        (cell.x, cell.y)
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
