//! 棋盘状态与走子规则
//!
//! 棋盘是纯状态机，不做任何 I/O。坐标以 `(x, y)` 表示，
//! 黑方从 y=0 一侧向 y 增大方向前进，白方相反。

use crate::constants::{DEFAULT_BOARD_SIZE, MAX_BOARD_SIZE, MIN_BOARD_SIZE};
use crate::error::BoardError;
use crate::piece::{Cell, Color, Piece};

/// 四个斜向
const DIAGONALS: [(i32, i32); 4] = [(1, 1), (-1, 1), (1, -1), (-1, -1)];

/// 提交走法的结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MoveOutcome {
    /// 被吃掉的格子
    pub captured: Vec<Cell>,
    /// 是否在本步升王
    pub promoted: bool,
}

/// 棋盘
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    width: usize,
    height: usize,
    /// 索引为 y * width + x
    squares: Vec<Option<Piece>>,
}

impl Board {
    /// 创建空棋盘
    pub fn new(width: usize, height: usize) -> Result<Self, BoardError> {
        let valid = MIN_BOARD_SIZE..=MAX_BOARD_SIZE;
        if !valid.contains(&width) || !valid.contains(&height) {
            return Err(BoardError::InvalidSize { width, height });
        }
        Ok(Self {
            width,
            height,
            squares: vec![None; width * height],
        })
    }

    /// 8x8 开局棋盘
    pub fn standard() -> Self {
        let mut board = Self {
            width: DEFAULT_BOARD_SIZE,
            height: DEFAULT_BOARD_SIZE,
            squares: vec![None; DEFAULT_BOARD_SIZE * DEFAULT_BOARD_SIZE],
        };
        board.setup();
        board
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// 格子是否在棋盘内
    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && (cell.x as usize) < self.width && (cell.y as usize) < self.height
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        if self.contains(cell) {
            Some(cell.y as usize * self.width + cell.x as usize)
        } else {
            None
        }
    }

    fn checked_index(&self, cell: Cell) -> Result<usize, BoardError> {
        self.index(cell).ok_or(BoardError::OutOfBounds { x: cell.x, y: cell.y })
    }

    /// 清空棋盘
    pub fn clear(&mut self) {
        self.squares.iter_mut().for_each(|square| *square = None);
    }

    /// 摆出开局：两端各 `height / 2 - 1` 排兵，只占深色格
    pub fn setup(&mut self) {
        self.clear();
        let rows = self.height / 2 - 1;
        let height = self.height as i32;

        for y in 0..rows as i32 {
            self.fill_row(y, Piece::BlackMan);
        }
        for y in (height - rows as i32)..height {
            self.fill_row(y, Piece::WhiteMan);
        }
    }

    fn fill_row(&mut self, y: i32, piece: Piece) {
        for x in 0..self.width as i32 {
            let cell = Cell::new(x, y);
            if cell.is_dark() {
                if let Some(index) = self.index(cell) {
                    self.squares[index] = Some(piece);
                }
            }
        }
    }

    /// 获取指定位置的棋子，越界报错
    pub fn piece_at(&self, cell: Cell) -> Result<Option<Piece>, BoardError> {
        Ok(self.squares[self.checked_index(cell)?])
    }

    /// 获取指定位置的棋子，越界视为空
    pub fn get(&self, cell: Cell) -> Option<Piece> {
        self.index(cell).and_then(|index| self.squares[index])
    }

    /// 放置棋子
    pub fn place(&mut self, cell: Cell, piece: Piece) -> Result<(), BoardError> {
        let index = self.checked_index(cell)?;
        self.squares[index] = Some(piece);
        Ok(())
    }

    /// 移除棋子，返回原来的棋子
    pub fn remove(&mut self, cell: Cell) -> Result<Option<Piece>, BoardError> {
        let index = self.checked_index(cell)?;
        Ok(self.squares[index].take())
    }

    /// 计算 `cell` 上棋子的所有合法落点
    ///
    /// 兵只看两个前进斜向：一步空格可走，相邻敌子且其后为空则可跳吃。
    /// 王看四个斜向，沿斜线走到第一个有子的格子为止；若该子为敌子且紧邻其后的
    /// 格子为空，则该格为吃子落点。
    pub fn legal_destinations(&self, cell: Cell) -> Vec<Cell> {
        let Some(piece) = self.get(cell) else {
            return Vec::new();
        };
        let color = piece.color();
        let mut destinations = Vec::new();

        if piece.is_king() {
            let max_distance = self.width.max(self.height) as i32 - 1;
            for (dx, dy) in DIAGONALS {
                for distance in 1..=max_distance {
                    let target = cell.offset(dx * distance, dy * distance);
                    if !self.contains(target) {
                        break;
                    }
                    match self.get(target) {
                        None => destinations.push(target),
                        Some(occupant) => {
                            if occupant.color() != color {
                                self.push_jump(target, dx, dy, &mut destinations);
                            }
                            break;
                        }
                    }
                }
            }
        } else {
            let dy = color.forward();
            for dx in [-1, 1] {
                let step = cell.offset(dx, dy);
                if !self.contains(step) {
                    continue;
                }
                match self.get(step) {
                    None => destinations.push(step),
                    Some(occupant) if occupant.color() != color => {
                        self.push_jump(step, dx, dy, &mut destinations);
                    }
                    Some(_) => {}
                }
            }
        }

        destinations
    }

    /// 敌子后面紧邻的空格
    fn push_jump(&self, enemy: Cell, dx: i32, dy: i32, destinations: &mut Vec<Cell>) {
        let landing = enemy.offset(dx, dy);
        if self.contains(landing) && self.get(landing).is_none() {
            destinations.push(landing);
        }
    }

    /// 起点与终点之间（不含两端）被占据的格子
    fn occupied_between(&self, source: Cell, destination: Cell) -> Vec<Cell> {
        let dx = destination.x - source.x;
        let dy = destination.y - source.y;
        let (sx, sy) = (dx.signum(), dy.signum());

        (1..dx.abs())
            .map(|step| source.offset(sx * step, sy * step))
            .filter(|cell| self.get(*cell).is_some())
            .collect()
    }

    /// 移动棋子，返回被吃掉的格子
    ///
    /// `commit` 为 false 时只做试算，不修改棋盘。
    ///
    /// # Panics
    ///
    /// 起点为空、任一端越界或不在同一斜线上时 panic：调用方必须先用
    /// [`Board::legal_destinations`] 校验。
    pub fn move_piece(&mut self, source: Cell, destination: Cell, commit: bool) -> Vec<Cell> {
        if commit {
            self.apply_move(source, destination).captured
        } else {
            self.assert_move_shape(source, destination);
            self.occupied_between(source, destination)
        }
    }

    /// 提交走法：吃子、落子、升王
    pub fn apply_move(&mut self, source: Cell, destination: Cell) -> MoveOutcome {
        let piece = self.assert_move_shape(source, destination);
        let captured = self.occupied_between(source, destination);

        for cell in &captured {
            if let Some(index) = self.index(*cell) {
                self.squares[index] = None;
            }
        }

        let landing = if destination.y == piece.color().promotion_row(self.height) {
            piece.to_king()
        } else {
            piece
        };

        if let (Some(from), Some(to)) = (self.index(source), self.index(destination)) {
            self.squares[from] = None;
            self.squares[to] = Some(landing);
        }

        MoveOutcome {
            captured,
            promoted: landing != piece,
        }
    }

    fn assert_move_shape(&self, source: Cell, destination: Cell) -> Piece {
        assert!(
            self.contains(source) && self.contains(destination),
            "move out of bounds: {} -> {}",
            source,
            destination
        );
        let dx = destination.x - source.x;
        let dy = destination.y - source.y;
        assert!(
            dx != 0 && dx.abs() == dy.abs(),
            "move is not diagonal: {} -> {}",
            source,
            destination
        );
        match self.get(source) {
            Some(piece) => piece,
            None => panic!("no piece at {}", source),
        }
    }

    /// 会吃子的合法落点
    pub fn capture_destinations(&self, cell: Cell) -> Vec<Cell> {
        self.legal_destinations(cell)
            .into_iter()
            .filter(|destination| !self.occupied_between(cell, *destination).is_empty())
            .collect()
    }

    /// 该棋子能否继续吃子
    pub fn can_capture_from(&self, cell: Cell) -> bool {
        !self.capture_destinations(cell).is_empty()
    }

    /// 某一方的所有棋子
    pub fn pieces(&self, color: Color) -> Vec<(Cell, Piece)> {
        self.cells()
            .filter_map(|cell| self.get(cell).map(|piece| (cell, piece)))
            .filter(|(_, piece)| piece.color() == color)
            .collect()
    }

    /// 某一方的棋子数
    pub fn count(&self, color: Color) -> usize {
        self.squares
            .iter()
            .flatten()
            .filter(|piece| piece.color() == color)
            .count()
    }

    fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.height as i32)
            .flat_map(move |y| (0..self.width as i32).map(move |x| Cell::new(x, y)))
    }

    /// 一方没有棋子时另一方获胜
    pub fn winner(&self) -> Option<Color> {
        if self.count(Color::Black) == 0 {
            Some(Color::White)
        } else if self.count(Color::White) == 0 {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// 某一方是否还有可走的棋
    pub fn has_moves(&self, color: Color) -> bool {
        self.pieces(color)
            .iter()
            .any(|(cell, _)| !self.legal_destinations(*cell).is_empty())
    }

    /// 双方都无棋可走（和棋）
    pub fn is_blocked(&self) -> bool {
        !self.has_moves(Color::Black) && !self.has_moves(Color::White)
    }

    /// 线上格式：`matrix[x][y]`
    pub fn to_matrix(&self) -> Vec<Vec<Option<Piece>>> {
        (0..self.width as i32)
            .map(|x| {
                (0..self.height as i32)
                    .map(|y| self.get(Cell::new(x, y)))
                    .collect()
            })
            .collect()
    }

    /// 从线上格式重建棋盘
    pub fn from_matrix(matrix: &[Vec<Option<Piece>>]) -> Result<Self, BoardError> {
        let width = matrix.len();
        let height = matrix.first().map(Vec::len).unwrap_or(0);
        let mut board = Self::new(width, height)?;

        for (x, column) in matrix.iter().enumerate() {
            if column.len() != height {
                return Err(BoardError::InvalidSize {
                    width,
                    height: column.len(),
                });
            }
            for (y, square) in column.iter().enumerate() {
                if let Some(piece) = square {
                    board.place(Cell::new(x as i32, y as i32), *piece)?;
                }
            }
        }

        Ok(board)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "   ")?;
        for x in 0..self.width {
            write!(f, "{:>2}", x)?;
        }
        writeln!(f)?;

        for y in 0..self.height as i32 {
            write!(f, "{:>2} ", y)?;
            for x in 0..self.width as i32 {
                let cell = Cell::new(x, y);
                let c = match self.get(cell) {
                    Some(piece) => piece.display_char(),
                    None if cell.is_dark() => '.',
                    None => ' ',
                };
                write!(f, " {}", c)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
