//! 对局结果存储
//!
//! 对局结束后写入五张表：对局、玩家、统计、队伍与比赛。
//! 关系型数据库由外部服务提供，这里通过 `MatchStore` trait 与之对接，
//! 自带 JSON 账本与内存两种后端。

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub type GameId = u64;
pub type PlayerId = u64;
pub type StatsId = u64;
pub type TeamId = u64;

/// 存储错误
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger format error: {0}")]
    Format(#[from] serde_json::Error),

    /// 引用了不存在的记录
    #[error("Unknown {table} id: {id}")]
    UnknownReference { table: &'static str, id: u64 },

    /// 后端暂不可用
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// 存储协作方
pub trait MatchStore: Send {
    /// 新建一局，返回对局 ID
    fn create_game(&mut self) -> Result<GameId, PersistenceError>;

    /// 按昵称查找或创建玩家（幂等）
    fn ensure_player(&mut self, pseudonym: &str) -> Result<PlayerId, PersistenceError>;

    /// 写入一方的统计
    fn record_statistics(
        &mut self,
        score: u32,
        king_count: u32,
        remaining: u32,
    ) -> Result<StatsId, PersistenceError>;

    /// 关联玩家与统计
    fn record_team(&mut self, player: PlayerId, stats: StatsId) -> Result<TeamId, PersistenceError>;

    /// 写入比赛记录
    fn record_match(
        &mut self,
        game: GameId,
        team_black: TeamId,
        team_white: TeamId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
}

/// 一方的结算数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideReport {
    pub pseudonym: String,
    pub score: u32,
    pub king_count: u32,
    pub remaining_pieces: u32,
}

/// 一局的结算数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub black: SideReport,
    pub white: SideReport,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// 写入一局结果
///
/// 每个操作最多尝试 `attempts` 次，全部失败时返回最后一次的错误，由调用方记录后跳过。
pub fn record_report(
    store: &mut dyn MatchStore,
    report: &MatchReport,
    attempts: u32,
) -> Result<GameId, PersistenceError> {
    let attempts = attempts.max(1);

    let game = retry(attempts, "create_game", || store.create_game())?;

    let mut teams = Vec::with_capacity(2);
    for side in [&report.black, &report.white] {
        let player = retry(attempts, "ensure_player", || store.ensure_player(&side.pseudonym))?;
        let stats = retry(attempts, "record_statistics", || {
            store.record_statistics(side.score, side.king_count, side.remaining_pieces)
        })?;
        teams.push(retry(attempts, "record_team", || store.record_team(player, stats))?);
    }

    retry(attempts, "record_match", || {
        store.record_match(game, teams[0], teams[1], report.started_at, report.ended_at)
    })?;

    Ok(game)
}

fn retry<T>(
    attempts: u32,
    operation: &str,
    mut f: impl FnMut() -> Result<T, PersistenceError>,
) -> Result<T, PersistenceError> {
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(operation, attempt, error = %e, "存储操作失败，重试");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// 账本表
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRow {
    pub id: GameId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub id: PlayerId,
    pub pseudonym: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRow {
    pub id: StatsId,
    pub score: u32,
    pub king_count: u32,
    pub remaining_pieces: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRow {
    pub id: TeamId,
    pub player: PlayerId,
    pub statistics: StatsId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRow {
    pub game: GameId,
    pub team_black: TeamId,
    pub team_white: TeamId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// 全部表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub games: Vec<GameRow>,
    pub players: Vec<PlayerRow>,
    pub statistics: Vec<StatsRow>,
    pub teams: Vec<TeamRow>,
    pub matches: Vec<MatchRow>,
}

impl Ledger {
    fn create_game(&mut self) -> GameId {
        let id = self.games.last().map_or(1, |row| row.id + 1);
        self.games.push(GameRow {
            id,
            created_at: Utc::now(),
        });
        id
    }

    fn ensure_player(&mut self, pseudonym: &str) -> PlayerId {
        if let Some(row) = self.players.iter().find(|row| row.pseudonym == pseudonym) {
            return row.id;
        }
        let id = self.players.last().map_or(1, |row| row.id + 1);
        self.players.push(PlayerRow {
            id,
            pseudonym: pseudonym.to_string(),
        });
        id
    }

    fn record_statistics(&mut self, score: u32, king_count: u32, remaining: u32) -> StatsId {
        let id = self.statistics.last().map_or(1, |row| row.id + 1);
        self.statistics.push(StatsRow {
            id,
            score,
            king_count,
            remaining_pieces: remaining,
        });
        id
    }

    fn record_team(&mut self, player: PlayerId, stats: StatsId) -> Result<TeamId, PersistenceError> {
        if !self.players.iter().any(|row| row.id == player) {
            return Err(PersistenceError::UnknownReference { table: "players", id: player });
        }
        if !self.statistics.iter().any(|row| row.id == stats) {
            return Err(PersistenceError::UnknownReference { table: "statistics", id: stats });
        }

        let id = self.teams.last().map_or(1, |row| row.id + 1);
        self.teams.push(TeamRow {
            id,
            player,
            statistics: stats,
        });
        Ok(id)
    }

    fn record_match(&mut self, row: MatchRow) -> Result<(), PersistenceError> {
        if !self.games.iter().any(|g| g.id == row.game) {
            return Err(PersistenceError::UnknownReference { table: "games", id: row.game });
        }
        for team in [row.team_black, row.team_white] {
            if !self.teams.iter().any(|t| t.id == team) {
                return Err(PersistenceError::UnknownReference { table: "teams", id: team });
            }
        }
        self.matches.push(row);
        Ok(())
    }
}

// ============================================================================
// JSON 账本后端
// ============================================================================

/// JSON 账本存储，每次写入后整体原子替换文件
pub struct LedgerStore {
    path: PathBuf,
    ledger: Ledger,
}

impl LedgerStore {
    /// 打开账本（文件不存在时新建）
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let ledger = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Ledger::default()
        };

        info!(path = %path.display(), matches = ledger.matches.len(), "账本已打开");
        Ok(Self { path, ledger })
    }

    /// 默认账本位置：`<data_dir>/checkers/<base>.json`
    pub fn default_path(base: &str) -> Option<PathBuf> {
        let data_dir = dirs::data_dir()?;
        Some(data_dir.join("checkers").join(format!("{}.json", sanitize_filename(base))))
    }

    /// 账本文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 已记录的比赛
    pub fn list_matches(&self) -> &[MatchRow] {
        &self.ledger.matches
    }

    /// 已记录的玩家
    pub fn players(&self) -> &[PlayerRow] {
        &self.ledger.players
    }

    /// 写入临时文件后重命名
    fn flush(&self) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(&self.ledger)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// 修改后立即落盘，失败时回滚内存中的表
    fn commit<T>(
        &mut self,
        f: impl FnOnce(&mut Ledger) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let snapshot = self.ledger.clone();
        let value = f(&mut self.ledger)?;
        if let Err(e) = self.flush() {
            self.ledger = snapshot;
            return Err(e);
        }
        Ok(value)
    }
}

impl MatchStore for LedgerStore {
    fn create_game(&mut self) -> Result<GameId, PersistenceError> {
        self.commit(|ledger| Ok(ledger.create_game()))
    }

    fn ensure_player(&mut self, pseudonym: &str) -> Result<PlayerId, PersistenceError> {
        self.commit(|ledger| Ok(ledger.ensure_player(pseudonym)))
    }

    fn record_statistics(
        &mut self,
        score: u32,
        king_count: u32,
        remaining: u32,
    ) -> Result<StatsId, PersistenceError> {
        self.commit(|ledger| Ok(ledger.record_statistics(score, king_count, remaining)))
    }

    fn record_team(&mut self, player: PlayerId, stats: StatsId) -> Result<TeamId, PersistenceError> {
        self.commit(|ledger| ledger.record_team(player, stats))
    }

    fn record_match(
        &mut self,
        game: GameId,
        team_black: TeamId,
        team_white: TeamId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.commit(|ledger| {
            ledger.record_match(MatchRow {
                game,
                team_black,
                team_white,
                started_at,
                ended_at,
            })
        })
    }
}

// ============================================================================
// 内存后端
// ============================================================================

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Ledger,
    /// 接下来要模拟失败的操作次数
    failures: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来的 `failures` 次操作返回 `Unavailable`
    pub fn failing(failures: u32) -> Self {
        Self {
            ledger: Ledger::default(),
            failures,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn check(&mut self) -> Result<(), PersistenceError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(PersistenceError::Unavailable("simulated failure".to_string()));
        }
        Ok(())
    }
}

impl MatchStore for MemoryStore {
    fn create_game(&mut self) -> Result<GameId, PersistenceError> {
        self.check()?;
        Ok(self.ledger.create_game())
    }

    fn ensure_player(&mut self, pseudonym: &str) -> Result<PlayerId, PersistenceError> {
        self.check()?;
        Ok(self.ledger.ensure_player(pseudonym))
    }

    fn record_statistics(
        &mut self,
        score: u32,
        king_count: u32,
        remaining: u32,
    ) -> Result<StatsId, PersistenceError> {
        self.check()?;
        Ok(self.ledger.record_statistics(score, king_count, remaining))
    }

    fn record_team(&mut self, player: PlayerId, stats: StatsId) -> Result<TeamId, PersistenceError> {
        self.check()?;
        self.ledger.record_team(player, stats)
    }

    fn record_match(
        &mut self,
        game: GameId,
        team_black: TeamId,
        team_white: TeamId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        self.ledger.record_match(MatchRow {
            game,
            team_black,
            team_white,
            started_at,
            ended_at,
        })
    }
}

/// 清理文件名中的特殊字符
pub(crate) fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
