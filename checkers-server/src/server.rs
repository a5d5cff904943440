//! 服务器主逻辑

use std::sync::Arc;

use protocol::{
    Cell, ClientPacket, Color, ProtocolError, ServerPacket, DEFAULT_BOARD_SIZE, MAX_BOARD_SIZE,
    MAX_CHAT_LEN, MIN_BOARD_SIZE,
};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::client::{ClientManager, ConnId};
use crate::room::{NextTurn, ReadyOutcome, RoomError, RoomManager, RoomState};
use crate::storage::{record_report, MatchStore, MemoryStore};

/// 跨任务共享的服务器状态
pub type SharedState = Arc<Mutex<ServerState>>;

/// 执行阻塞的存储写入
///
/// 在多线程运行时上用 `block_in_place` 让出工作线程，其余情况直接执行。
fn blocking_io<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// 客户端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// 违反规则，连接保持
    #[error("{0}")]
    Rule(String),

    /// 在错误的阶段发送数据包，回复后关闭连接
    #[error("{0}")]
    Protocol(String),

    /// 负载无法解码，回复后关闭连接
    #[error("{0}")]
    Decode(String),
}

impl Fault {
    fn rule(message: impl Into<String>) -> Self {
        Fault::Rule(message.into())
    }

    fn protocol(message: impl Into<String>) -> Self {
        Fault::Protocol(message.into())
    }

    /// 是否需要关闭连接
    pub fn closes_connection(&self) -> bool {
        !matches!(self, Fault::Rule(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Fault::Rule(_) => "rule",
            Fault::Protocol(_) => "protocol",
            Fault::Decode(_) => "decode",
        }
    }
}

impl From<RoomError> for Fault {
    fn from(e: RoomError) -> Self {
        if e.is_protocol_violation() {
            Fault::Protocol(e.to_string())
        } else {
            Fault::Rule(e.to_string())
        }
    }
}

impl From<ProtocolError> for Fault {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::UnknownPacketType(_) => Fault::Protocol(e.to_string()),
            other => Fault::Decode(other.to_string()),
        }
    }
}

/// 服务器状态
pub struct ServerState {
    pub clients: ClientManager,
    pub rooms: RoomManager,
    store: Box<dyn MatchStore>,
    /// 每个存储操作的尝试次数
    attempts: u32,
}

impl ServerState {
    pub fn new(store: Box<dyn MatchStore>, attempts: u32) -> Self {
        Self {
            clients: ClientManager::new(),
            rooms: RoomManager::new(),
            store,
            attempts: attempts.max(1),
        }
    }

    /// 使用内存存储（测试与禁用存储时）
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()), 1)
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// 登记新连接
    pub fn connect(&mut self, outbound: mpsc::Sender<ServerPacket>, peer_addr: String) -> ConnId {
        self.clients.register(outbound, peer_addr)
    }

    /// 发送数据包给客户端
    pub fn send_to_client(&mut self, conn: ConnId, packet: ServerPacket) {
        self.clients.send(conn, packet);
    }

    /// 广播给房间内所有客户端
    pub fn broadcast_to_room(&mut self, code: &str, packet: ServerPacket) {
        let Some(room) = self.rooms.get(code) else {
            return;
        };
        for conn in room.clients() {
            self.clients.send(conn, packet.clone());
        }
    }

    /// 结算对局：写入存储后广播结果
    ///
    /// 存储失败只记录日志，不影响房间状态。
    fn finalize(&mut self, pending: &mut PendingMessages, code: &str, winner: Option<Color>) {
        let Some(room) = self.rooms.get_mut(code) else {
            return;
        };
        room.finish();

        match room.report(|conn| self.clients.pseudonym(conn)) {
            Some(report) => match blocking_io(|| record_report(self.store.as_mut(), &report, self.attempts)) {
                Ok(game) => info!(room = code, game, ?winner, "对局结束，结果已保存"),
                Err(e) => error!(room = code, error = %e, "对局结果保存失败，已跳过"),
            },
            None => warn!(room = code, "对局信息不完整，跳过保存"),
        }

        pending.broadcast(code, ServerPacket::Conclusion { winner });
    }

    /// 管理员结束对局（无胜方）
    pub fn end_match(&mut self, code: &str) -> Result<(), String> {
        let room = self.rooms.get(code).ok_or_else(|| format!("房间 {} 不存在", code))?;
        if room.state != RoomState::InProgress {
            return Err(format!("房间 {} 没有进行中的对局", code));
        }

        let mut pending = PendingMessages::new();
        self.finalize(&mut pending, code, None);
        pending.flush(self);
        Ok(())
    }

    /// 结束所有进行中的对局（关服时）
    pub fn end_all_matches(&mut self) -> usize {
        let codes = self.rooms.in_progress();
        let mut pending = PendingMessages::new();
        for code in &codes {
            self.finalize(&mut pending, code, None);
        }
        pending.flush(self);
        codes.len()
    }

    /// 房间概况（控制台使用）
    pub fn room_summaries(&self) -> Vec<String> {
        self.rooms
            .list()
            .into_iter()
            .map(|room| {
                let players: Vec<&str> = room
                    .clients()
                    .into_iter()
                    .map(|conn| self.clients.pseudonym(conn).unwrap_or("?"))
                    .collect();
                format!(
                    "{} [{}] {}x{} {}",
                    room.code,
                    room.state.name(),
                    room.board().width(),
                    room.board().height(),
                    players.join(" / ")
                )
            })
            .collect()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// 待发送的数据包（保持先后顺序）
enum Outgoing {
    Client(ConnId, ServerPacket),
    Room(String, ServerPacket),
}

struct PendingMessages {
    messages: Vec<Outgoing>,
}

impl PendingMessages {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    fn send(&mut self, conn: ConnId, packet: ServerPacket) {
        self.messages.push(Outgoing::Client(conn, packet));
    }

    fn broadcast(&mut self, code: &str, packet: ServerPacket) {
        self.messages.push(Outgoing::Room(code.to_string(), packet));
    }

    fn flush(self, state: &mut ServerState) {
        for outgoing in self.messages {
            match outgoing {
                Outgoing::Client(conn, packet) => state.send_to_client(conn, packet),
                Outgoing::Room(code, packet) => state.broadcast_to_room(&code, packet),
            }
        }
    }
}

/// 消息处理器
pub struct MessageHandler;

impl MessageHandler {
    /// 处理客户端数据包
    pub fn handle(state: &mut ServerState, conn: ConnId, packet: ClientPacket) -> Result<(), Fault> {
        let mut pending = PendingMessages::new();

        let identified = state
            .clients
            .get(conn)
            .map(|c| c.is_identified())
            .ok_or_else(|| Fault::protocol("连接不存在"))?;

        let result = match packet {
            ClientPacket::Handshake { pseudonym, board_size } => {
                if identified {
                    Err(Fault::protocol("重复握手"))
                } else {
                    Self::handle_handshake(state, &mut pending, conn, pseudonym, board_size)
                }
            }
            _ if !identified => Err(Fault::protocol("请先握手")),
            ClientPacket::Room { code } => Self::handle_room(state, &mut pending, conn, code),
            ClientPacket::Ready => Self::handle_ready(state, &mut pending, conn),
            ClientPacket::Move { source, destination } => {
                Self::handle_move(state, &mut pending, conn, source, destination)
            }
            ClientPacket::Cancel => Self::handle_cancel(state, &mut pending, conn),
            ClientPacket::Chat { text } => Self::handle_chat(state, &mut pending, conn, text),
        };

        // 出错前已排队的数据包照常发送
        pending.flush(state);

        result
    }

    /// 处理握手
    fn handle_handshake(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        conn: ConnId,
        pseudonym: String,
        board_size: Option<usize>,
    ) -> Result<(), Fault> {
        let board_size = board_size.unwrap_or(DEFAULT_BOARD_SIZE);
        if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&board_size) {
            return Err(Fault::rule(format!(
                "棋盘尺寸必须在 {} 到 {} 之间",
                MIN_BOARD_SIZE, MAX_BOARD_SIZE
            )));
        }

        state
            .clients
            .identify(conn, pseudonym.clone(), board_size)
            .map_err(Fault::rule)?;

        info!(conn, pseudonym = %pseudonym, board_size, "握手成功");
        pending.send(conn, ServerPacket::Handshake);
        Ok(())
    }

    /// 处理加入房间
    fn handle_room(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        conn: ConnId,
        code: Option<String>,
    ) -> Result<(), Fault> {
        if state.clients.room_of(conn).is_some() {
            return Err(Fault::protocol("已在房间中"));
        }

        let code = match code {
            Some(code) => {
                RoomManager::validate_code(&code).map_err(Fault::rule)?;
                code
            }
            None => state.rooms.generate_code(),
        };

        let board_size = state
            .clients
            .get(conn)
            .map_or(DEFAULT_BOARD_SIZE, |c| c.board_size);

        let (room, created) = state
            .rooms
            .get_or_create(&code, board_size)
            .map_err(|e| Fault::rule(e.to_string()))?;

        if let Err(e) = room.join(conn) {
            // 刚创建的房间不会拒绝加入
            return Err(Fault::rule(e.to_string()));
        }
        let alone = !room.is_full();

        if created {
            info!(room = %code, board_size, "房间已创建");
        }
        info!(conn, room = %code, "加入房间");

        state.clients.set_room(conn, Some(code.clone()));
        pending.send(conn, ServerPacket::Room { code });
        if alone {
            pending.send(conn, ServerPacket::Waiting);
        }
        Ok(())
    }

    /// 处理准备
    fn handle_ready(state: &mut ServerState, pending: &mut PendingMessages, conn: ConnId) -> Result<(), Fault> {
        let code = state
            .clients
            .room_of(conn)
            .map(str::to_string)
            .ok_or_else(|| Fault::protocol("不在房间中"))?;
        let room = state
            .rooms
            .get_mut(&code)
            .ok_or_else(|| Fault::protocol("房间不存在"))?;

        match room.set_ready(conn)? {
            ReadyOutcome::Waiting => {
                pending.send(conn, ServerPacket::Waiting);
            }
            ReadyOutcome::Started => {
                for color in [Color::Black, Color::White] {
                    if let Some(client) = room.client_of(color) {
                        pending.send(client, ServerPacket::Color { color });
                    }
                }
                pending.broadcast(
                    &code,
                    ServerPacket::Start {
                        board: room.board().to_matrix(),
                    },
                );
                if let Some(black) = room.client_of(Color::Black) {
                    pending.send(black, ServerPacket::Turn { forced: None });
                }
                info!(room = %code, "对局开始");
            }
        }
        Ok(())
    }

    /// 处理走子
    fn handle_move(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        conn: ConnId,
        source: Cell,
        destination: Cell,
    ) -> Result<(), Fault> {
        let code = state
            .clients
            .room_of(conn)
            .map(str::to_string)
            .ok_or_else(|| Fault::protocol("对局未开始"))?;
        let room = state
            .rooms
            .get_mut(&code)
            .ok_or_else(|| Fault::protocol("房间不存在"))?;

        let report = room.play(conn, source, destination)?;

        pending.broadcast(&code, ServerPacket::Moves { moves: vec![(source, destination)] });
        if report.outcome.promoted {
            if let Ok(Some(piece)) = room.board().piece_at(destination) {
                pending.broadcast(&code, ServerPacket::Promotion { cell: destination, piece });
            }
        }

        match report.next {
            NextTurn::Concluded(winner) => {
                state.finalize(pending, &code, winner);
            }
            NextTurn::Continue(forced) => {
                pending.send(conn, ServerPacket::Turn { forced: Some(forced) });
            }
            NextTurn::Pass(next) => {
                if let Some(opponent) = room.client_of(next) {
                    pending.send(opponent, ServerPacket::Turn { forced: None });
                }
            }
        }
        Ok(())
    }

    /// 处理放弃连吃
    fn handle_cancel(state: &mut ServerState, pending: &mut PendingMessages, conn: ConnId) -> Result<(), Fault> {
        let code = state
            .clients
            .room_of(conn)
            .map(str::to_string)
            .ok_or_else(|| Fault::from(RoomError::NoContinuation))?;
        let room = state
            .rooms
            .get_mut(&code)
            .ok_or_else(|| Fault::from(RoomError::NoContinuation))?;

        let next = room.cancel(conn)?;
        if let Some(opponent) = room.client_of(next) {
            pending.send(opponent, ServerPacket::Turn { forced: None });
        }
        Ok(())
    }

    /// 处理聊天
    fn handle_chat(
        state: &mut ServerState,
        pending: &mut PendingMessages,
        conn: ConnId,
        text: String,
    ) -> Result<(), Fault> {
        let code = state
            .clients
            .room_of(conn)
            .ok_or_else(|| Fault::rule("不在房间中"))?;
        if text.chars().count() > MAX_CHAT_LEN {
            return Err(Fault::rule(format!("消息不能超过 {} 个字符", MAX_CHAT_LEN)));
        }

        let pseudonym = state.clients.pseudonym(conn).unwrap_or_default().to_string();
        pending.broadcast(code, ServerPacket::Chat { pseudonym, text });
        Ok(())
    }

    /// 处理断线：结算进行中的对局，通知留下的一方
    pub fn handle_disconnect(state: &mut ServerState, conn: ConnId) {
        let mut pending = PendingMessages::new();

        if let Some(code) = state.clients.room_of(conn).map(str::to_string) {
            let abandoned = state
                .rooms
                .get(&code)
                .filter(|room| room.state == RoomState::InProgress)
                .and_then(|room| room.color_of(conn));

            // 对局中离开者判负
            if let Some(color) = abandoned {
                state.finalize(&mut pending, &code, Some(color.opponent()));
            }

            if let Some(room) = state.rooms.get_mut(&code) {
                let outcome = room.leave(conn);
                match outcome.remaining {
                    Some(remaining) => pending.send(remaining, ServerPacket::Waiting),
                    None => {
                        state.rooms.remove(&code);
                        info!(room = %code, "房间已销毁");
                    }
                }
            }
        }

        // 先发出待发送的数据包再移除连接，离开者收到的部分会在关闭前丢弃
        pending.flush(state);
        if let Some(client) = state.clients.remove(conn) {
            info!(conn, name = client.display_name(), "客户端已离开");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Board, Piece};

    struct TestClient {
        id: ConnId,
        rx: mpsc::Receiver<ServerPacket>,
    }

    impl TestClient {
        fn connect(state: &mut ServerState, name: &str) -> Self {
            let (tx, rx) = mpsc::channel(64);
            let id = state.connect(tx, format!("{}:0", name));
            let mut client = Self { id, rx };
            MessageHandler::handle(
                state,
                id,
                ClientPacket::Handshake {
                    pseudonym: name.to_string(),
                    board_size: None,
                },
            )
            .unwrap();
            assert_eq!(client.drain(), vec![ServerPacket::Handshake]);
            client
        }

        fn drain(&mut self) -> Vec<ServerPacket> {
            let mut packets = Vec::new();
            while let Ok(packet) = self.rx.try_recv() {
                packets.push(packet);
            }
            packets
        }
    }

    fn join(state: &mut ServerState, client: &TestClient, code: &str) -> Result<(), Fault> {
        MessageHandler::handle(
            state,
            client.id,
            ClientPacket::Room {
                code: Some(code.to_string()),
            },
        )
    }

    /// 两人进入 1234 并准备，清空收到的数据包
    fn start_match(state: &mut ServerState) -> (TestClient, TestClient) {
        let mut black = TestClient::connect(state, "Joueur001");
        let mut white = TestClient::connect(state, "Joueur002");
        join(state, &black, "1234").unwrap();
        join(state, &white, "1234").unwrap();
        MessageHandler::handle(state, black.id, ClientPacket::Ready).unwrap();
        MessageHandler::handle(state, white.id, ClientPacket::Ready).unwrap();
        black.drain();
        white.drain();
        (black, white)
    }

    fn set_position(state: &mut ServerState, code: &str, pieces: &[(Cell, Piece)]) {
        let mut board = Board::new(8, 8).unwrap();
        for &(cell, piece) in pieces {
            board.place(cell, piece).unwrap();
        }
        let room = state.rooms.get_mut(code).unwrap();
        room.replace_board(board);
    }

    #[test]
    fn test_packets_before_handshake() {
        let mut state = ServerState::in_memory();
        let (tx, _rx) = mpsc::channel(8);
        let id = state.connect(tx, "peer".to_string());

        let result = MessageHandler::handle(&mut state, id, ClientPacket::Ready);
        assert!(matches!(result, Err(Fault::Protocol(_))));
    }

    #[test]
    fn test_handshake_rules() {
        let mut state = ServerState::in_memory();
        let client = TestClient::connect(&mut state, "Joueur001");

        // 重复握手
        let result = MessageHandler::handle(
            &mut state,
            client.id,
            ClientPacket::Handshake {
                pseudonym: "Joueur009".to_string(),
                board_size: None,
            },
        );
        assert!(matches!(result, Err(Fault::Protocol(_))));

        // 昵称被占用 / 尺寸越界都只是规则错误
        let (tx, _rx) = mpsc::channel(8);
        let other = state.connect(tx, "peer".to_string());
        let taken = ClientPacket::Handshake {
            pseudonym: "Joueur001".to_string(),
            board_size: None,
        };
        assert!(matches!(MessageHandler::handle(&mut state, other, taken), Err(Fault::Rule(_))));
        let too_big = ClientPacket::Handshake {
            pseudonym: "Joueur003".to_string(),
            board_size: Some(MAX_BOARD_SIZE + 1),
        };
        assert!(matches!(MessageHandler::handle(&mut state, other, too_big), Err(Fault::Rule(_))));
    }

    #[test]
    fn test_lone_joiner_waits() {
        let mut state = ServerState::in_memory();
        let mut client = TestClient::connect(&mut state, "Joueur001");

        join(&mut state, &client, "1234").unwrap();
        assert_eq!(
            client.drain(),
            vec![
                ServerPacket::Room {
                    code: "1234".to_string()
                },
                ServerPacket::Waiting
            ]
        );

        // 已在房间中再次加入
        let result = join(&mut state, &client, "5678");
        assert!(matches!(result, Err(Fault::Protocol(_))));
    }

    #[test]
    fn test_generated_room_code() {
        let mut state = ServerState::in_memory();
        let mut client = TestClient::connect(&mut state, "Joueur001");

        MessageHandler::handle(&mut state, client.id, ClientPacket::Room { code: None }).unwrap();
        match client.drain().first() {
            Some(ServerPacket::Room { code }) => assert_eq!(code.len(), 6),
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_full_room_and_bad_code() {
        let mut state = ServerState::in_memory();
        let _ = start_match(&mut state);
        let third = TestClient::connect(&mut state, "Joueur003");

        assert!(matches!(join(&mut state, &third, "1234"), Err(Fault::Rule(_))));
        assert!(matches!(join(&mut state, &third, "ab"), Err(Fault::Rule(_))));
        assert_eq!(state.clients.room_of(third.id), None);
    }

    #[test]
    fn test_start_sequence() {
        let mut state = ServerState::in_memory();
        let mut black = TestClient::connect(&mut state, "Joueur001");
        let mut white = TestClient::connect(&mut state, "Joueur002");
        join(&mut state, &black, "1234").unwrap();
        join(&mut state, &white, "1234").unwrap();
        black.drain();
        white.drain();

        MessageHandler::handle(&mut state, black.id, ClientPacket::Ready).unwrap();
        assert_eq!(black.drain(), vec![ServerPacket::Waiting]);
        MessageHandler::handle(&mut state, white.id, ClientPacket::Ready).unwrap();

        let board = Board::standard().to_matrix();
        assert_eq!(
            black.drain(),
            vec![
                ServerPacket::Color { color: Color::Black },
                ServerPacket::Start { board: board.clone() },
                ServerPacket::Turn { forced: None },
            ]
        );
        assert_eq!(
            white.drain(),
            vec![
                ServerPacket::Color { color: Color::White },
                ServerPacket::Start { board },
            ]
        );

        // 对局中再次准备
        let result = MessageHandler::handle(&mut state, black.id, ClientPacket::Ready);
        assert!(matches!(result, Err(Fault::Protocol(_))));
    }

    #[test]
    fn test_move_and_turn_passing() {
        let mut state = ServerState::in_memory();
        let (mut black, mut white) = start_match(&mut state);

        // 白方抢先
        let result = MessageHandler::handle(
            &mut state,
            white.id,
            ClientPacket::Move {
                source: Cell::new(0, 5),
                destination: Cell::new(1, 4),
            },
        );
        assert!(matches!(result, Err(Fault::Rule(_))));

        MessageHandler::handle(
            &mut state,
            black.id,
            ClientPacket::Move {
                source: Cell::new(1, 2),
                destination: Cell::new(2, 3),
            },
        )
        .unwrap();

        let moves = ServerPacket::Moves {
            moves: vec![(Cell::new(1, 2), Cell::new(2, 3))],
        };
        assert_eq!(black.drain(), vec![moves.clone()]);
        assert_eq!(white.drain(), vec![moves, ServerPacket::Turn { forced: None }]);
    }

    #[test]
    fn test_move_before_start_is_protocol_fault() {
        let mut state = ServerState::in_memory();
        let client = TestClient::connect(&mut state, "Joueur001");
        let packet = ClientPacket::Move {
            source: Cell::new(1, 2),
            destination: Cell::new(2, 3),
        };
        let result = MessageHandler::handle(&mut state, client.id, packet.clone());
        assert!(matches!(result, Err(Fault::Protocol(_))));

        join(&mut state, &client, "1234").unwrap();
        let result = MessageHandler::handle(&mut state, client.id, packet);
        assert!(matches!(result, Err(Fault::Protocol(_))));
    }

    #[test]
    fn test_capture_continuation_and_cancel() {
        let mut state = ServerState::in_memory();
        let (mut black, mut white) = start_match(&mut state);
        set_position(
            &mut state,
            "1234",
            &[
                (Cell::new(1, 0), Piece::BlackMan),
                (Cell::new(2, 1), Piece::WhiteMan),
                (Cell::new(4, 3), Piece::WhiteMan),
                (Cell::new(7, 6), Piece::WhiteMan),
            ],
        );

        MessageHandler::handle(
            &mut state,
            black.id,
            ClientPacket::Move {
                source: Cell::new(1, 0),
                destination: Cell::new(3, 2),
            },
        )
        .unwrap();

        let packets = black.drain();
        assert_eq!(packets.last(), Some(&ServerPacket::Turn { forced: Some(Cell::new(3, 2)) }));
        assert!(!white.drain().iter().any(|p| matches!(p, ServerPacket::Turn { .. })));

        MessageHandler::handle(&mut state, black.id, ClientPacket::Cancel).unwrap();
        assert_eq!(white.drain(), vec![ServerPacket::Turn { forced: None }]);

        // 没有连吃时取消只是规则错误
        let result = MessageHandler::handle(&mut state, white.id, ClientPacket::Cancel);
        assert!(matches!(result, Err(Fault::Rule(_))));
    }

    #[test]
    fn test_win_concludes_and_rematch() {
        let mut state = ServerState::in_memory();
        let (mut black, mut white) = start_match(&mut state);
        set_position(
            &mut state,
            "1234",
            &[
                (Cell::new(2, 5), Piece::BlackMan),
                (Cell::new(3, 6), Piece::WhiteMan),
            ],
        );

        MessageHandler::handle(
            &mut state,
            black.id,
            ClientPacket::Move {
                source: Cell::new(2, 5),
                destination: Cell::new(4, 7),
            },
        )
        .unwrap();

        let expected = vec![
            ServerPacket::Moves {
                moves: vec![(Cell::new(2, 5), Cell::new(4, 7))],
            },
            ServerPacket::Promotion {
                cell: Cell::new(4, 7),
                piece: Piece::BlackKing,
            },
            ServerPacket::Conclusion {
                winner: Some(Color::Black),
            },
        ];
        assert_eq!(black.drain(), expected);
        assert_eq!(white.drain(), expected);
        assert_eq!(state.rooms.get("1234").unwrap().state, RoomState::Finished);

        // 再来一局
        MessageHandler::handle(&mut state, white.id, ClientPacket::Ready).unwrap();
        MessageHandler::handle(&mut state, black.id, ClientPacket::Ready).unwrap();
        assert_eq!(state.rooms.get("1234").unwrap().state, RoomState::InProgress);
    }

    #[test]
    fn test_disconnect_during_match() {
        let mut state = ServerState::in_memory();
        let (black, mut white) = start_match(&mut state);

        MessageHandler::handle_disconnect(&mut state, black.id);

        assert_eq!(
            white.drain(),
            vec![
                ServerPacket::Conclusion {
                    winner: Some(Color::White)
                },
                ServerPacket::Waiting,
            ]
        );
        let room = state.rooms.get("1234").unwrap();
        assert_eq!(room.state, RoomState::Open);
        assert_eq!(room.clients(), vec![white.id]);
        assert_eq!(state.clients.get(black.id).map(|c| c.id), None);

        MessageHandler::handle_disconnect(&mut state, white.id);
        assert!(state.rooms.get("1234").is_none());
        assert_eq!(state.clients.online_count(), 0);
    }

    #[test]
    fn test_admin_end_match() {
        let mut state = ServerState::in_memory();
        let (mut black, mut white) = start_match(&mut state);

        assert!(state.end_match("9999").is_err());
        state.end_match("1234").unwrap();
        assert_eq!(black.drain(), vec![ServerPacket::Conclusion { winner: None }]);
        assert_eq!(white.drain(), vec![ServerPacket::Conclusion { winner: None }]);
        assert!(state.end_match("1234").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_match_on_multi_thread_runtime() {
        let shared = ServerState::in_memory().into_shared();
        let mut state = shared.lock().await;
        let (mut black, _white) = start_match(&mut state);

        state.end_match("1234").unwrap();
        assert_eq!(black.drain(), vec![ServerPacket::Conclusion { winner: None }]);
    }

    #[tokio::test]
    async fn test_blocking_io_on_current_thread_runtime() {
        assert_eq!(blocking_io(|| 7), 7);
    }

    #[test]
    fn test_chat() {
        let mut state = ServerState::in_memory();
        let mut lonely = TestClient::connect(&mut state, "Joueur009");
        let result = MessageHandler::handle(
            &mut state,
            lonely.id,
            ClientPacket::Chat {
                text: "allo".to_string(),
            },
        );
        assert!(matches!(result, Err(Fault::Rule(_))));
        assert!(lonely.drain().is_empty());

        let (mut black, mut white) = start_match(&mut state);
        MessageHandler::handle(
            &mut state,
            white.id,
            ClientPacket::Chat {
                text: "bonne chance".to_string(),
            },
        )
        .unwrap();

        let expected = vec![ServerPacket::Chat {
            pseudonym: "Joueur002".to_string(),
            text: "bonne chance".to_string(),
        }];
        assert_eq!(black.drain(), expected);
        assert_eq!(white.drain(), expected);

        let long = ClientPacket::Chat {
            text: "x".repeat(MAX_CHAT_LEN + 1),
        };
        assert!(matches!(MessageHandler::handle(&mut state, white.id, long), Err(Fault::Rule(_))));
    }

    #[test]
    fn test_fault_classes() {
        assert!(!Fault::rule("x").closes_connection());
        assert!(Fault::protocol("x").closes_connection());
        assert!(Fault::from(ProtocolError::UnknownPacketType(42)).closes_connection());
        assert!(matches!(
            Fault::from(ProtocolError::MalformedPacket("x".to_string())),
            Fault::Decode(_)
        ));
        assert!(matches!(Fault::from(RoomError::NotYourTurn), Fault::Rule(_)));
        assert!(matches!(Fault::from(RoomError::NotInProgress), Fault::Protocol(_)));
    }
}
