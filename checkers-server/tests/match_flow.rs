//! 端到端测试：真实 TCP 服务器与两个协议客户端

use std::time::Duration;

use checkers_server::{net, ServerState};
use protocol::{
    Board, Cell, ClientPacket, Color, Connection, Connector, Listener, ProtocolError, ServerPacket,
    TcpConnection, TcpConnector, TcpListener,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    address: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let state = ServerState::in_memory().into_shared();
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(net::serve(listener, state, rx, false));
        Self {
            address,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

async fn connect(server: &TestServer, pseudonym: &str) -> TcpConnection {
    let mut conn = TcpConnector.connect(&server.address).await.unwrap();
    conn.send(ClientPacket::Handshake {
        pseudonym: pseudonym.to_string(),
        board_size: None,
    })
    .await
    .unwrap();
    assert_eq!(recv(&mut conn).await, ServerPacket::Handshake);
    conn
}

async fn recv(conn: &mut TcpConnection) -> ServerPacket {
    timeout(RECV_TIMEOUT, conn.recv::<ServerPacket>())
        .await
        .expect("timed out waiting for a packet")
        .unwrap()
}

async fn play(conn: &mut TcpConnection, source: (i32, i32), destination: (i32, i32)) {
    conn.send(ClientPacket::Move {
        source: source.into(),
        destination: destination.into(),
    })
    .await
    .unwrap();
}

fn moves(source: (i32, i32), destination: (i32, i32)) -> ServerPacket {
    ServerPacket::Moves {
        moves: vec![(source.into(), destination.into())],
    }
}

/// 两人进入 1234 并开局，返回 (黑方, 白方)
async fn start_match(server: &TestServer) -> (TcpConnection, TcpConnection) {
    let mut black = connect(server, "Joueur001").await;
    let mut white = connect(server, "Joueur002").await;

    black
        .send(ClientPacket::Room {
            code: Some("1234".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(
        recv(&mut black).await,
        ServerPacket::Room {
            code: "1234".to_string()
        }
    );
    assert_eq!(recv(&mut black).await, ServerPacket::Waiting);

    white
        .send(ClientPacket::Room {
            code: Some("1234".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(
        recv(&mut white).await,
        ServerPacket::Room {
            code: "1234".to_string()
        }
    );

    black.send(ClientPacket::Ready).await.unwrap();
    assert_eq!(recv(&mut black).await, ServerPacket::Waiting);
    white.send(ClientPacket::Ready).await.unwrap();

    let standard = Board::standard().to_matrix();

    assert_eq!(recv(&mut black).await, ServerPacket::Color { color: Color::Black });
    assert_eq!(
        recv(&mut black).await,
        ServerPacket::Start {
            board: standard.clone()
        }
    );
    assert_eq!(recv(&mut black).await, ServerPacket::Turn { forced: None });

    assert_eq!(recv(&mut white).await, ServerPacket::Color { color: Color::White });
    assert_eq!(recv(&mut white).await, ServerPacket::Start { board: standard });

    (black, white)
}

#[tokio::test]
async fn test_start_and_turn() {
    let server = TestServer::start().await;
    let (mut black, mut white) = start_match(&server).await;

    // 白方抢先只得到错误，连接保持
    play(&mut white, (0, 5), (1, 4)).await;
    assert!(matches!(recv(&mut white).await, ServerPacket::Error { .. }));

    play(&mut black, (1, 2), (2, 3)).await;
    assert_eq!(recv(&mut black).await, moves((1, 2), (2, 3)));
    assert_eq!(recv(&mut white).await, moves((1, 2), (2, 3)));
    assert_eq!(recv(&mut white).await, ServerPacket::Turn { forced: None });

    server.stop().await;
}

#[tokio::test]
async fn test_capture_continuation_and_disconnect() {
    let server = TestServer::start().await;
    let (mut black, mut white) = start_match(&server).await;

    let opening = [
        ((1, 2), (2, 3)),
        ((0, 5), (1, 4)),
        ((0, 1), (1, 2)),
        ((6, 5), (7, 4)),
        ((2, 3), (3, 4)),
    ];
    for (i, (source, destination)) in opening.into_iter().enumerate() {
        let (mover, other) = if i % 2 == 0 {
            (&mut black, &mut white)
        } else {
            (&mut white, &mut black)
        };
        play(mover, source, destination).await;
        assert_eq!(recv(mover).await, moves(source, destination));
        assert_eq!(recv(other).await, moves(source, destination));
        assert_eq!(recv(other).await, ServerPacket::Turn { forced: None });
    }

    // 白方吃掉 (3, 4) 后还能继续吃 (1, 2)
    play(&mut white, (4, 5), (2, 3)).await;
    assert_eq!(recv(&mut white).await, moves((4, 5), (2, 3)));
    assert_eq!(
        recv(&mut white).await,
        ServerPacket::Turn {
            forced: Some(Cell::new(2, 3))
        }
    );
    assert_eq!(recv(&mut black).await, moves((4, 5), (2, 3)));

    // 连吃时只能移动同一枚棋子
    play(&mut white, (2, 5), (3, 4)).await;
    assert!(matches!(recv(&mut white).await, ServerPacket::Error { .. }));

    play(&mut white, (2, 3), (0, 1)).await;
    assert_eq!(recv(&mut white).await, moves((2, 3), (0, 1)));
    assert_eq!(recv(&mut black).await, moves((2, 3), (0, 1)));
    assert_eq!(recv(&mut black).await, ServerPacket::Turn { forced: None });

    // 黑方断线，白方获胜并回到等待
    drop(black);
    assert_eq!(
        recv(&mut white).await,
        ServerPacket::Conclusion {
            winner: Some(Color::White)
        }
    );
    assert_eq!(recv(&mut white).await, ServerPacket::Waiting);

    server.stop().await;
}

#[tokio::test]
async fn test_protocol_fault_closes_connection() {
    let server = TestServer::start().await;

    let mut conn = TcpConnector.connect(&server.address).await.unwrap();
    conn.send(ClientPacket::Ready).await.unwrap();
    assert!(matches!(recv(&mut conn).await, ServerPacket::Error { .. }));

    let closed = timeout(RECV_TIMEOUT, conn.recv::<ServerPacket>()).await.unwrap();
    assert!(matches!(closed, Err(ProtocolError::ConnectionClosed)));

    server.stop().await;
}

/// 发送一帧原始负载，期望收到 ERROR 后连接被关闭
async fn assert_rejected_payload(server: &TestServer, payload: &[u8]) {
    let mut stream = TcpStream::connect(server.address.as_str()).await.unwrap();
    let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.unwrap();

    let mut conn = TcpConnection::from_stream(stream).unwrap();
    assert!(
        matches!(recv(&mut conn).await, ServerPacket::Error { .. }),
        "no error reply for {:?}",
        String::from_utf8_lossy(payload)
    );
    let closed = timeout(RECV_TIMEOUT, conn.recv::<ServerPacket>()).await.unwrap();
    assert!(matches!(closed, Err(ProtocolError::ConnectionClosed)));
}

#[tokio::test]
async fn test_malformed_json_gets_error() {
    let server = TestServer::start().await;
    assert_rejected_payload(&server, b"[1,").await;
    server.stop().await;
}

#[tokio::test]
async fn test_non_array_payload_gets_error() {
    let server = TestServer::start().await;
    assert_rejected_payload(&server, b"{\"a\":1}").await;
    assert_rejected_payload(&server, b"[]").await;
    server.stop().await;
}

#[tokio::test]
async fn test_out_of_range_tag_gets_error() {
    let server = TestServer::start().await;
    assert_rejected_payload(&server, b"[300]").await;
    assert_rejected_payload(&server, b"[42]").await;
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_concludes_matches() {
    let server = TestServer::start().await;
    let (mut black, mut white) = start_match(&server).await;

    server.stop().await;

    assert_eq!(recv(&mut black).await, ServerPacket::Conclusion { winner: None });
    assert_eq!(recv(&mut white).await, ServerPacket::Conclusion { winner: None });
}
