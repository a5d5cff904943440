//! 网络层：监听循环与每个连接的收发循环

use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{
    ClientPacket, FrameReader, FrameWriter, Listener, ProtocolError, ServerPacket, TcpListener,
    OUTBOUND_QUEUE_CAPACITY,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::client::ConnId;
use crate::config::ServerConfig;
use crate::server::{Fault, MessageHandler, SharedState};

/// 监听重启前的等待时间
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// 按配置绑定地址并运行，直到收到关闭信号
pub async fn run(config: &ServerConfig, state: SharedState, shutdown: watch::Receiver<bool>) -> Result<()> {
    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("无法监听 {}", address))?;

    serve(listener, state, shutdown, config.auto_redemarrage).await
}

/// 运行监听循环
///
/// 收到关闭信号后停止接受连接，结束进行中的对局，等待所有连接任务退出。
pub async fn serve(
    mut listener: TcpListener,
    state: SharedState,
    mut shutdown: watch::Receiver<bool>,
    restart: bool,
) -> Result<()> {
    let address = listener.local_addr().context("无法获取监听地址")?;
    info!(address = %address, "服务器开始监听");

    let mut tasks = JoinSet::new();
    // 连接任务使用单独的信号，先结算对局再通知它们退出
    let (close_tx, close_rx) = watch::channel(false);

    let result = loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break Ok(()),
            accepted = listener.accept_stream() => match accepted {
                Ok((stream, peer)) => {
                    tasks.spawn(handle_connection(stream, peer, state.clone(), close_rx.clone()));
                }
                Err(e) if restart => {
                    error!(error = %e, "接受连接失败，重启监听");
                    drop(listener);
                    tokio::time::sleep(RESTART_DELAY).await;
                    listener = match TcpListener::bind(&address).await {
                        Ok(listener) => listener,
                        Err(e) => break Err(anyhow::Error::new(e).context("重启监听失败")),
                    };
                }
                Err(e) => {
                    error!(error = %e, "接受连接失败");
                    break Err(anyhow::Error::new(e));
                }
            },
            Some(joined) = tasks.join_next() => {
                if let Err(e) = joined {
                    warn!(error = %e, "连接任务异常退出");
                }
            }
        }
    };

    let ended = state.lock().await.end_all_matches();
    if ended > 0 {
        info!(ended, "已结束进行中的对局");
    }

    let _ = close_tx.send(true);
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "连接任务异常退出");
        }
    }

    info!("服务器已停止");
    result
}

/// 等待关闭信号
///
/// 发送端被丢弃后不可能再收到信号，一直挂起。
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// 单个连接的收发循环
async fn handle_connection(
    stream: TcpStream,
    peer: String,
    state: SharedState,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let conn = state.lock().await.connect(tx, peer.clone());
    info!(conn, peer = %peer, "连接已建立");

    loop {
        tokio::select! {
            inbound = reader.read_packet() => match inbound {
                Ok(packet) => {
                    let decoded = ClientPacket::try_from(packet);
                    if dispatch(&state, conn, decoded).await.is_break() {
                        break;
                    }
                }
                Err(ProtocolError::ConnectionClosed) => {
                    info!(conn, "对端关闭连接");
                    break;
                }
                Err(e) if e.is_framing() => {
                    warn!(conn, error = %e, "帧错误，关闭连接");
                    break;
                }
                // 帧完整但负载无法解析，回复错误后关闭
                Err(e) => {
                    if dispatch(&state, conn, Err(e)).await.is_break() {
                        break;
                    }
                }
            },
            outbound = rx.recv() => match outbound {
                Some(packet) => {
                    if let Err(e) = writer.send(packet).await {
                        warn!(conn, error = %e, "发送失败，关闭连接");
                        break;
                    }
                }
                // 发送端被丢弃：队列满或服务端主动断开
                None => break,
            },
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    MessageHandler::handle_disconnect(&mut *state.lock().await, conn);

    // 发出已排队的数据包后关闭写端
    while let Ok(packet) = rx.try_recv() {
        if writer.send(packet).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
    info!(conn, "连接已关闭");
}

/// 处理一个解码后的数据包，返回是否需要关闭连接
async fn dispatch(
    state: &SharedState,
    conn: ConnId,
    decoded: std::result::Result<ClientPacket, ProtocolError>,
) -> ControlFlow<()> {
    let mut state = state.lock().await;

    let result = match decoded {
        Ok(packet) => {
            debug!(conn, ?packet, "收到数据包");
            MessageHandler::handle(&mut state, conn, packet)
        }
        Err(e) => Err(Fault::from(e)),
    };

    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(fault) => {
            warn!(conn, kind = fault.kind(), fault = %fault, "客户端错误");
            state.send_to_client(conn, ServerPacket::error(fault.to_string()));
            if fault.closes_connection() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }
}
