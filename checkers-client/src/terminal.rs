//! 终端前端

use anyhow::Result;
use protocol::{Cell, ServerPacket};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::warn;

use crate::session::{ClientSession, Replica, SessionError};

/// 终端输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// 加入房间，不带房间码时由服务端生成
    Room(Option<String>),
    Ready,
    Move(Cell, Cell),
    Cancel,
    Chat(String),
    /// 重新显示棋盘
    Board,
    Quit,
    Help,
}

impl Input {
    /// 解析一行输入
    pub fn parse(line: &str) -> Result<Self, String> {
        let trimmed = line.trim();
        let (command, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (trimmed, ""),
        };

        match command {
            "room" if rest.is_empty() => Ok(Input::Room(None)),
            "room" if !rest.contains(char::is_whitespace) => Ok(Input::Room(Some(rest.to_string()))),
            "room" => Err("用法: room [房间号]".to_string()),
            "ready" => Ok(Input::Ready),
            "move" => parse_move(rest),
            "cancel" => Ok(Input::Cancel),
            "chat" if rest.is_empty() => Err("用法: chat <消息>".to_string()),
            "chat" => Ok(Input::Chat(rest.to_string())),
            "board" => Ok(Input::Board),
            "quit" | "exit" => Ok(Input::Quit),
            "help" => Ok(Input::Help),
            "" => Err(String::new()),
            _ => Err(format!("未知命令: {}（输入 help 查看帮助）", command)),
        }
    }
}

fn parse_move(args: &str) -> Result<Input, String> {
    let numbers: Vec<i32> = args
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| "坐标必须是整数".to_string())?;

    match numbers.as_slice() {
        [x1, y1, x2, y2] => Ok(Input::Move(Cell::new(*x1, *y1), Cell::new(*x2, *y2))),
        _ => Err("用法: move x1 y1 x2 y2".to_string()),
    }
}

const HELP: &str = "\
可用命令:
  room [房间号]        加入房间，省略房间号则新建
  ready               准备
  move x1 y1 x2 y2    走子
  cancel              放弃连吃
  chat <消息>          发送聊天
  board               显示棋盘
  quit                退出";

/// 当前棋盘与轮次
pub fn render_board(replica: &Replica) -> String {
    let Some(board) = replica.board() else {
        return "对局尚未开始".to_string();
    };

    let mut text = board.to_string();
    if let Some(color) = replica.color() {
        text.push_str(&format!("你执{}", color));
        if replica.is_my_turn() {
            text.push_str("，轮到你走");
            if let Some(forced) = replica.forced() {
                text.push_str(&format!("（必须用 {} 继续吃子，或 cancel）", forced));
            }
        }
    }
    text
}

/// 把服务端数据包转成要显示的文本
pub fn render_event(packet: &ServerPacket, replica: &Replica) -> Option<String> {
    match packet {
        ServerPacket::Handshake => None,
        ServerPacket::Error { message } => Some(format!("错误: {}", message)),
        ServerPacket::Room { code } => Some(format!("已进入房间 {}", code)),
        ServerPacket::Waiting => Some("等待对手…".to_string()),
        ServerPacket::Color { color } => Some(format!("你执{}", color)),
        ServerPacket::Start { .. } => Some(format!("对局开始\n{}", render_board(replica))),
        ServerPacket::Moves { moves } => Some(
            moves
                .iter()
                .map(|(source, destination)| format!("{} -> {}", source, destination))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        ServerPacket::Promotion { cell, .. } => Some(format!("{} 升王", cell)),
        ServerPacket::Turn { .. } => Some(render_board(replica)),
        ServerPacket::Conclusion { winner } => Some(match (winner, replica.color()) {
            (None, _) => "对局结束：和棋".to_string(),
            (Some(winner), Some(color)) if *winner == color => "对局结束：你赢了".to_string(),
            (Some(winner), _) => format!("对局结束：{}获胜", winner),
        }),
        ServerPacket::Chat { pseudonym, text } => Some(format!("<{}> {}", pseudonym, text)),
    }
}

/// 执行一条输入，返回是否退出
async fn execute<R, W>(session: &mut ClientSession<R, W>, input: Input) -> Result<bool, SessionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    match input {
        Input::Room(code) => session.join_room(code).await?,
        Input::Ready => session.ready().await?,
        Input::Move(source, destination) => session.play(source, destination).await?,
        Input::Cancel => session.cancel().await?,
        Input::Chat(text) => session.chat(&text).await?,
        Input::Board => println!("{}", render_board(session.replica())),
        Input::Help => println!("{}", HELP),
        Input::Quit => return Ok(true),
    }
    Ok(false)
}

enum Step {
    Line(std::io::Result<Option<String>>),
    Event(Result<ServerPacket, SessionError>),
}

/// 交互循环，直到 quit、输入结束或服务端断开
pub async fn run<R, W>(mut session: ClientSession<R, W>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    println!("{}，输入 help 查看命令", session.pseudonym());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let step = tokio::select! {
            line = lines.next_line() => Step::Line(line),
            event = session.next_event() => Step::Event(event),
        };

        match step {
            Step::Line(Ok(Some(line))) => {
                let input = match Input::parse(&line) {
                    Ok(input) => input,
                    Err(message) => {
                        if !message.is_empty() {
                            println!("{}", message);
                        }
                        continue;
                    }
                };
                match execute(&mut session, input).await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(SessionError::Protocol(e)) => return Err(e.into()),
                    Err(e) => println!("{}", e),
                }
            }
            Step::Line(Ok(None)) => break,
            Step::Line(Err(e)) => {
                warn!(error = %e, "读取终端输入失败");
                break;
            }
            Step::Event(Ok(packet)) => {
                if let Some(text) = render_event(&packet, session.replica()) {
                    println!("{}", text);
                }
            }
            Step::Event(Err(SessionError::Protocol(protocol::ProtocolError::ConnectionClosed))) => {
                println!("服务器已断开连接");
                return Ok(());
            }
            Step::Event(Err(e)) => return Err(e.into()),
        }
    }

    let _ = session.close().await;
    Ok(())
}
