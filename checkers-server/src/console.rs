//! 管理控制台

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::server::SharedState;

/// 控制台命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 关闭服务器
    Stop,
    /// 结束某个房间的对局（无胜方）
    EndMatch(String),
    /// 列出房间
    Rooms,
    Help,
}

impl Command {
    /// 解析一行输入
    pub fn parse(line: &str) -> Result<Self, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["stop"] => Ok(Command::Stop),
            ["end", "match", code] => Ok(Command::EndMatch(code.to_string())),
            ["end", "match"] => Err("用法: end match <房间号>".to_string()),
            ["rooms"] => Ok(Command::Rooms),
            ["help"] => Ok(Command::Help),
            [] => Err(String::new()),
            _ => Err(format!("未知命令: {}（输入 help 查看帮助）", line.trim())),
        }
    }
}

const HELP: &str = "\
可用命令:
  stop               关闭服务器
  end match <房间号>  结束房间内进行中的对局
  rooms              列出所有房间
  help               显示本帮助";

/// 执行命令，返回要显示的文本
pub async fn execute(state: &SharedState, shutdown: &watch::Sender<bool>, command: Command) -> String {
    match command {
        Command::Stop => {
            let _ = shutdown.send(true);
            "正在关闭服务器".to_string()
        }
        Command::EndMatch(code) => match state.lock().await.end_match(&code) {
            Ok(()) => format!("房间 {} 的对局已结束", code),
            Err(e) => e,
        },
        Command::Rooms => {
            let state = state.lock().await;
            let rooms = state.room_summaries();
            if rooms.is_empty() {
                format!("没有房间（在线 {} 人）", state.clients.online_count())
            } else {
                format!(
                    "{} 个房间（在线 {} 人）:\n{}",
                    rooms.len(),
                    state.clients.online_count(),
                    rooms.join("\n")
                )
            }
        }
        Command::Help => HELP.to_string(),
    }
}

/// 读取标准输入直到 stop 或输入结束
pub async fn run(state: SharedState, shutdown: watch::Sender<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("控制台输入已结束");
                break;
            }
            Err(e) => {
                warn!(error = %e, "读取控制台输入失败");
                break;
            }
        };

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                if !message.is_empty() {
                    println!("{}", message);
                }
                continue;
            }
        };

        let stop = command == Command::Stop;
        println!("{}", execute(&state, &shutdown, command).await);
        if stop {
            break;
        }
    }

    // 保留发送端直到服务器停止，输入结束不等于关闭
    shutdown.closed().await;
}
