//! 跳棋服务端
//!
//! 包含:
//! - 客户端连接管理
//! - 房间系统与对局裁决
//! - 监听循环与连接收发
//! - 对局结果存储
//! - 配置与管理控制台

pub mod client;
pub mod config;
pub mod console;
pub mod net;
pub mod room;
pub mod server;
pub mod storage;

use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

pub use client::{Client, ClientManager, ConnId};
pub use config::{ConfigStatus, ServerConfig, DEFAULT_CONFIG, DEFAULT_CONFIG_FILE};
pub use room::{Room, RoomError, RoomManager, RoomState, Statistics};
pub use server::{Fault, MessageHandler, ServerState, SharedState};
pub use storage::{
    record_report, LedgerStore, MatchReport, MatchStore, MemoryStore, PersistenceError,
};

/// 打开配置的账本；打不开时记录错误并改用内存存储，服务照常运行
pub fn open_store(config: &ServerConfig) -> Box<dyn MatchStore> {
    let opened = config.ledger_path().and_then(|path| {
        LedgerStore::open(&path).with_context(|| format!("无法打开账本: {:?}", path))
    });

    match opened {
        Ok(store) => Box::new(store),
        Err(e) => {
            error!(error = %format!("{:#}", e), "账本不可用，本次运行的对局结果不会持久保存");
            Box::new(MemoryStore::new())
        }
    }
}

/// 加载配置并运行服务器与控制台，直到控制台输入 stop
pub async fn launch(config_path: &Path) -> Result<()> {
    let config = match ServerConfig::load_or_init(config_path)? {
        ConfigStatus::Loaded(config) => config,
        ConfigStatus::DefaultWritten(path) => {
            warn!(path = %path.display(), "配置文件不存在，已写入默认配置，请检查后重新启动");
            return Ok(());
        }
    };

    info!(
        hote = %config.mysql.hote,
        utilisateur = %config.mysql.utilisateur,
        base = %config.mysql.base,
        "数据库由外部服务提供，对局结果写入本地账本"
    );

    let state = ServerState::new(open_store(&config), config.attempts()).into_shared();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let console = tokio::spawn(console::run(state.clone(), shutdown_tx));

    let result = net::run(&config, state, shutdown_rx).await;
    console.abort();
    result
}
