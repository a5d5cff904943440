//! 客户端连接管理

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use protocol::{ServerPacket, DEFAULT_BOARD_SIZE, MAX_PSEUDONYM_LEN, MIN_PSEUDONYM_LEN};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// 连接 ID
pub type ConnId = u64;

/// 客户端连接记录
#[derive(Debug)]
pub struct Client {
    pub id: ConnId,
    /// 握手成功后才有昵称
    pub pseudonym: Option<String>,
    /// 创建房间时使用的棋盘尺寸
    pub board_size: usize,
    /// 所在房间
    pub room: Option<String>,
    pub peer_addr: String,
    /// 发送队列，为 None 表示已断开（队列满或对端关闭）
    outbound: Option<mpsc::Sender<ServerPacket>>,
}

impl Client {
    fn new(id: ConnId, outbound: mpsc::Sender<ServerPacket>, peer_addr: String) -> Self {
        Self {
            id,
            pseudonym: None,
            board_size: DEFAULT_BOARD_SIZE,
            room: None,
            peer_addr,
            outbound: Some(outbound),
        }
    }

    pub fn is_identified(&self) -> bool {
        self.pseudonym.is_some()
    }

    /// 昵称，未握手时返回连接地址
    pub fn display_name(&self) -> &str {
        self.pseudonym.as_deref().unwrap_or(&self.peer_addr)
    }
}

/// 客户端管理器
pub struct ClientManager {
    /// 连接 ID -> 客户端
    clients: HashMap<ConnId, Client>,
    /// 昵称 -> 连接 ID（用于昵称唯一性检查）
    pseudonym_to_id: HashMap<String, ConnId>,
    /// ID 生成器
    next_id: AtomicU64,
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            pseudonym_to_id: HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// 登记新连接
    pub fn register(&mut self, outbound: mpsc::Sender<ServerPacket>, peer_addr: String) -> ConnId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.clients.insert(id, Client::new(id, outbound, peer_addr));
        id
    }

    /// 验证昵称
    pub fn validate_pseudonym(pseudonym: &str) -> Result<(), &'static str> {
        let len = pseudonym.chars().count();
        if len < MIN_PSEUDONYM_LEN {
            return Err("昵称太短");
        }
        if len > MAX_PSEUDONYM_LEN {
            return Err("昵称太长");
        }
        if pseudonym.chars().any(char::is_control) {
            return Err("昵称包含非法字符");
        }
        Ok(())
    }

    /// 握手：绑定昵称
    pub fn identify(&mut self, id: ConnId, pseudonym: String, board_size: usize) -> Result<(), &'static str> {
        Self::validate_pseudonym(&pseudonym)?;

        if self.pseudonym_to_id.contains_key(&pseudonym) {
            return Err("昵称已被占用");
        }

        let client = self.clients.get_mut(&id).ok_or("连接不存在")?;
        client.pseudonym = Some(pseudonym.clone());
        client.board_size = board_size;
        self.pseudonym_to_id.insert(pseudonym, id);

        Ok(())
    }

    /// 移除连接
    pub fn remove(&mut self, id: ConnId) -> Option<Client> {
        let client = self.clients.remove(&id)?;
        if let Some(pseudonym) = &client.pseudonym {
            self.pseudonym_to_id.remove(pseudonym);
        }
        Some(client)
    }

    pub fn get(&self, id: ConnId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn pseudonym(&self, id: ConnId) -> Option<&str> {
        self.clients.get(&id)?.pseudonym.as_deref()
    }

    pub fn room_of(&self, id: ConnId) -> Option<&str> {
        self.clients.get(&id)?.room.as_deref()
    }

    pub fn set_room(&mut self, id: ConnId, room: Option<String>) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.room = room;
        }
    }

    /// 投递数据包（不等待）
    ///
    /// 队列已满说明对端不再读取：丢弃发送端，连接任务随之关闭。
    pub fn send(&mut self, id: ConnId, packet: ServerPacket) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        let Some(outbound) = &client.outbound else {
            return false;
        };

        match outbound.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn = id, "发送队列已满，断开连接");
                client.outbound = None;
                false
            }
            Err(TrySendError::Closed(_)) => {
                client.outbound = None;
                false
            }
        }
    }

    /// 在线连接数
    pub fn online_count(&self) -> usize {
        self.clients.len()
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}
