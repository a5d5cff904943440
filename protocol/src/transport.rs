//! 传输层抽象
//!
//! 提供 Connector/Connection/Listener traits 使上层协议与具体传输实现解耦。
//!
//! 帧格式：4 字节小端序长度 + 该长度的负载（JSON 数组形式的数据包）。

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::constants::{CONNECT_TIMEOUT, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};
use crate::message::Packet;

/// 连接抽象 trait（核心抽象，用于业务层）
#[async_trait]
pub trait Connection: Send {
    /// 发送数据包
    async fn send<M: Into<Packet> + Send>(&mut self, msg: M) -> Result<()>;

    /// 接收并解码数据包
    async fn recv<M: TryFrom<Packet, Error = ProtocolError>>(&mut self) -> Result<M>;

    /// 关闭连接
    async fn close(&mut self) -> Result<()>;

    /// 获取远端地址
    fn peer_addr(&self) -> Option<String>;
}

/// 连接器 trait（客户端使用）
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// 建立连接
    async fn connect(&self, addr: &str) -> Result<Self::Conn>;
}

/// 监听器 trait（服务端使用）
#[async_trait]
pub trait Listener: Send + Sync + Sized {
    type Conn: Connection;

    /// 绑定地址
    async fn bind(addr: &str) -> Result<Self>;

    /// 接受连接
    async fn accept(&mut self) -> Result<Self::Conn>;

    /// 获取本地地址
    fn local_addr(&self) -> Option<String>;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 连接器
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
            .map_err(ProtocolError::Io)?;

        TcpConnection::from_stream(stream)
    }
}

/// TCP 连接
pub struct TcpConnection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer_addr: Option<String>,
}

impl TcpConnection {
    /// 从 TcpStream 创建
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            peer_addr,
        })
    }

    /// 分离读写端
    pub fn split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send<M: Into<Packet> + Send>(&mut self, msg: M) -> Result<()> {
        self.writer.write_packet(&msg.into()).await
    }

    async fn recv<M: TryFrom<Packet, Error = ProtocolError>>(&mut self) -> Result<M> {
        let packet = self.reader.read_packet().await?;
        M::try_from(packet)
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }
}

/// TCP 监听器
pub struct TcpListener {
    listener: tokio::net::TcpListener,
}

impl TcpListener {
    /// 接受连接并返回原始 TcpStream（服务端需要自行拆分读写端）
    pub async fn accept_stream(&mut self) -> Result<(TcpStream, String)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr.to_string()))
    }
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpConnection;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ProtocolError::Io)?;
        Ok(Self { listener })
    }

    async fn accept(&mut self) -> Result<Self::Conn> {
        let (stream, _addr) = self.accept_stream().await?;
        TcpConnection::from_stream(stream)
    }

    fn local_addr(&self) -> Option<String> {
        self.listener.local_addr().ok().map(|a| a.to_string())
    }
}

// ============================================================================
// 帧编解码
// ============================================================================

/// 编码一帧：长度头 + 负载
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>> {
    let payload = packet.serialize()?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// 帧读取器
///
/// 已读到但尚未组成完整帧的字节保存在内部缓冲区，因此 `read_frame`
/// 可以安全地放在 `tokio::select!` 中被取消。
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(4096),
        }
    }

    /// 读取一帧负载
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.take_frame()? {
                trace!(len = frame.len(), "帧已接收");
                return Ok(frame);
            }

            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(self.eof_error());
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// 读取并解析一个数据包
    pub async fn read_packet(&mut self) -> Result<Packet> {
        let frame = self.read_frame().await?;
        Packet::deserialize(&frame)
    }

    /// 接收并解码（read_packet 的类型化版本）
    pub async fn recv<M: TryFrom<Packet, Error = ProtocolError>>(&mut self) -> Result<M> {
        M::try_from(self.read_packet().await?)
    }

    /// 缓冲区中已有完整帧时取出
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(length) = self.declared_length() else {
            return Ok(None);
        };

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        let end = HEADER_SIZE + length;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let frame = self.buffer[HEADER_SIZE..end].to_vec();
        self.buffer.drain(..end);
        Ok(Some(frame))
    }

    fn declared_length(&self) -> Option<usize> {
        let header: [u8; HEADER_SIZE] = self.buffer.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(u32::from_le_bytes(header) as usize)
    }

    /// 对端关闭时根据缓冲区状态区分正常关闭与截断
    fn eof_error(&self) -> ProtocolError {
        match self.declared_length() {
            None if self.buffer.is_empty() => ProtocolError::ConnectionClosed,
            None => ProtocolError::TruncatedHeader {
                received: self.buffer.len(),
            },
            Some(expected) => ProtocolError::TruncatedBody {
                received: self.buffer.len() - HEADER_SIZE,
                expected,
            },
        }
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 编码并写入一帧
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame = encode_frame(packet)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 发送数据包（write_packet 的别名）
    pub async fn send<M: Into<Packet>>(&mut self, msg: M) -> Result<()> {
        self.write_packet(&msg.into()).await
    }

    /// 关闭写端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
