use super::{net, tls, ProxyConfig};
use crate::core::config::ClientConfig;
use crate::protocol::{read_frame, BinaryCodec, Frame};
use crate::traits::{MaxWireError, Result, Transport, TransportKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_native_tls::TlsStream;
use tracing::{debug, info};

type Stream = TlsStream<TcpStream>;

/// Byte-stream transport: raw TLS socket with binary framing
pub struct SocketTransport {
    host: String,
    port: u16,
    proxy: Option<ProxyConfig>,
    verify_tls: bool,
    connect_timeout: Duration,
    reader: Mutex<Option<ReadHalf<Stream>>>,
    writer: Mutex<Option<WriteHalf<Stream>>>,
}

impl SocketTransport {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            proxy: ProxyConfig::resolve(config.proxy.as_deref())?,
            verify_tls: config.verify_tls,
            connect_timeout: config.connect_timeout(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        })
    }

    async fn open(&self) -> Result<Stream> {
        let tcp = net::connect_tcp(&self.host, self.port, self.proxy.as_ref()).await?;
        tls::handshake(tcp, &self.host, self.verify_tls).await
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&self) -> Result<()> {
        let stream = tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| {
                MaxWireError::HandshakeFailed(format!(
                    "connect to {}:{} timed out after {:?}",
                    self.host, self.port, self.connect_timeout
                ))
            })??;

        let (read, write) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        info!("Connected to {}:{}", self.host, self.port);
        Ok(())
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = BinaryCodec::encode(frame)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(MaxWireError::NotConnected)?;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| MaxWireError::io("socket write", e))?;
        writer
            .flush()
            .await
            .map_err(|e| MaxWireError::io("socket flush", e))
    }

    async fn receive_frame(&self) -> Result<Frame> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(MaxWireError::NotConnected)?;
        read_frame(reader).await
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Socket shutdown: {}", e);
            }
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        Ok(())
    }
}
