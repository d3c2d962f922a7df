use super::{net, tls, ProxyConfig};
use crate::core::config::ClientConfig;
use crate::protocol::{Frame, JsonCodec};
use crate::traits::{MaxWireError, Result, Transport, TransportKind};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Message-oriented transport: one JSON frame per WebSocket text message
///
/// The sink and the stream halves sit behind separate locks so the receive
/// loop never blocks senders.
pub struct WebSocketTransport {
    url: Url,
    origin: String,
    user_agent: String,
    proxy: Option<ProxyConfig>,
    verify_tls: bool,
    connect_timeout: Duration,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    source: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketTransport {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let url = Url::parse(&config.uri)
            .map_err(|e| MaxWireError::Configuration(format!("Invalid uri '{}': {}", config.uri, e)))?;
        Ok(Self {
            url,
            origin: config.origin.clone(),
            user_agent: config.user_agent.header_user_agent.clone(),
            proxy: ProxyConfig::resolve(config.proxy.as_deref())?,
            verify_tls: config.verify_tls,
            connect_timeout: config.connect_timeout(),
            sink: Mutex::new(None),
            source: Mutex::new(None),
        })
    }

    async fn open(&self) -> Result<WsStream> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| MaxWireError::Configuration(format!("uri '{}' has no host", self.url)))?;
        let port = self.url.port_or_known_default().unwrap_or(443);

        let stream = net::connect_tcp(host, port, self.proxy.as_ref()).await?;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| MaxWireError::Configuration(format!("Failed to create request: {}", e)))?;
        for (name, value) in [
            (http::header::ORIGIN, self.origin.as_str()),
            (http::header::USER_AGENT, self.user_agent.as_str()),
        ] {
            match value.parse::<http::header::HeaderValue>() {
                Ok(header_value) => {
                    request.headers_mut().insert(name, header_value);
                }
                Err(_) => warn!("Invalid header value for '{}': {}", name, value),
            }
        }

        let connector = match self.url.scheme() {
            "wss" => Some(Connector::NativeTls(tls::connector(self.verify_tls)?)),
            _ => None,
        };

        let (ws_stream, _) =
            tokio_tungstenite::client_async_tls_with_config(request, stream, None, connector)
                .await
                .map_err(|e| MaxWireError::HandshakeFailed(format!("WebSocket upgrade: {}", e)))?;
        Ok(ws_stream)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn connect(&self) -> Result<()> {
        let ws_stream = tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| {
                MaxWireError::HandshakeFailed(format!(
                    "connect to {} timed out after {:?}",
                    self.url, self.connect_timeout
                ))
            })??;

        let (write, read) = ws_stream.split();
        *self.sink.lock().await = Some(write);
        *self.source.lock().await = Some(read);
        info!("Connected to {}", self.url);
        Ok(())
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let text = JsonCodec::encode(frame)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(MaxWireError::NotConnected)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| MaxWireError::SendFailed(format!("WebSocket send: {}", e)))
    }

    async fn receive_frame(&self) -> Result<Frame> {
        let mut guard = self.source.lock().await;
        let source = guard.as_mut().ok_or(MaxWireError::NotConnected)?;

        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => return JsonCodec::decode(&text),
                Some(Ok(Message::Binary(data))) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| MaxWireError::Decode(format!("binary message: {}", e)))?;
                    return JsonCodec::decode(text);
                }
                Some(Ok(Message::Close(close))) => {
                    return Err(MaxWireError::ConnectionClosed(format!(
                        "server closed: {:?}",
                        close
                    )))
                }
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(MaxWireError::ConnectionClosed(format!("WebSocket: {}", e)))
                }
                None => return Err(MaxWireError::ConnectionClosed("stream ended".into())),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("WebSocket close: {}", e);
            }
        }
        // A reader still parked on the stream sees the close on its own
        if let Ok(mut source) = self.source.try_lock() {
            source.take();
        }
        Ok(())
    }
}
