use super::proxy::ProxyConfig;
use super::socks5;
use crate::{MaxWireError, Result};
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpSocket, TcpStream};

/// Dial `host:port`, directly or through a SOCKS5 proxy
///
/// Keep-alive is enabled on the socket before connecting. Every resolved
/// address is tried in order; the last failure is reported.
pub async fn connect_tcp(host: &str, port: u16, proxy: Option<&ProxyConfig>) -> Result<TcpStream> {
    let (dial_host, dial_port) = match proxy {
        Some(p) => (p.host.as_str(), p.port),
        None => (host, port),
    };

    let addrs: Vec<SocketAddr> = lookup_host((dial_host, dial_port))
        .await
        .map_err(|e| {
            MaxWireError::HandshakeFailed(format!("resolve {}:{}: {}", dial_host, dial_port, e))
        })?
        .collect();

    let mut last_err = MaxWireError::HandshakeFailed(format!(
        "no addresses for {}:{}",
        dial_host, dial_port
    ));
    let mut stream = None;
    for addr in addrs {
        match dial(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_err = MaxWireError::HandshakeFailed(format!("connect {}: {}", addr, e));
            }
        }
    }
    let mut stream = stream.ok_or(last_err)?;

    if let Some(p) = proxy {
        tracing::debug!("Negotiating SOCKS5 with {}:{}", p.host, p.port);
        socks5::negotiate(&mut stream, p, host, port).await?;
    }

    Ok(stream)
}

async fn dial(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_keepalive(true)?;
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_direct_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.is_ok() });

        let stream = connect_tcp("127.0.0.1", port, None).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
        assert!(accept.await.unwrap());
    }

    #[tokio::test]
    async fn test_refused_is_handshake_failure() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = connect_tcp("127.0.0.1", port, None).await.unwrap_err();
        assert!(matches!(err, MaxWireError::HandshakeFailed(_)));
    }
}
