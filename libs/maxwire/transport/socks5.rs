//! SOCKS5 client negotiation (RFC 1928, RFC 1929 subset)
//!
//! Supports the no-auth and username/password methods and the CONNECT
//! command with a domain-name target. The bound address in the reply is
//! read and discarded for every address type.

use super::proxy::ProxyConfig;
use crate::{MaxWireError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_UNACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

fn proxy_err(context: &str, e: impl std::fmt::Display) -> MaxWireError {
    MaxWireError::Proxy(format!("{}: {}", context, e))
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

/// Negotiate a CONNECT to `target_host:target_port` over an open stream to
/// the proxy
pub async fn negotiate<S>(
    stream: &mut S,
    proxy: &ProxyConfig,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting
    let credentials = proxy.credentials();
    let greeting: &[u8] = if credentials.is_some() {
        &[VERSION, 0x02, METHOD_NO_AUTH, METHOD_USER_PASS]
    } else {
        &[VERSION, 0x01, METHOD_NO_AUTH]
    };
    stream
        .write_all(greeting)
        .await
        .map_err(|e| proxy_err("SOCKS5 greeting failed", e))?;

    let mut choice = [0u8; 2];
    stream
        .read_exact(&mut choice)
        .await
        .map_err(|e| proxy_err("SOCKS5 greeting response failed", e))?;
    if choice[0] != VERSION {
        return Err(MaxWireError::Proxy(format!(
            "invalid SOCKS version in greeting response: {}",
            choice[0]
        )));
    }

    match (choice[1], credentials) {
        (METHOD_NO_AUTH, _) => {}
        (METHOD_USER_PASS, Some((user, pass))) => authenticate(stream, user, pass).await?,
        (METHOD_UNACCEPTABLE, _) => {
            return Err(MaxWireError::Proxy("no acceptable SOCKS5 auth method".into()))
        }
        (method, _) => {
            return Err(MaxWireError::Proxy(format!(
                "proxy selected unsupported auth method {:#04x}",
                method
            )))
        }
    }

    // CONNECT
    let host = target_host.as_bytes();
    if host.is_empty() || host.len() > 255 {
        return Err(MaxWireError::Proxy(format!(
            "target host length {} out of range",
            host.len()
        )));
    }
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8]);
    request.extend_from_slice(host);
    request.extend_from_slice(&target_port.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| proxy_err("SOCKS5 connect failed", e))?;

    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| proxy_err("SOCKS5 connect response failed", e))?;
    if reply[0] != VERSION {
        return Err(MaxWireError::Proxy(format!(
            "invalid SOCKS version in connect response: {}",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(MaxWireError::Proxy(format!(
            "SOCKS5 connect failed: {} ({:#04x})",
            reply_message(reply[1]),
            reply[1]
        )));
    }

    // Bound address + port, unused but must be drained
    let addr_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| proxy_err("SOCKS5 bound address failed", e))?;
            len[0] as usize
        }
        other => {
            return Err(MaxWireError::Proxy(format!(
                "invalid SOCKS5 address type {:#04x}",
                other
            )))
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| proxy_err("SOCKS5 bound address failed", e))?;

    tracing::debug!("SOCKS5 tunnel to {}:{} established", target_host, target_port);
    Ok(())
}

async fn authenticate<S>(stream: &mut S, user: &str, pass: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if user.len() > 255 || pass.len() > 255 {
        return Err(MaxWireError::Proxy("SOCKS5 credentials too long".into()));
    }
    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(0x01);
    request.push(user.len() as u8);
    request.extend_from_slice(user.as_bytes());
    request.push(pass.len() as u8);
    request.extend_from_slice(pass.as_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| proxy_err("SOCKS5 auth failed", e))?;

    let mut status = [0u8; 2];
    stream
        .read_exact(&mut status)
        .await
        .map_err(|e| proxy_err("SOCKS5 auth response failed", e))?;
    if status[1] != 0x00 {
        return Err(MaxWireError::Proxy("SOCKS5 authentication rejected".into()));
    }
    Ok(())
}
