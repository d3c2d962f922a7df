use crate::{MaxWireError, Result};
use url::Url;

/// SOCKS5 proxy endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

// Credentials stay out of logs
impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ProxyConfig {
    /// Parse `socks5://[user[:pass]@]host[:port]` (`socks5h` is accepted too)
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| MaxWireError::Configuration(format!("Invalid proxy URL '{}': {}", raw, e)))?;

        match url.scheme() {
            "socks5" | "socks5h" => {}
            other => {
                return Err(MaxWireError::Configuration(format!(
                    "Unsupported proxy scheme '{}', only socks5 is supported",
                    other
                )))
            }
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MaxWireError::Configuration(format!("Proxy URL '{}' has no host", raw)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Ok(Self {
            host,
            port: url.port().unwrap_or(1080),
            username,
            password: url.password().map(str::to_string),
        })
    }

    /// Resolve a configured proxy setting
    ///
    /// `auto` looks at `ALL_PROXY` / `all_proxy` and ignores non-SOCKS
    /// values; anything else is parsed as a URL.
    pub fn resolve(setting: Option<&str>) -> Result<Option<Self>> {
        match setting.map(str::trim) {
            None | Some("") => Ok(None),
            Some("auto") => Ok(Self::from_env()),
            Some(raw) => Self::parse(raw).map(Some),
        }
    }

    fn from_env() -> Option<Self> {
        ["ALL_PROXY", "all_proxy"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find_map(|raw| match Self::parse(&raw) {
                Ok(proxy) => Some(proxy),
                Err(e) => {
                    tracing::debug!("Ignoring proxy from environment: {}", e);
                    None
                }
            })
    }

    /// `user:pass` pair for RFC 1929 sub-negotiation, if any
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|u| (u, self.password.as_deref().unwrap_or("")))
    }
}
