pub mod states;

use super::client::MaxClient;
use super::config::ClientConfig;
use crate::storage::FileStore;
use crate::traits::*;
use states::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::Span;

/// Type-state builder for [`MaxClient`]
///
/// A configuration is required; everything else falls back to what the
/// configuration implies:
///
/// | piece | default |
/// |---|---|
/// | transport | `config.transport` (WebSocket or raw socket) |
/// | credential store | [`FileStore`] in `config.work_dir` |
/// | code provider | [`StdinCodeProvider`] |
/// | reconnect strategy | [`ExponentialBackoff`] from the reconnect fields |
/// | shutdown flag | a fresh flag set to `true` |
/// | span | `max_client{transport=…}` |
pub struct MaxClientBuilder<C: ConfigState> {
    _state: TypeState<C>,
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CredentialStore>>,
    code_provider: Option<Arc<dyn CodeProvider>>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
    span: Option<Span>,
}

impl MaxClientBuilder<NoConfig> {
    pub fn new() -> Self {
        Self {
            _state: TypeState::new(),
            config: None,
            transport: None,
            store: None,
            code_provider: None,
            reconnect_strategy: None,
            shutdown_flag: None,
            span: None,
        }
    }

    pub fn config(self, config: ClientConfig) -> MaxClientBuilder<HasConfig> {
        MaxClientBuilder {
            _state: TypeState::new(),
            config: Some(config),
            transport: self.transport,
            store: self.store,
            code_provider: self.code_provider,
            reconnect_strategy: self.reconnect_strategy,
            shutdown_flag: self.shutdown_flag,
            span: self.span,
        }
    }
}

impl Default for MaxClientBuilder<NoConfig> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ConfigState> MaxClientBuilder<C> {
    /// Use a custom transport instead of the one `config.transport` selects
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn code_provider(mut self, provider: impl CodeProvider + 'static) -> Self {
        self.code_provider = Some(Arc::new(provider));
        self
    }

    pub fn reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect_strategy = Some(Box::new(strategy));
        self
    }

    /// Share a shutdown flag with other components
    ///
    /// Storing `false` stops the client: no further reconnects, and a
    /// running session is closed within a poll interval.
    ///
    /// # Example
    /// ```ignore
    /// let shutdown_flag = Arc::new(AtomicBool::new(true));
    /// let client = maxwire::builder()
    ///     .config(config)
    ///     .shutdown_flag(Arc::clone(&shutdown_flag))
    ///     .build()?;
    ///
    /// // From a signal handler:
    /// shutdown_flag.store(false, Ordering::Release);
    /// ```
    pub fn shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Parent span for every log line the client emits
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl MaxClientBuilder<HasConfig> {
    /// Validate the configuration and assemble the client
    ///
    /// # Errors
    /// `Configuration` for an invalid configuration or proxy, `Storage` when
    /// the default credential store cannot be opened.
    pub fn build(self) -> Result<MaxClient> {
        let config = self
            .config
            .ok_or_else(|| MaxWireError::Configuration("configuration missing".into()))?;
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => crate::transport::from_config(&config)?,
        };

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::open(&config.work_dir)?) as Arc<dyn CredentialStore>,
        };

        let code_provider = self
            .code_provider
            .unwrap_or_else(|| Arc::new(StdinCodeProvider));

        let reconnect_strategy = self.reconnect_strategy.unwrap_or_else(|| {
            Box::new(ExponentialBackoff::new(
                config.reconnect_delay(),
                config.max_reconnect_delay(),
                config.max_reconnect_attempts,
            ))
        });

        let shutdown_flag = self
            .shutdown_flag
            .unwrap_or_else(|| Arc::new(AtomicBool::new(true)));

        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("max_client", transport = %transport.kind()));

        Ok(MaxClient::new(
            config,
            transport,
            store,
            code_provider,
            reconnect_strategy,
            shutdown_flag,
            span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn config() -> ClientConfig {
        ClientConfig {
            token: Some("tok".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let client = MaxClientBuilder::new()
            .config(ClientConfig {
                work_dir: dir.path().to_path_buf(),
                ..config()
            })
            .build()
            .unwrap();
        assert!(!client.is_connected());
        assert!(dir.path().join("session.json").exists());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = MaxClientBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .config(ClientConfig::default())
            .build();
        assert!(matches!(result, Err(MaxWireError::Configuration(_))));
    }

    #[test]
    fn test_shared_shutdown_flag() {
        let flag = Arc::new(AtomicBool::new(true));
        let client = MaxClientBuilder::new()
            .config(config())
            .store(Arc::new(MemoryStore::new()))
            .shutdown_flag(flag.clone())
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(client.shutdown_flag(), &flag));
    }
}
