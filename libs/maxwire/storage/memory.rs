use crate::traits::{CredentialStore, Result};
use parking_lot::RwLock;

/// In-memory [`CredentialStore`]
#[derive(Debug)]
pub struct MemoryStore {
    device_id: String,
    token: RwLock<Option<String>>,
}

impl MemoryStore {
    /// Fresh store with a random device id and no token
    pub fn new() -> Self {
        Self::with_device_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_device_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            token: RwLock::new(None),
        }
    }

    /// Store pre-seeded with a token
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        *store.token.write() = Some(token.into());
        store
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryStore {
    fn device_id(&self) -> Result<String> {
        Ok(self.device_id.clone())
    }

    fn auth_token(&self) -> Result<Option<String>> {
        Ok(self.token.read().clone())
    }

    fn update_auth_token(&self, _device_id: &str, token: Option<&str>) -> Result<()> {
        *self.token.write() = token.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lifecycle() {
        let store = MemoryStore::with_device_id("dev-1");
        assert_eq!(store.device_id().unwrap(), "dev-1");
        assert_eq!(store.auth_token().unwrap(), None);

        store.update_auth_token("dev-1", Some("tok")).unwrap();
        assert_eq!(store.auth_token().unwrap().as_deref(), Some("tok"));

        store.update_auth_token("dev-1", None).unwrap();
        assert_eq!(store.auth_token().unwrap(), None);
    }
}
