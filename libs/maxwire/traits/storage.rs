use crate::Result;

/// Persistent home of the device identity and the session token
///
/// All methods are synchronous and cheap; they are called before any
/// network activity and once more when a token is obtained or revoked.
/// Implementations must be idempotent: `device_id` returns the same value
/// for the lifetime of the store, creating it on first use.
pub trait CredentialStore: Send + Sync + 'static {
    /// Stable device identifier, generated once
    fn device_id(&self) -> Result<String>;

    /// Stored session token, if any
    fn auth_token(&self) -> Result<Option<String>>;

    /// Replace (or clear, with `None`) the stored token for `device_id`
    fn update_auth_token(&self, device_id: &str, token: Option<&str>) -> Result<()>;
}
