//! Login, registration and initial sync
//!
//! ```text
//! AUTH_REQUEST {phone, START_AUTH} ──> temp token
//!        code from CodeProvider (6 digits)
//! AUTH {token, verifyCode, CHECK_CODE} ──> tokenAttrs.LOGIN.token
//!                                      └─> tokenAttrs.REGISTER.token
//!                                             AUTH_CONFIRM {.., REGISTER} ──> token
//! LOGIN {interactive, token, *Sync: 0, chatsCount} ──> chats, profile
//! ```

use super::config::is_valid_phone;
use crate::protocol::{opcode, CMD_REQUEST};
use crate::traits::{CodeProvider, MaxWireError, RequestSender, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Server error code meaning the session token is invalid or expired
pub const INVALID_TOKEN_ERROR: &str = "login.token";

/// Registration details for a phone with no account yet
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub first_name: String,
    pub last_name: Option<String>,
}

/// Chats and profile returned by the initial sync
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub dialogs: Vec<Value>,
    pub chats: Vec<Value>,
    pub channels: Vec<Value>,
    pub me: Option<Value>,
}

impl SyncSnapshot {
    fn from_payload(payload: &Value) -> Self {
        let mut snapshot = SyncSnapshot::default();
        for chat in payload
            .get("chats")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            match chat.get("type").and_then(Value::as_str) {
                Some("DIALOG") => snapshot.dialogs.push(chat.clone()),
                Some("CHAT") => snapshot.chats.push(chat.clone()),
                Some("CHANNEL") => snapshot.channels.push(chat.clone()),
                other => warn!("Skipping chat entry of unknown type {:?}", other),
            }
        }
        snapshot.me = payload
            .get("profile")
            .and_then(|p| p.get("contact"))
            .filter(|c| !c.is_null())
            .cloned();
        snapshot
    }
}

pub struct AuthService<S: RequestSender + ?Sized> {
    sender: Arc<S>,
    codes: Arc<dyn CodeProvider>,
    timeout: Duration,
    language: String,
}

fn rejected(context: &str, e: MaxWireError) -> MaxWireError {
    match e {
        MaxWireError::Server { error, message } => {
            MaxWireError::AuthenticationFailed(format!("{}: {} ({})", context, message, error))
        }
        other => other,
    }
}

impl<S: RequestSender + ?Sized> AuthService<S> {
    pub fn new(
        sender: Arc<S>,
        codes: Arc<dyn CodeProvider>,
        timeout: Duration,
        language: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            codes,
            timeout,
            language: language.into(),
        }
    }

    async fn request(&self, opcode: u16, payload: Value) -> Result<Value> {
        self.sender
            .send_and_wait(opcode, payload, CMD_REQUEST, self.timeout)
            .await?
            .into_result()
    }

    /// Ask the server to send a code to `phone`; returns the temporary token
    pub async fn request_code(&self, phone: &str) -> Result<String> {
        info!("Requesting auth code");
        let payload = self
            .request(
                opcode::AUTH_REQUEST,
                json!({"phone": phone, "type": "START_AUTH", "language": self.language}),
            )
            .await
            .map_err(|e| rejected("Request code failed", e))?;

        payload
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                error!("Failed to request code: token missing");
                MaxWireError::AuthenticationFailed("Failed to request code".into())
            })
    }

    /// Submit the verification code; returns the raw response payload
    pub async fn send_code(&self, temp_token: &str, code: &str) -> Result<Value> {
        info!("Sending verification code");
        self.request(
            opcode::AUTH,
            json!({"token": temp_token, "verifyCode": code, "authTokenType": "CHECK_CODE"}),
        )
        .await
        .map_err(|e| rejected("Send code failed", e))
    }

    /// Finish registration of a new account; returns the session token
    pub async fn confirm_registration(&self, register_token: &str, registration: &Registration) -> Result<String> {
        info!("Confirming registration");
        let payload = self
            .request(
                opcode::AUTH_CONFIRM,
                json!({
                    "token": register_token,
                    "firstName": registration.first_name,
                    "lastName": registration.last_name,
                    "tokenType": "REGISTER",
                }),
            )
            .await
            .map_err(|e| rejected("Registration failed", e))?;

        payload
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MaxWireError::AuthenticationFailed("Registration token not received".into()))
    }

    /// Run the phone → code → token flow
    ///
    /// # Errors
    /// - `Configuration` for a malformed phone or code, or a new account
    ///   with no registration details
    /// - `AuthenticationFailed` when the server rejects any step
    pub async fn login(&self, phone: &str, registration: Option<&Registration>) -> Result<String> {
        if !is_valid_phone(phone) {
            return Err(MaxWireError::Configuration(format!("Invalid phone number format: {}", phone)));
        }
        info!("Starting login flow");

        let temp_token = self.request_code(phone).await?;

        let code = self.codes.verification_code(phone).await?;
        let code = code.trim();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            error!("Invalid code format entered");
            return Err(MaxWireError::Configuration("Invalid code format".into()));
        }

        let response = self.send_code(&temp_token, code).await?;
        let token_attrs = response.get("tokenAttrs");
        let token_of = |kind: &str| {
            token_attrs
                .and_then(|attrs| attrs.get(kind))
                .and_then(|attr| attr.get("token"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        if let Some(token) = token_of("LOGIN") {
            info!("Login successful");
            return Ok(token);
        }

        if let Some(register_token) = token_of("REGISTER") {
            return match registration {
                Some(registration) => self.confirm_registration(&register_token, registration).await,
                None => Err(MaxWireError::Configuration(
                    "Phone is not registered; enable registration and set first_name".into(),
                )),
            };
        }

        error!("Failed to login, token not received");
        Err(MaxWireError::AuthenticationFailed("Failed to login, token not received".into()))
    }

    /// Initial state sync with a session token
    ///
    /// `login.token` is reported as `AuthenticationFailed`; any other server
    /// error is logged and yields an empty snapshot.
    pub async fn sync(&self, token: &str, chats_count: u32) -> Result<SyncSnapshot> {
        info!("Starting initial sync");
        let frame = self
            .sender
            .send_and_wait(
                opcode::LOGIN,
                json!({
                    "interactive": true,
                    "token": token,
                    "chatsSync": 0,
                    "contactsSync": 0,
                    "presenceSync": 0,
                    "draftsSync": 0,
                    "chatsCount": chats_count,
                }),
                CMD_REQUEST,
                self.timeout,
            )
            .await?;

        match frame.into_result() {
            Ok(payload) => {
                let snapshot = SyncSnapshot::from_payload(&payload);
                info!(
                    "Sync completed: dialogs={} chats={} channels={}",
                    snapshot.dialogs.len(),
                    snapshot.chats.len(),
                    snapshot.channels.len()
                );
                Ok(snapshot)
            }
            Err(MaxWireError::Server { error, message }) if error == INVALID_TOKEN_ERROR => {
                error!("Sync error: {}", error);
                Err(MaxWireError::AuthenticationFailed(if message.is_empty() {
                    error
                } else {
                    message
                }))
            }
            Err(e) => {
                error!("Sync error: {}", e);
                Ok(SyncSnapshot::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::traits::StaticCode;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Answers each opcode from a table and records requests
    struct TableSender {
        replies: Vec<(u16, Value)>,
        seen: Mutex<Vec<(u16, Value)>>,
    }

    #[async_trait]
    impl RequestSender for TableSender {
        async fn send_and_wait(&self, opcode: u16, payload: Value, cmd: u16, _t: Duration) -> Result<Frame> {
            self.seen.lock().push((opcode, payload));
            let reply = self
                .replies
                .iter()
                .find(|(op, _)| *op == opcode)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| MaxWireError::Timeout(format!("opcode {}", opcode)))?;
            Ok(Frame::new(11, cmd + 1, 0, opcode, reply))
        }
    }

    fn service(replies: Vec<(u16, Value)>, code: &str) -> (AuthService<TableSender>, Arc<TableSender>) {
        let sender = Arc::new(TableSender {
            replies,
            seen: Mutex::new(Vec::new()),
        });
        let svc = AuthService::new(
            sender.clone(),
            Arc::new(StaticCode(code.to_string())),
            Duration::from_secs(1),
            "ru",
        );
        (svc, sender)
    }

    #[tokio::test]
    async fn test_login_flow() {
        let (svc, sender) = service(
            vec![
                (opcode::AUTH_REQUEST, json!({"token": "temp"})),
                (opcode::AUTH, json!({"tokenAttrs": {"LOGIN": {"token": "session"}}})),
            ],
            "123456",
        );
        assert_eq!(svc.login("+79991234567", None).await.unwrap(), "session");

        let seen = sender.seen.lock();
        assert_eq!(seen[0].1["type"], "START_AUTH");
        assert_eq!(seen[1].1, json!({"token": "temp", "verifyCode": "123456", "authTokenType": "CHECK_CODE"}));
    }

    #[tokio::test]
    async fn test_registration_flow() {
        let (svc, sender) = service(
            vec![
                (opcode::AUTH_REQUEST, json!({"token": "temp"})),
                (opcode::AUTH, json!({"tokenAttrs": {"REGISTER": {"token": "reg"}}})),
                (opcode::AUTH_CONFIRM, json!({"token": "fresh"})),
            ],
            "000111",
        );
        let registration = Registration {
            first_name: "Ivan".into(),
            last_name: None,
        };
        assert_eq!(
            svc.login("79991234567", Some(&registration)).await.unwrap(),
            "fresh"
        );
        assert_eq!(sender.seen.lock()[2].1["tokenType"], "REGISTER");
    }

    #[tokio::test]
    async fn test_bad_code_and_phone_are_configuration_errors() {
        let (svc, _) = service(vec![(opcode::AUTH_REQUEST, json!({"token": "temp"}))], "12ab");
        assert!(matches!(
            svc.login("+79991234567", None).await,
            Err(MaxWireError::Configuration(_))
        ));
        assert!(matches!(
            svc.login("nope", None).await,
            Err(MaxWireError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_code_is_authentication_error() {
        let (svc, _) = service(
            vec![
                (opcode::AUTH_REQUEST, json!({"token": "temp"})),
                (opcode::AUTH, json!({"error": "verify.code.wrong", "localizedMessage": "Wrong code"})),
            ],
            "123456",
        );
        assert!(matches!(
            svc.login("+79991234567", None).await,
            Err(MaxWireError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_partitions_chats() {
        let (svc, sender) = service(
            vec![(
                opcode::LOGIN,
                json!({
                    "chats": [
                        {"id": 1, "type": "DIALOG"},
                        {"id": -2, "type": "CHAT"},
                        {"id": -3, "type": "CHANNEL"},
                        {"id": -4, "type": "CHAT"}
                    ],
                    "profile": {"contact": {"id": 42}}
                }),
            )],
            "",
        );
        let snapshot = svc.sync("tok", 40).await.unwrap();
        assert_eq!(snapshot.dialogs.len(), 1);
        assert_eq!(snapshot.chats.len(), 2);
        assert_eq!(snapshot.channels.len(), 1);
        assert_eq!(snapshot.me, Some(json!({"id": 42})));
        assert_eq!(sender.seen.lock()[0].1["chatsCount"], 40);
    }

    #[tokio::test]
    async fn test_sync_invalid_token() {
        let (svc, _) = service(
            vec![(opcode::LOGIN, json!({"error": "login.token", "localizedMessage": "expired"}))],
            "",
        );
        assert_eq!(
            svc.sync("dead", 40).await.unwrap_err(),
            MaxWireError::AuthenticationFailed("expired".into())
        );
    }

    #[tokio::test]
    async fn test_sync_other_server_error_is_tolerated() {
        let (svc, _) = service(vec![(opcode::LOGIN, json!({"error": "service.unavailable"}))], "");
        assert_eq!(svc.sync("tok", 40).await.unwrap(), SyncSnapshot::default());
    }
}
