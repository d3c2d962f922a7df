use crate::{MaxWireError, Result};
use async_trait::async_trait;

/// Source of the SMS verification code during login
#[async_trait]
pub trait CodeProvider: Send + Sync + 'static {
    /// Return the code the server sent to `phone`
    async fn verification_code(&self, phone: &str) -> Result<String>;
}

/// Prompts on stdout and reads one line from stdin
#[derive(Debug, Default, Clone)]
pub struct StdinCodeProvider;

#[async_trait]
impl CodeProvider for StdinCodeProvider {
    async fn verification_code(&self, phone: &str) -> Result<String> {
        let prompt = format!("Enter the code sent to {}: ", phone);
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(prompt.as_bytes());
            let _ = stdout.flush();

            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .map_err(|e| MaxWireError::Configuration(format!("Failed to read code: {}", e)))?;
            Ok(line.trim().to_string())
        })
        .await
        .map_err(|e| MaxWireError::Configuration(format!("Code prompt task failed: {}", e)))?
    }
}

/// Fixed code, for tests and non-interactive runs
#[derive(Debug, Clone)]
pub struct StaticCode(pub String);

#[async_trait]
impl CodeProvider for StaticCode {
    async fn verification_code(&self, _phone: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}
