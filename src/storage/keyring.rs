//! OS secret store access via the system keyring
//!
//! Some platforms hand back generic-password items as hex-encoded UTF-8
//! rather than the raw string; reads detect that shape (even length, all hex
//! digits, optional `0x` prefix) and decode transparently.

use keyring::Entry;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("Secret store error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Read/write access to named secret-store entries. Core code only reads;
/// `write` exists for tooling and tests.
pub trait SecretStore: Send + Sync {
    fn read(&self, service: &str) -> Result<Option<String>, SecretStoreError>;
    fn write(&self, service: &str, value: &str) -> Result<(), SecretStoreError>;
}

pub struct KeyringSecretStore {
    account: String,
}

impl KeyringSecretStore {
    pub fn new() -> Self {
        let account = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "default".to_string());
        Self { account }
    }
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringSecretStore {
    fn read(&self, service: &str) -> Result<Option<String>, SecretStoreError> {
        let entry = Entry::new(service, &self.account)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(decode_possible_hex(&value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretStoreError::Keyring(e)),
        }
    }

    fn write(&self, service: &str, value: &str) -> Result<(), SecretStoreError> {
        let entry = Entry::new(service, &self.account)?;
        entry.set_password(value)?;
        tracing::debug!("Stored secret for service: {}", service);
        Ok(())
    }
}

/// If `value` looks like hex-encoded UTF-8, decode it; otherwise return it
/// unchanged.
pub fn decode_possible_hex(value: &str) -> String {
    match hex_decode(value) {
        Some(decoded) => decoded,
        None => value.to_string(),
    }
}

fn hex_decode(value: &str) -> Option<String> {
    let mut hex = value.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let bytes: Option<Vec<u8>> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect();

    String::from_utf8(bytes?).ok()
}
