use crate::error::ChefError;
use keyring::Entry;

/// Service name for keyring storage
const SERVICE_NAME: &str = "com.recipe-chef";

/// Credentials the clients need at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKey {
    /// Public key the edge-function proxy expects as bearer token
    BackendAnon,
    /// Model-provider key, forwarded to the proxy or used directly
    OpenAi,
}

impl ApiKey {
    fn entry_name(self) -> &'static str {
        match self {
            ApiKey::BackendAnon => "backend_anon_key",
            ApiKey::OpenAi => "openai_api_key",
        }
    }
}

fn entry(key: ApiKey) -> Result<Entry, ChefError> {
    Entry::new(SERVICE_NAME, key.entry_name())
        .map_err(|e| ChefError::Secrets(format!("Failed to create keyring entry: {}", e)))
}

/// Save an API key to the OS keyring
///
/// Uses the native credential storage:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
pub fn save_api_key(key: ApiKey, value: &str) -> Result<(), ChefError> {
    log::info!("Saving {} to OS keyring", key.entry_name());

    entry(key)?
        .set_password(value)
        .map_err(|e| ChefError::Secrets(format!("Failed to save {} to keyring: {}", key.entry_name(), e)))?;

    log::info!("{} saved successfully", key.entry_name());

    Ok(())
}

/// Load an API key from the OS keyring
///
/// Returns an empty string if no key is stored
pub fn load_api_key(key: ApiKey) -> Result<String, ChefError> {
    log::info!("Loading {} from OS keyring", key.entry_name());

    match entry(key)?.get_password() {
        Ok(password) => Ok(password),
        Err(keyring::Error::NoEntry) => {
            log::info!("No {} found in keyring", key.entry_name());
            Ok(String::new())
        }
        Err(e) => {
            log::warn!("Failed to load {} from keyring: {}", key.entry_name(), e);
            // Don't fail - just return empty string
            Ok(String::new())
        }
    }
}

pub fn delete_api_key(key: ApiKey) -> Result<(), ChefError> {
    log::info!("Deleting {} from OS keyring", key.entry_name());

    match entry(key)?.delete_credential() {
        Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(ChefError::Secrets(format!(
            "Failed to delete {}: {}",
            key.entry_name(),
            e
        ))),
    }
}

/// Environment variable first, keyring second
pub fn resolve_api_key(key: ApiKey, env_var: &str) -> Result<String, ChefError> {
    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => load_api_key(key),
    }
}
