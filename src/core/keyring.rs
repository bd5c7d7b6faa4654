//! API keys stored in the platform keyring, one entry per provider host.

use keyring::Entry;
use std::error::Error;
use std::fmt;
use tracing::debug;

use crate::utils::url::host_of;

pub const KEYRING_SERVICE: &str = "parley";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain service is
/// locked or inaccessible).
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
    /// The base URL has no host to key the entry by.
    NoHost(String),
}

impl KeyringAccessError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => {
                write!(f, "{err}")
            }
            KeyringAccessError::NoHost(url) => write!(f, "no host in base URL: {url}"),
        }
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => Some(err),
            KeyringAccessError::NoHost(_) => None,
        }
    }
}

/// Keyring user name for a provider: the host of its base URL.
pub fn account_for(base_url: &str) -> Result<String, KeyringAccessError> {
    host_of(base_url).ok_or_else(|| KeyringAccessError::NoHost(base_url.to_string()))
}

fn entry_for(base_url: &str) -> Result<Entry, KeyringAccessError> {
    Ok(Entry::new(KEYRING_SERVICE, &account_for(base_url)?)?)
}

/// Looks up the stored key; `Ok(None)` when nothing is stored.
pub fn get_api_key(base_url: &str) -> Result<Option<String>, KeyringAccessError> {
    let entry = entry_for(base_url)?;
    match entry.get_password() {
        Ok(key) => {
            debug!(base_url, "api key found in keyring");
            Ok(Some(key))
        }
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn store_api_key(base_url: &str, api_key: &str) -> Result<(), KeyringAccessError> {
    entry_for(base_url)?.set_password(api_key)?;
    Ok(())
}

/// Returns whether an entry existed.
pub fn delete_api_key(base_url: &str) -> Result<bool, KeyringAccessError> {
    match entry_for(base_url)?.delete_credential() {
        Ok(()) => Ok(true),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(err) => Err(err.into()),
    }
}
