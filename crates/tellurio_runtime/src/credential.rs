//! OS-keyring-backed credential persistence for the API key.
//!
//! Mirrors the original Python client's use of the `keyring` library under a
//! configurable service name: store on verified login, read back on a
//! subsequent login that doesn't supply a key explicitly.

use crate::config::KeyringConfig;
use crate::errors::TellurioError;

/// A place to durably stash the API key across process restarts. The only
/// concrete implementation shipped is the OS keyring; tests use an
/// in-memory fake.
pub trait CredentialStore: Send + Sync {
    fn get_api_key(&self) -> Result<Option<String>, TellurioError>;
    fn set_api_key(&self, api_key: &str) -> Result<(), TellurioError>;
}

/// Credential store backed by the platform keyring (Keychain, Secret
/// Service, Credential Manager, ...) via the `keyring` crate.
pub struct KeyringCredentialStore {
    config: KeyringConfig,
}

impl KeyringCredentialStore {
    pub fn new(config: KeyringConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(KeyringConfig::from_env())
    }

    fn entry(&self) -> Result<keyring::Entry, TellurioError> {
        keyring::Entry::new(&self.config.service_name, &self.config.entry_name)
            .map_err(|e| TellurioError::protocol(format!("keyring entry error: {e}")))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get_api_key(&self) -> Result<Option<String>, TellurioError> {
        match self.entry()?.get_password() {
            Ok(key) => Ok(Some(key)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TellurioError::protocol(format!("keyring read error: {e}"))),
        }
    }

    fn set_api_key(&self, api_key: &str) -> Result<(), TellurioError> {
        self.entry()?
            .set_password(api_key)
            .map_err(|e| TellurioError::protocol(format!("keyring write error: {e}")))
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fake {
    //! An in-memory credential store used by tests in place of the real
    //! platform keyring, which is unavailable in CI sandboxes.
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeCredentialStore {
        slot: Mutex<Option<String>>,
    }

    impl FakeCredentialStore {
        pub fn empty() -> Self {
            Self::default()
        }

        pub fn seeded(api_key: impl Into<String>) -> Self {
            Self {
                slot: Mutex::new(Some(api_key.into())),
            }
        }
    }

    impl CredentialStore for FakeCredentialStore {
        fn get_api_key(&self) -> Result<Option<String>, TellurioError> {
            Ok(self.slot.lock().unwrap().clone())
        }

        fn set_api_key(&self, api_key: &str) -> Result<(), TellurioError> {
            *self.slot.lock().unwrap() = Some(api_key.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeCredentialStore;
    use super::*;

    #[test]
    fn fake_store_roundtrips() {
        let store = FakeCredentialStore::empty();
        assert_eq!(store.get_api_key().unwrap(), None);
        store.set_api_key("sk-abc").unwrap();
        assert_eq!(store.get_api_key().unwrap(), Some("sk-abc".to_string()));
    }

    #[test]
    fn fake_store_can_be_seeded() {
        let store = FakeCredentialStore::seeded("sk-seed");
        assert_eq!(store.get_api_key().unwrap(), Some("sk-seed".to_string()));
    }
}
