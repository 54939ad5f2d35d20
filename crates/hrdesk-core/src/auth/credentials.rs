use anyhow::{Context, Result};
use cookie::Key;
use keyring::Entry;
use tracing::debug;

use crate::config::APP_NAME;

/// Keychain account holding the cookie signing key
const SIGNING_KEY_ACCOUNT: &str = "cookie-signing-key";

/// Remembered sign-in passwords, kept in the OS keychain under the email.
pub struct CredentialStore;

impl CredentialStore {
    /// Store the password for an email in the OS keychain
    pub fn store(email: &str, password: &str) -> Result<()> {
        let entry = Entry::new(APP_NAME, email).context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Retrieve the password for an email from the OS keychain
    pub fn get_password(email: &str) -> Result<String> {
        let entry = Entry::new(APP_NAME, email).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Forget the stored password for an email. Absent entries are fine.
    pub fn delete(email: &str) -> Result<()> {
        let entry = Entry::new(APP_NAME, email).context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }

    /// Cookie signing key kept in the keychain, created on first use so that
    /// a persisted cookie jar still verifies after a restart.
    pub fn signing_key() -> Result<Key> {
        let entry = Entry::new(APP_NAME, SIGNING_KEY_ACCOUNT)
            .context("Failed to create keyring entry")?;
        match entry.get_secret() {
            Ok(secret) => Key::try_from(secret.as_slice())
                .map_err(|e| anyhow::anyhow!("Stored signing key is invalid: {}", e)),
            Err(keyring::Error::NoEntry) => {
                debug!("Generating cookie signing key");
                let key = Key::generate();
                entry
                    .set_secret(key.master())
                    .context("Failed to store signing key in keychain")?;
                Ok(key)
            }
            Err(e) => Err(e).context("Failed to read signing key from keychain"),
        }
    }
}
