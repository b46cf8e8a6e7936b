use chrono::Utc;
use cyder_tools::log::info;
use dashmap::DashMap;
use serde::Serialize;

use super::vault::{CredentialVault, VaultError};

/// One provider connection row. The credential only ever exists here as an
/// AEAD blob; disconnect deactivates the row instead of deleting it so
/// historical overrides stay attributable.
pub struct ProviderConnection {
    pub provider: String,
    encrypted_key: Option<Vec<u8>>,
    key_hint: Option<String>,
    pub active: bool,
    pub connected_at: i64,
    pub updated_at: i64,
}

/// What the management API is allowed to see: active state and a short
/// recognition hint, never key material in any form.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub provider: String,
    pub active: bool,
    pub has_key: bool,
    pub key_hint: Option<String>,
    pub connected_at: i64,
    pub updated_at: i64,
}

pub struct ProviderConnectionStore {
    connections: DashMap<String, ProviderConnection>,
}

impl ProviderConnectionStore {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Activate a provider, encrypting and storing its credential when one
    /// is supplied. Reconnecting an existing provider re-encrypts the new
    /// credential over the old one.
    pub fn connect(
        &self,
        provider: &str,
        credential: Option<&str>,
        vault: &CredentialVault,
    ) -> Result<ProviderSummary, VaultError> {
        let now = Utc::now().timestamp_millis();
        let encrypted = match credential {
            Some(plaintext) => Some(vault.encrypt(plaintext)?),
            None => None,
        };
        let hint = credential.map(key_hint);

        let mut entry = self
            .connections
            .entry(provider.to_string())
            .or_insert_with(|| ProviderConnection {
                provider: provider.to_string(),
                encrypted_key: None,
                key_hint: None,
                active: false,
                connected_at: now,
                updated_at: now,
            });
        entry.active = true;
        entry.updated_at = now;
        if encrypted.is_some() {
            entry.encrypted_key = encrypted;
            entry.key_hint = hint;
        }
        info!("Provider '{}' connected", provider);
        Ok(summarize(&entry))
    }

    /// Deactivate a provider. Returns false when it was not active, which
    /// makes disconnect safe to retry.
    pub fn disconnect(&self, provider: &str) -> bool {
        match self.connections.get_mut(provider) {
            Some(mut entry) => {
                let was_active = entry.active;
                entry.active = false;
                entry.updated_at = Utc::now().timestamp_millis();
                if was_active {
                    info!("Provider '{}' disconnected", provider);
                }
                was_active
            }
            None => false,
        }
    }

    pub fn active_providers(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .connections
            .iter()
            .filter(|e| e.active)
            .map(|e| e.provider.clone())
            .collect();
        active.sort();
        active
    }

    pub fn is_active(&self, provider: &str) -> bool {
        self.connections
            .get(provider)
            .map(|e| e.active)
            .unwrap_or(false)
    }

    pub fn list(&self) -> Vec<ProviderSummary> {
        let mut all: Vec<ProviderSummary> =
            self.connections.iter().map(|e| summarize(&e)).collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }

    /// Decrypt the stored credential at call time. `Ok(None)` means the
    /// provider has no key on file; a decryption failure is surfaced as-is
    /// and must never fall back to a default credential.
    pub fn credential(
        &self,
        provider: &str,
        vault: &CredentialVault,
    ) -> Result<Option<String>, VaultError> {
        match self.connections.get(provider) {
            Some(entry) => match entry.encrypted_key.as_deref() {
                Some(blob) => vault.decrypt(blob).map(Some),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }
}

fn summarize(connection: &ProviderConnection) -> ProviderSummary {
    ProviderSummary {
        provider: connection.provider.clone(),
        active: connection.active,
        has_key: connection.encrypted_key.is_some(),
        key_hint: connection.key_hint.clone(),
        connected_at: connection.connected_at,
        updated_at: connection.updated_at,
    }
}

// Short prefix for operator recognition; reveals nothing recoverable.
fn key_hint(credential: &str) -> String {
    if credential.len() > 10 {
        let prefix: String = credential.chars().take(6).collect();
        format!("{}…", prefix)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new("test-secret")
    }

    #[test]
    fn connect_stores_credential_and_lists_without_it() {
        let store = ProviderConnectionStore::new();
        let vault = vault();
        store
            .connect("openai", Some("sk-live-abcdef123456"), &vault)
            .unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].active);
        assert!(listed[0].has_key);
        assert_eq!(listed[0].key_hint.as_deref(), Some("sk-liv…"));
        assert_eq!(
            store.credential("openai", &vault).unwrap().as_deref(),
            Some("sk-live-abcdef123456")
        );
    }

    #[test]
    fn disconnect_deactivates_but_keeps_the_row() {
        let store = ProviderConnectionStore::new();
        let vault = vault();
        store.connect("openai", Some("sk-live-abcdef123456"), &vault).unwrap();

        assert!(store.disconnect("openai"));
        assert!(!store.is_active("openai"));
        assert!(store.active_providers().is_empty());
        // Row survives for historical override attribution.
        assert_eq!(store.list().len(), 1);
        // Disconnect is retry-safe.
        assert!(!store.disconnect("openai"));
        assert!(!store.disconnect("never-connected"));
    }

    #[test]
    fn reconnect_re_encrypts_over_the_old_credential() {
        let store = ProviderConnectionStore::new();
        let vault = vault();
        store.connect("openai", Some("sk-old-0123456789"), &vault).unwrap();
        store.disconnect("openai");
        store.connect("openai", Some("sk-new-9876543210"), &vault).unwrap();

        assert!(store.is_active("openai"));
        assert_eq!(
            store.credential("openai", &vault).unwrap().as_deref(),
            Some("sk-new-9876543210")
        );
    }

    #[test]
    fn reconnect_without_credential_keeps_the_stored_one() {
        let store = ProviderConnectionStore::new();
        let vault = vault();
        store.connect("openai", Some("sk-live-abcdef123456"), &vault).unwrap();
        store.connect("openai", None, &vault).unwrap();
        assert_eq!(
            store.credential("openai", &vault).unwrap().as_deref(),
            Some("sk-live-abcdef123456")
        );
    }

    #[test]
    fn wrong_vault_secret_surfaces_integrity_failure() {
        let store = ProviderConnectionStore::new();
        store
            .connect("openai", Some("sk-live-abcdef123456"), &vault())
            .unwrap();
        let wrong = CredentialVault::new("other-secret");
        assert!(store.credential("openai", &wrong).is_err());
    }

    #[test]
    fn short_credentials_get_a_fully_masked_hint() {
        let store = ProviderConnectionStore::new();
        let vault = vault();
        store.connect("ollama", Some("short"), &vault).unwrap();
        assert_eq!(store.list()[0].key_hint.as_deref(), Some("***"));
    }
}
