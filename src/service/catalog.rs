use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::service::app_state::AppStoreError;

/// One model row of the pricing/capability reference data.
///
/// Entries are refreshed wholesale from the external pricing cache and are
/// immutable for the duration of a request; readers only ever hold `Arc`s
/// into the current snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub model_name: String,
    /// Canonical provider key, see `proxy::endpoints`.
    pub provider: String,
    /// USD per input token.
    pub input_price: f64,
    /// USD per output token.
    pub output_price: f64,
    pub context_window: u32,
    pub supports_reasoning: bool,
    pub supports_code: bool,
    /// Coarse quality score, 1-5.
    pub quality: u8,
    pub synced_at: i64,
}

impl ModelCatalogEntry {
    /// Combined price used for cheapest-capable selection.
    pub fn total_price(&self) -> f64 {
        self.input_price + self.output_price
    }
}

pub struct ModelCatalog {
    entries: RwLock<HashMap<String, Arc<ModelCatalogEntry>>>,
}

impl ModelCatalog {
    pub fn new(entries: Vec<ModelCatalogEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|e| (e.model_name.clone(), Arc::new(e)))
            .collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    /// Default reference data, used until the first pricing-cache sync.
    pub fn with_defaults() -> Self {
        Self::new(seed_entries())
    }

    pub fn get(&self, model_name: &str) -> Result<Option<Arc<ModelCatalogEntry>>, AppStoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        Ok(entries.get(model_name).cloned())
    }

    pub fn list(&self) -> Result<Vec<Arc<ModelCatalogEntry>>, AppStoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        let mut all: Vec<Arc<ModelCatalogEntry>> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.model_name.cmp(&b.model_name));
        Ok(all)
    }

    /// Models offered by any of the given providers.
    pub fn models_for_providers(
        &self,
        providers: &[String],
    ) -> Result<Vec<Arc<ModelCatalogEntry>>, AppStoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        Ok(entries
            .values()
            .filter(|e| providers.iter().any(|p| p == &e.provider))
            .cloned()
            .collect())
    }

    /// Replace the whole snapshot with fresh rows from the pricing cache.
    pub fn replace_all(&self, entries: Vec<ModelCatalogEntry>) -> Result<(), AppStoreError> {
        let map = entries
            .into_iter()
            .map(|e| (e.model_name.clone(), Arc::new(e)))
            .collect();
        let mut current = self
            .entries
            .write()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        *current = map;
        Ok(())
    }
}

fn seed_entries() -> Vec<ModelCatalogEntry> {
    let synced_at = Utc::now().timestamp_millis();
    let entry = |model: &str,
                 provider: &str,
                 input_price: f64,
                 output_price: f64,
                 context_window: u32,
                 supports_reasoning: bool,
                 supports_code: bool,
                 quality: u8| ModelCatalogEntry {
        model_name: model.to_string(),
        provider: provider.to_string(),
        input_price,
        output_price,
        context_window,
        supports_reasoning,
        supports_code,
        quality,
        synced_at,
    };

    vec![
        entry("gpt-4o-mini", "openai", 0.15e-6, 0.60e-6, 128_000, false, true, 3),
        entry("gpt-4o", "openai", 2.50e-6, 10.00e-6, 128_000, false, true, 4),
        entry("o3", "openai", 10.00e-6, 40.00e-6, 200_000, true, true, 5),
        entry("claude-3-5-haiku", "anthropic", 0.80e-6, 4.00e-6, 200_000, false, true, 3),
        entry("claude-sonnet-4", "anthropic", 3.00e-6, 15.00e-6, 200_000, true, true, 5),
        entry("gemini-2.0-flash", "google", 0.10e-6, 0.40e-6, 1_000_000, false, true, 3),
        entry("gemini-2.5-pro", "google", 1.25e-6, 10.00e-6, 1_000_000, true, true, 4),
        entry("llama3.1:8b", "ollama", 0.0, 0.0, 128_000, false, false, 2),
    ]
}
