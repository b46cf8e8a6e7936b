use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use dashmap::DashMap;
use thiserror::Error;

use crate::config::CONFIG;
use crate::routing::assignment::TierAssignmentManager;
use crate::routing::momentum::SessionMomentum;
use crate::routing::tier::Tier;
use crate::service::admission::{ConcurrencyGate, RateGate};
use crate::service::catalog::{ModelCatalog, ModelCatalogEntry};
use crate::service::providers::ProviderConnectionStore;
use crate::service::vault::CredentialVault;

pub type StateRouter = Router<Arc<AppState>>;

pub fn create_state_router() -> StateRouter {
    Router::new()
}

#[derive(Debug, Error)]
pub enum AppStoreError {
    #[error("store lock poisoned: {0}")]
    LockError(String),
}

/// Routing state owned by one tenant: its provider connections and its tier
/// assignment table. Created lazily on the tenant's first touch.
pub struct TenantRouter {
    pub providers: ProviderConnectionStore,
    pub assignments: TierAssignmentManager,
}

impl TenantRouter {
    fn new() -> Self {
        Self {
            providers: ProviderConnectionStore::new(),
            assignments: TierAssignmentManager::new(),
        }
    }

    /// Resolve the effective catalog entry for a tier. `Ok(None)` is the
    /// defined "no route" outcome: no model assigned, the model vanished
    /// from the catalog, or its provider is not currently active.
    pub fn resolve_model(
        &self,
        tier: Tier,
        catalog: &ModelCatalog,
    ) -> Result<Option<Arc<ModelCatalogEntry>>, AppStoreError> {
        let Some(model) = self.assignments.effective_model(tier)? else {
            return Ok(None);
        };
        let Some(entry) = catalog.get(&model)? else {
            return Ok(None);
        };
        if !self.providers.is_active(&entry.provider) {
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

/// Tunables for the process-local state. `create_app_state` fills this from
/// `CONFIG`; tests construct it directly.
pub struct StateOptions {
    pub rate_window: Duration,
    pub rate_limit: u32,
    pub max_in_flight: u32,
    pub key_capacity: usize,
    pub momentum_ttl: Duration,
    pub momentum_sweep: Duration,
    pub vault_secret: String,
}

pub struct AppState {
    pub catalog: ModelCatalog,
    pub momentum: SessionMomentum,
    pub rate_gate: RateGate,
    pub concurrency_gate: ConcurrencyGate,
    pub vault: CredentialVault,
    tenants: DashMap<String, Arc<TenantRouter>>,
}

impl AppState {
    pub fn new(options: StateOptions) -> Self {
        Self {
            catalog: ModelCatalog::with_defaults(),
            momentum: SessionMomentum::new(options.momentum_ttl, options.momentum_sweep),
            rate_gate: RateGate::new(
                options.rate_window,
                options.rate_limit,
                options.key_capacity,
            ),
            concurrency_gate: ConcurrencyGate::new(options.max_in_flight, options.key_capacity),
            vault: CredentialVault::new(&options.vault_secret),
            tenants: DashMap::new(),
        }
    }

    /// The tenant's router state, created on first use.
    pub fn tenant(&self, tenant_id: &str) -> Arc<TenantRouter> {
        self.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(TenantRouter::new()))
            .clone()
    }

    /// Stop background sweepers and release admission state for clean
    /// process shutdown.
    pub fn shutdown(&self) {
        self.momentum.dispose();
        self.rate_gate.dispose();
        self.concurrency_gate.dispose();
    }
}

pub fn create_app_state() -> Arc<AppState> {
    Arc::new(AppState::new(StateOptions {
        rate_window: CONFIG.admission.rate_window(),
        rate_limit: CONFIG.admission.rate_limit,
        max_in_flight: CONFIG.admission.max_in_flight,
        key_capacity: CONFIG.admission.key_capacity,
        momentum_ttl: CONFIG.momentum.ttl(),
        momentum_sweep: CONFIG.momentum.sweep_interval(),
        vault_secret: CONFIG.secret_key.clone(),
    }))
}

#[cfg(test)]
pub(crate) fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(StateOptions {
        rate_window: Duration::from_secs(60),
        rate_limit: 100,
        max_in_flight: 10,
        key_capacity: 1000,
        momentum_ttl: Duration::from_secs(1800),
        momentum_sweep: Duration::from_secs(600),
        vault_secret: "test-vault-secret".to_string(),
    }))
}
