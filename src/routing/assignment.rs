use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cyder_tools::log::{debug, info};
use serde::Serialize;
use strum::IntoEnumIterator;

use crate::service::app_state::AppStoreError;
use crate::service::catalog::{ModelCatalog, ModelCatalogEntry};

use super::tier::Tier;

/// Minimum catalog quality score a model needs to serve the `complex` tier.
const COMPLEX_MIN_QUALITY: u8 = 4;

/// Assignment record for one tier. The effective model is the override when
/// pinned, otherwise the auto-assignment; both may be absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierAssignment {
    pub auto_assigned_model: Option<String>,
    pub override_model: Option<String>,
}

impl TierAssignment {
    pub fn effective(&self) -> Option<&str> {
        self.override_model
            .as_deref()
            .or(self.auto_assigned_model.as_deref())
    }
}

/// Operator-facing notice emitted when a disconnect reverts a pinned tier.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideReversion {
    pub tier: Tier,
    pub model: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("override model must be a non-empty string")]
    EmptyModel,
    #[error(transparent)]
    Store(#[from] AppStoreError),
}

/// Owns the tier → model mapping: auto-assignment recomputed from the
/// active provider set, plus optional manual pins. Mutations take the write
/// lock for their whole duration so readers never observe a half-updated
/// table.
pub struct TierAssignmentManager {
    table: RwLock<HashMap<Tier, TierAssignment>>,
}

impl TierAssignmentManager {
    pub fn new() -> Self {
        let table = Tier::iter()
            .map(|t| (t, TierAssignment::default()))
            .collect();
        Self {
            table: RwLock::new(table),
        }
    }

    /// Effective model for a tier: override wins over auto-assignment.
    pub fn effective_model(&self, tier: Tier) -> Result<Option<String>, AppStoreError> {
        let table = self
            .table
            .read()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        Ok(table
            .get(&tier)
            .and_then(|a| a.effective().map(str::to_string)))
    }

    pub fn snapshot(&self) -> Result<HashMap<Tier, TierAssignment>, AppStoreError> {
        let table = self
            .table
            .read()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        Ok(table.clone())
    }

    /// Pin `model` for `tier` regardless of future auto-recomputation. The
    /// tier itself is validated at the API boundary by enum parsing; only
    /// the model string is checked here.
    pub fn set_override(&self, tier: Tier, model: &str) -> Result<(), AssignmentError> {
        if model.trim().is_empty() {
            return Err(AssignmentError::EmptyModel);
        }
        let mut table = self
            .table
            .write()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        table.entry(tier).or_default().override_model = Some(model.trim().to_string());
        info!("Tier {} override pinned to '{}'", tier, model.trim());
        Ok(())
    }

    pub fn clear_override(&self, tier: Tier) -> Result<(), AppStoreError> {
        let mut table = self
            .table
            .write()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        table.entry(tier).or_default().override_model = None;
        Ok(())
    }

    pub fn reset_all(&self) -> Result<(), AppStoreError> {
        let mut table = self
            .table
            .write()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        for assignment in table.values_mut() {
            assignment.override_model = None;
        }
        Ok(())
    }

    /// Recompute every tier's auto-assignment from the currently active
    /// provider set.
    pub fn recompute(
        &self,
        catalog: &ModelCatalog,
        active_providers: &[String],
    ) -> Result<(), AppStoreError> {
        let candidates = catalog.models_for_providers(active_providers)?;
        let mut table = self
            .table
            .write()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;
        Self::recompute_locked(&mut table, &candidates);
        Ok(())
    }

    /// Provider disconnect: revert any override pinned to one of the
    /// disconnected provider's models, then recompute auto-assignments from
    /// the remaining active set. Runs under a single write lock so a
    /// concurrent resolve sees either the old table or the fully updated
    /// one.
    pub fn handle_disconnect(
        &self,
        catalog: &ModelCatalog,
        provider: &str,
        active_providers: &[String],
    ) -> Result<Vec<OverrideReversion>, AppStoreError> {
        let candidates = catalog.models_for_providers(active_providers)?;
        let mut table = self
            .table
            .write()
            .map_err(|e| AppStoreError::LockError(e.to_string()))?;

        let mut reversions = Vec::new();
        for (tier, assignment) in table.iter_mut() {
            let Some(model) = assignment.override_model.clone() else {
                continue;
            };
            let owned_by_disconnected = catalog
                .get(&model)?
                .map(|entry| entry.provider == provider)
                .unwrap_or(false);
            if owned_by_disconnected {
                assignment.override_model = None;
                reversions.push(OverrideReversion {
                    tier: *tier,
                    model: model.clone(),
                    message: format!(
                        "{} tier override on '{}' was reverted because provider '{}' \
                         disconnected; the tier is back to automatic assignment.",
                        tier.display_label(),
                        model,
                        provider
                    ),
                });
            }
        }

        Self::recompute_locked(&mut table, &candidates);
        Ok(reversions)
    }

    fn recompute_locked(
        table: &mut HashMap<Tier, TierAssignment>,
        candidates: &[Arc<ModelCatalogEntry>],
    ) {
        for tier in Tier::iter() {
            let picked = pick_model(tier, candidates);
            debug!(
                "Auto-assignment for tier {}: {}",
                tier,
                picked.as_deref().unwrap_or("<none>")
            );
            table.entry(tier).or_default().auto_assigned_model = picked;
        }
    }
}

// Cheapest capable model for a tier. Simple and standard take the lowest
// total price outright; complex additionally requires the quality gate and
// reasoning requires the capability flag, ties broken by price.
fn pick_model(tier: Tier, candidates: &[Arc<ModelCatalogEntry>]) -> Option<String> {
    let qualifies = |entry: &ModelCatalogEntry| match tier {
        Tier::Simple | Tier::Standard => true,
        Tier::Complex => entry.quality >= COMPLEX_MIN_QUALITY,
        Tier::Reasoning => entry.supports_reasoning,
    };
    candidates
        .iter()
        .filter(|e| qualifies(e))
        .min_by(|a, b| {
            a.total_price()
                .partial_cmp(&b.total_price())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model_name.cmp(&b.model_name))
        })
        .map(|e| e.model_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::catalog::ModelCatalogEntry;

    fn entry(
        model: &str,
        provider: &str,
        total_price: f64,
        reasoning: bool,
        quality: u8,
    ) -> ModelCatalogEntry {
        ModelCatalogEntry {
            model_name: model.to_string(),
            provider: provider.to_string(),
            input_price: total_price / 2.0,
            output_price: total_price / 2.0,
            context_window: 128_000,
            supports_reasoning: reasoning,
            supports_code: true,
            quality,
            synced_at: 0,
        }
    }

    fn two_provider_catalog() -> ModelCatalog {
        // Provider A: m1, cheapest, no reasoning. Provider B: m2, pricier,
        // reasoning-capable.
        ModelCatalog::new(vec![
            entry("m1", "provider-a", 1e-6, false, 4),
            entry("m2", "provider-b", 5e-6, true, 5),
        ])
    }

    fn active(providers: &[&str]) -> Vec<String> {
        providers.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn cheapest_wins_except_reasoning() {
        let catalog = two_provider_catalog();
        let manager = TierAssignmentManager::new();
        manager
            .recompute(&catalog, &active(&["provider-a", "provider-b"]))
            .unwrap();

        for tier in [Tier::Simple, Tier::Standard, Tier::Complex] {
            assert_eq!(
                manager.effective_model(tier).unwrap().as_deref(),
                Some("m1"),
                "tier {}",
                tier
            );
        }
        assert_eq!(
            manager.effective_model(Tier::Reasoning).unwrap().as_deref(),
            Some("m2")
        );
    }

    #[test]
    fn quality_gate_excludes_weak_models_from_complex() {
        let catalog = ModelCatalog::new(vec![
            entry("cheap-weak", "provider-a", 1e-6, false, 2),
            entry("solid", "provider-a", 4e-6, false, 4),
        ]);
        let manager = TierAssignmentManager::new();
        manager.recompute(&catalog, &active(&["provider-a"])).unwrap();

        assert_eq!(
            manager.effective_model(Tier::Simple).unwrap().as_deref(),
            Some("cheap-weak")
        );
        assert_eq!(
            manager.effective_model(Tier::Complex).unwrap().as_deref(),
            Some("solid")
        );
        // No reasoning-capable model at all: the tier has no route.
        assert!(manager.effective_model(Tier::Reasoning).unwrap().is_none());
    }

    #[test]
    fn override_beats_auto_assignment() {
        let catalog = two_provider_catalog();
        let manager = TierAssignmentManager::new();
        manager
            .recompute(&catalog, &active(&["provider-a", "provider-b"]))
            .unwrap();

        manager.set_override(Tier::Simple, "m2").unwrap();
        assert_eq!(
            manager.effective_model(Tier::Simple).unwrap().as_deref(),
            Some("m2")
        );

        manager.clear_override(Tier::Simple).unwrap();
        assert_eq!(
            manager.effective_model(Tier::Simple).unwrap().as_deref(),
            Some("m1")
        );
    }

    #[test]
    fn empty_override_model_is_rejected_before_mutation() {
        let manager = TierAssignmentManager::new();
        assert!(matches!(
            manager.set_override(Tier::Simple, "   "),
            Err(AssignmentError::EmptyModel)
        ));
        assert!(manager.effective_model(Tier::Simple).unwrap().is_none());
    }

    #[test]
    fn disconnect_reverts_only_affected_overrides() {
        let catalog = two_provider_catalog();
        let manager = TierAssignmentManager::new();
        manager
            .recompute(&catalog, &active(&["provider-a", "provider-b"]))
            .unwrap();
        manager.set_override(Tier::Complex, "m1").unwrap();
        manager.set_override(Tier::Standard, "m2").unwrap();

        // Unrelated disconnect leaves both overrides intact.
        let reversions = manager
            .handle_disconnect(&catalog, "provider-c", &active(&["provider-a", "provider-b"]))
            .unwrap();
        assert!(reversions.is_empty());
        assert_eq!(
            manager.effective_model(Tier::Complex).unwrap().as_deref(),
            Some("m1")
        );

        // Disconnecting provider-a reverts exactly the m1 pin.
        let reversions = manager
            .handle_disconnect(&catalog, "provider-a", &active(&["provider-b"]))
            .unwrap();
        assert_eq!(reversions.len(), 1);
        assert_eq!(reversions[0].tier, Tier::Complex);
        assert_eq!(reversions[0].model, "m1");
        assert!(reversions[0].message.contains("m1"));
        assert!(reversions[0].message.contains("Complex"));
        assert!(reversions[0].message.contains("automatic"));

        // provider-b's pin survives, and complex re-auto-assigns from the
        // remaining active provider.
        assert_eq!(
            manager.effective_model(Tier::Standard).unwrap().as_deref(),
            Some("m2")
        );
        assert_eq!(
            manager.effective_model(Tier::Complex).unwrap().as_deref(),
            Some("m2")
        );
    }

    #[test]
    fn reset_all_clears_every_pin() {
        let catalog = two_provider_catalog();
        let manager = TierAssignmentManager::new();
        manager
            .recompute(&catalog, &active(&["provider-a", "provider-b"]))
            .unwrap();
        manager.set_override(Tier::Simple, "m2").unwrap();
        manager.set_override(Tier::Reasoning, "m1").unwrap();

        manager.reset_all().unwrap();
        assert_eq!(
            manager.effective_model(Tier::Simple).unwrap().as_deref(),
            Some("m1")
        );
        assert_eq!(
            manager.effective_model(Tier::Reasoning).unwrap().as_deref(),
            Some("m2")
        );
    }

    #[test]
    fn no_active_provider_means_no_model() {
        let catalog = two_provider_catalog();
        let manager = TierAssignmentManager::new();
        manager.recompute(&catalog, &active(&[])).unwrap();
        for tier in Tier::iter() {
            assert!(manager.effective_model(tier).unwrap().is_none());
        }
    }
}
