use std::sync::Arc;
use std::time::{Duration, Instant};

use cyder_tools::log::debug;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::scorer::ScoreOutcome;
use super::tier::Tier;

/// Tier decisions retained per session, newest first.
const HISTORY_LEN: usize = 5;

struct MomentumEntry {
    tiers: Vec<Tier>,
    touched: Instant,
}

/// Bounded, TTL-expiring per-session history of recent tier decisions.
///
/// The history is advisory input for damping tier oscillation across turns
/// of one conversation; it never overrides the scorer's own classification
/// authority. Sessions are fully isolated by key.
pub struct SessionMomentum {
    sessions: Arc<DashMap<String, MomentumEntry>>,
    ttl: Duration,
    shutdown: CancellationToken,
}

impl SessionMomentum {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        let sessions: Arc<DashMap<String, MomentumEntry>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let sweep_sessions = Arc::clone(&sessions);
        let sweep_token = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        let before = sweep_sessions.len();
                        sweep_sessions.retain(|_, entry| now.duration_since(entry.touched) < ttl);
                        let removed = before.saturating_sub(sweep_sessions.len());
                        if removed > 0 {
                            debug!("Momentum sweep evicted {} expired sessions", removed);
                        }
                    }
                    _ = sweep_token.cancelled() => break,
                }
            }
        });

        Self {
            sessions,
            ttl,
            shutdown,
        }
    }

    /// Prepend `tier` to the session's history, truncate to the most recent
    /// five entries, and refresh the TTL.
    pub fn record_tier(&self, session_key: &str, tier: Tier) {
        let mut entry = self
            .sessions
            .entry(session_key.to_string())
            .or_insert_with(|| MomentumEntry {
                tiers: Vec::with_capacity(HISTORY_LEN),
                touched: Instant::now(),
            });
        entry.tiers.insert(0, tier);
        entry.tiers.truncate(HISTORY_LEN);
        entry.touched = Instant::now();
    }

    /// Recent tiers for a session, newest first. `None` for unknown or
    /// expired sessions, distinguishable from a recorded-but-empty history.
    pub fn recent_tiers(&self, session_key: &str) -> Option<Vec<Tier>> {
        let expired = match self.sessions.get(session_key) {
            Some(entry) => {
                if entry.touched.elapsed() < self.ttl {
                    return Some(entry.tiers.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.sessions.remove(session_key);
        }
        None
    }

    /// Stop the background sweep and drop all session state.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        self.sessions.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Damp a single anomalously low-scored turn inside a conversation that has
/// been running hot: when at least three of the recent tiers are `complex`
/// or above and the fresh score landed at or below `standard`, the decision
/// is lifted one tier. Heartbeat classifications are never adjusted.
pub fn damp(outcome: ScoreOutcome, recent: Option<&[Tier]>) -> ScoreOutcome {
    if outcome.reason == "heartbeat" {
        return outcome;
    }
    let Some(recent) = recent else {
        return outcome;
    };
    let hot = recent.iter().filter(|t| **t >= Tier::Complex).count();
    if hot >= 3 && outcome.tier <= Tier::Standard {
        let lifted = match outcome.tier {
            Tier::Simple => Tier::Standard,
            _ => Tier::Complex,
        };
        return ScoreOutcome {
            tier: lifted,
            score: outcome.score.max(lifted.to_score()),
            confidence: outcome.confidence.min(0.7),
            reason: "momentum".to_string(),
        };
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(tier: Tier, reason: &str) -> ScoreOutcome {
        ScoreOutcome {
            tier,
            score: tier.to_score(),
            confidence: 0.85,
            reason: reason.to_string(),
        }
    }

    #[tokio::test]
    async fn record_and_fetch_newest_first() {
        let momentum = SessionMomentum::new(Duration::from_secs(60), Duration::from_secs(60));
        momentum.record_tier("s1", Tier::Simple);
        momentum.record_tier("s1", Tier::Complex);
        assert_eq!(
            momentum.recent_tiers("s1").unwrap(),
            vec![Tier::Complex, Tier::Simple]
        );
        momentum.dispose();
    }

    #[tokio::test]
    async fn history_truncates_to_five() {
        let momentum = SessionMomentum::new(Duration::from_secs(60), Duration::from_secs(60));
        for _ in 0..8 {
            momentum.record_tier("s1", Tier::Standard);
        }
        momentum.record_tier("s1", Tier::Reasoning);
        let tiers = momentum.recent_tiers("s1").unwrap();
        assert_eq!(tiers.len(), 5);
        assert_eq!(tiers[0], Tier::Reasoning);
        momentum.dispose();
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let momentum = SessionMomentum::new(Duration::from_secs(60), Duration::from_secs(60));
        assert!(momentum.recent_tiers("nope").is_none());
        momentum.dispose();
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let momentum = SessionMomentum::new(Duration::from_secs(60), Duration::from_secs(60));
        momentum.record_tier("a", Tier::Reasoning);
        momentum.record_tier("b", Tier::Simple);
        assert_eq!(momentum.recent_tiers("a").unwrap(), vec![Tier::Reasoning]);
        assert_eq!(momentum.recent_tiers("b").unwrap(), vec![Tier::Simple]);
        momentum.dispose();
    }

    #[tokio::test]
    async fn expired_session_reads_as_none() {
        let momentum =
            SessionMomentum::new(Duration::from_millis(40), Duration::from_secs(3600));
        momentum.record_tier("s1", Tier::Standard);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(momentum.recent_tiers("s1").is_none());
        momentum.dispose();
    }

    #[tokio::test]
    async fn recording_refreshes_the_ttl() {
        let momentum =
            SessionMomentum::new(Duration::from_millis(80), Duration::from_secs(3600));
        momentum.record_tier("s1", Tier::Standard);
        tokio::time::sleep(Duration::from_millis(50)).await;
        momentum.record_tier("s1", Tier::Standard);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // 100ms since the first write, but only 50ms since the refresh.
        assert!(momentum.recent_tiers("s1").is_some());
        momentum.dispose();
    }

    #[tokio::test]
    async fn background_sweep_evicts_expired_entries() {
        let momentum =
            SessionMomentum::new(Duration::from_millis(30), Duration::from_millis(20));
        momentum.record_tier("s1", Tier::Standard);
        momentum.record_tier("s2", Tier::Complex);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(momentum.len(), 0);
        momentum.dispose();
    }

    #[test]
    fn damp_lifts_anomalous_simple_turn() {
        let recent = vec![Tier::Complex, Tier::Complex, Tier::Reasoning, Tier::Complex];
        let damped = damp(outcome(Tier::Simple, "greeting"), Some(&recent));
        assert_eq!(damped.tier, Tier::Standard);
        assert_eq!(damped.reason, "momentum");
    }

    #[test]
    fn damp_leaves_cold_sessions_alone() {
        let recent = vec![Tier::Simple, Tier::Standard, Tier::Simple];
        let damped = damp(outcome(Tier::Simple, "greeting"), Some(&recent));
        assert_eq!(damped.tier, Tier::Simple);
        assert_eq!(damped.reason, "greeting");
    }

    #[test]
    fn damp_never_overrides_heartbeat() {
        let recent = vec![Tier::Reasoning, Tier::Reasoning, Tier::Reasoning];
        let damped = damp(outcome(Tier::Simple, "heartbeat"), Some(&recent));
        assert_eq!(damped.tier, Tier::Simple);
        assert_eq!(damped.reason, "heartbeat");
    }
}
