//! Complexity scorer for tier routing.
//!
//! Pure function over the conversation: no I/O, no mutation, deterministic
//! for identical input. Weighs the most recent scorable messages across
//! several keyword dimensions and maps the total onto a [`Tier`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tier::Tier;

/// Sentinel used by the platform's liveness self-check. Any request whose
/// latest user message carries it is routed as `simple` without scoring.
pub const HEARTBEAT_SENTINEL: &str = "HEARTBEAT_OK";

/// Number of most-recent scorable messages considered.
const SCORE_WINDOW: usize = 10;

/// One conversation message as received from the validated request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

/// Outcome of a classification run.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutcome {
    pub tier: Tier,
    /// Weighted complexity score, 0-100.
    pub score: u32,
    /// Classifier confidence, 0.0-1.0.
    pub confidence: f32,
    /// Short machine-readable reason for the decision.
    pub reason: String,
}

static RE_GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(hi|hiya|hello|hey|yo|thanks|thank you|ok|okay|sure|yes|no|yep|nope|cool|nice|great|got it|good (morning|afternoon|evening))[\s!.,?]*(there|everyone|all)?[\s!.,?]*$").unwrap()
});

static RE_SEQUENTIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(first|then|next|after that|afterwards|before that|finally|lastly|step \d+|followed by)\b")
        .unwrap()
});

static RE_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(```|\bfunction\b|\bclass\b|\bimplement\b|\brefactor\b|\bdebug\b|\bcompile\b|\bunit test\b|\bstack trace\b|\barchitecture\b|\bmicroservices?\b|\bapi design\b|\bschema\b|\bendpoint\b|=>|::|\.rs\b|\.ts\b|\.py\b|\.go\b)")
        .unwrap()
});

static RE_REASONING_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(why|how|explain|analyz(e|ing)|analys(e|ing)|compare|contrast|evaluate|assess|trade-?offs?|implications?|consequences?|versus|vs\.?)\b")
        .unwrap()
});

static RE_PROOF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(prove|proof|theorem|lemma|corollary|axiom|induction|inductive|derivation|derive (the|a|an)|deduce|rigorous(ly)?|formal(ly)? (prove|show|verify|derive)|q\.?e\.?d\.?|by contradiction)\b")
        .unwrap()
});

static RE_JARGON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(kubernetes|k8s|terraform|postgres(ql)?|mysql|mongodb|redis|kafka|graphql|grpc|protobuf|websocket|oauth|jwt|tls|dns|cdn|nginx|linux|docker|ci/cd|devops|idempotent|sharding|replication|consensus|raft|paxos|backpressure|mutex|semaphore|deadlock|amortized|asymptotic|eigenvalue|gradient|regression|transformer|tokenizer)\b")
        .unwrap()
});

fn count_matches(re: &Regex, text: &str) -> usize {
    re.find_iter(text).count()
}

// Flattens message content to plain text. String content is taken verbatim;
// structured content contributes only its "text"-typed parts.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                if part.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(text);
                    }
                }
            }
            out
        }
        _ => String::new(),
    }
}

// System and developer turns steer the model, not the user's ask; their
// content must not inflate the complexity of a trivial user message.
fn is_scorable(message: &ChatMessage) -> bool {
    !matches!(message.role.as_str(), "system" | "developer")
}

fn latest_user_text(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| content_text(&m.content))
}

fn distinct_word_count(text: &str) -> usize {
    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    words.sort();
    words.dedup();
    words.len()
}

// Confidence for weighted outcomes grows with the distance from the nearest
// tier boundary, capped below the short-circuit paths.
fn banded_confidence(score: u32) -> f32 {
    let boundaries = [16i64, 46, 71];
    let distance = boundaries
        .iter()
        .map(|b| (score as i64 - b).abs())
        .min()
        .unwrap_or(0) as f32;
    (0.55 + distance / 60.0).min(0.85)
}

/// Classify a conversation.
///
/// `tools` are the declared tool definitions from the request body and
/// `tool_choice` is the raw `tool_choice` field; both are optional and only
/// their presence matters here.
pub fn score(messages: &[ChatMessage], tools: &[Value], tool_choice: Option<&Value>) -> ScoreOutcome {
    // Heartbeat short-circuit: a platform self-check, not user content. It
    // overrides every other heuristic, including the tool floor.
    if let Some(latest) = latest_user_text(messages) {
        if latest.contains(HEARTBEAT_SENTINEL) {
            return ScoreOutcome {
                tier: Tier::Simple,
                score: 0,
                confidence: 1.0,
                reason: "heartbeat".to_string(),
            };
        }
    }

    let scorable: Vec<&ChatMessage> = {
        let mut kept: Vec<&ChatMessage> = messages.iter().filter(|m| is_scorable(m)).collect();
        if kept.len() > SCORE_WINDOW {
            kept = kept.split_off(kept.len() - SCORE_WINDOW);
        }
        kept
    };

    let tool_floor = tool_choice
        .map(|c| !c.is_null() && c.as_str() != Some("none"))
        .unwrap_or(false)
        && !tools.is_empty();

    if scorable.is_empty() {
        let tier = if tool_floor { Tier::Standard } else { Tier::Simple };
        return ScoreOutcome {
            tier,
            score: tier.to_score(),
            confidence: 0.5,
            reason: "no scorable content".to_string(),
        };
    }

    let text = scorable
        .iter()
        .map(|m| content_text(&m.content))
        .collect::<Vec<_>>()
        .join("\n");

    // Formal proof / derivation language wins outright when unambiguous.
    let proof_hits = count_matches(&RE_PROOF, &text);
    if proof_hits >= 2 || (proof_hits >= 1 && count_matches(&RE_REASONING_WORDS, &text) >= 1) {
        return ScoreOutcome {
            tier: Tier::Reasoning,
            score: Tier::Reasoning.to_score(),
            confidence: 0.95,
            reason: "formal reasoning language".to_string(),
        };
    }

    // Greeting-like single turns resolve cheap and confident.
    if scorable.len() == 1 && !tool_floor {
        let trimmed = text.trim();
        if RE_GREETING.is_match(trimmed)
            || (trimmed.len() <= 40 && distinct_word_count(trimmed) <= 4 && proof_hits == 0)
        {
            return ScoreOutcome {
                tier: Tier::Simple,
                score: 4,
                confidence: 0.9,
                reason: "greeting".to_string(),
            };
        }
    }

    // Weighted dimensions, each normalized to 0-100.
    let length_score = ((text.len().saturating_sub(40)) / 12).min(100) as u32;
    let sequential = count_matches(&RE_SEQUENTIAL, &text);
    let sequential_score = (sequential * 30).min(100) as u32;
    let code_hits = count_matches(&RE_CODE, &text);
    let code_score = (code_hits * 40).min(100) as u32;
    let reasoning_hits = count_matches(&RE_REASONING_WORDS, &text);
    let reasoning_score = (reasoning_hits * 30).min(100) as u32;
    let jargon_hits = count_matches(&RE_JARGON, &text);
    let jargon_score = (jargon_hits * 35).min(100) as u32;
    let proof_score = (proof_hits * 50).min(100) as u32;

    let weighted = length_score as f32 * 0.15
        + sequential_score as f32 * 0.20
        + code_score as f32 * 0.22
        + reasoning_score as f32 * 0.15
        + jargon_score as f32 * 0.18
        + proof_score as f32 * 0.10;

    let mut total = weighted as u32;
    let mut reason = "weighted score".to_string();

    // Multi-step imperative language or an explicit code/architecture ask is
    // complex work even when the weighted total lands lower.
    if sequential >= 3 || code_hits >= 2 {
        if total < Tier::Complex.to_score() {
            total = Tier::Complex.to_score();
            reason = if sequential >= 3 {
                "multi-step request".to_string()
            } else {
                "code request".to_string()
            };
        }
    }

    let mut tier = Tier::from_score(total.min(100));
    let mut confidence = banded_confidence(total.min(100));

    if tool_floor && tier < Tier::Standard {
        tier = Tier::Standard;
        total = total.max(Tier::Standard.to_score());
        confidence = confidence.max(0.7);
        reason = "tool invocation requested".to_string();
    }

    ScoreOutcome {
        tier,
        score: total.min(100),
        confidence,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: Value::String(text.to_string()),
        }
    }

    fn system(text: &str) -> ChatMessage {
        ChatMessage {
            role: "system".to_string(),
            content: Value::String(text.to_string()),
        }
    }

    #[test]
    fn greeting_is_simple_and_confident() {
        for text in ["hi", "Hello!", "hey there", "thanks", "good morning"] {
            let outcome = score(&[user(text)], &[], None);
            assert_eq!(outcome.tier, Tier::Simple, "input: {}", text);
            assert!(outcome.confidence > 0.8, "input: {}", text);
        }
    }

    #[test]
    fn heartbeat_sentinel_short_circuits() {
        let outcome = score(
            &[user("please HEARTBEAT_OK prove this theorem by induction")],
            &[],
            None,
        );
        assert_eq!(outcome.tier, Tier::Simple);
        assert_eq!(outcome.reason, "heartbeat");
    }

    #[test]
    fn heartbeat_in_structured_content_part() {
        let message = ChatMessage {
            role: "user".to_string(),
            content: json!([
                {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}},
                {"type": "text", "text": "status HEARTBEAT_OK"}
            ]),
        };
        let outcome = score(&[message], &[], None);
        assert_eq!(outcome.tier, Tier::Simple);
        assert_eq!(outcome.reason, "heartbeat");
    }

    #[test]
    fn heartbeat_only_in_older_message_does_not_trigger() {
        let outcome = score(
            &[user("HEARTBEAT_OK"), user("explain why raft needs quorum and compare it with paxos")],
            &[],
            None,
        );
        assert_ne!(outcome.reason, "heartbeat");
    }

    #[test]
    fn tool_choice_raises_floor_above_simple() {
        let tools = vec![json!({"type": "function", "function": {"name": "get_weather"}})];
        let outcome = score(&[user("hi")], &tools, Some(&json!("auto")));
        assert_ne!(outcome.tier, Tier::Simple);
    }

    #[test]
    fn declared_tools_without_tool_choice_do_not_raise_floor() {
        let tools = vec![json!({"type": "function", "function": {"name": "get_weather"}})];
        let outcome = score(&[user("hi")], &tools, None);
        assert_eq!(outcome.tier, Tier::Simple);
    }

    #[test]
    fn system_prompt_does_not_inflate_simple_turn() {
        let outcome = score(
            &[
                system(
                    "You are a kubernetes and terraform expert. Analyze consensus algorithms, \
                     raft, paxos, replication, sharding, grpc, protobuf, and deadlock scenarios.",
                ),
                user("hi there"),
            ],
            &[],
            None,
        );
        assert_eq!(outcome.tier, Tier::Simple);
        assert!(outcome.confidence > 0.8);
    }

    #[test]
    fn multi_step_imperatives_score_complex() {
        let outcome = score(
            &[user(
                "First inspect the deployment manifest, then roll the pods, after that verify \
                 the health checks, and finally report which replicas restarted.",
            )],
            &[],
            None,
        );
        assert_eq!(outcome.tier, Tier::Complex);
    }

    #[test]
    fn code_architecture_request_scores_complex() {
        let outcome = score(
            &[user(
                "Refactor this class into smaller modules and sketch the api design for the \
                 new endpoint schema.",
            )],
            &[],
            None,
        );
        assert_eq!(outcome.tier, Tier::Complex);
    }

    #[test]
    fn proof_language_scores_reasoning_with_high_confidence() {
        let outcome = score(
            &[user(
                "Prove by induction that the sum of the first n odd numbers is n squared, \
                 and explain each inductive step.",
            )],
            &[],
            None,
        );
        assert_eq!(outcome.tier, Tier::Reasoning);
        assert!(outcome.confidence > 0.9);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let messages = vec![user("compare postgres and mysql replication")];
        let a = score(&messages, &[], None);
        let b = score(&messages, &[], None);
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.score, b.score);
        assert_eq!(a.reason, b.reason);
    }

    #[test]
    fn only_recent_window_is_considered() {
        let mut messages: Vec<ChatMessage> = (0..30)
            .map(|_| user("prove the theorem by induction rigorously"))
            .collect();
        messages.extend((0..SCORE_WINDOW).map(|_| user("what's the capital of France?")));
        let outcome = score(&messages, &[], None);
        assert_ne!(outcome.tier, Tier::Reasoning);
    }
}
