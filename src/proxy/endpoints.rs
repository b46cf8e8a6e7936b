use std::collections::HashMap;

use once_cell::sync::Lazy;

/// How a provider expects its credential to be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>`
    XApiKey,
    /// `X-Goog-Api-Key: <key>`
    GoogApiKey,
}

/// Static description of one known upstream.
pub struct ProviderEndpoint {
    pub base_url: &'static str,
    pub auth_scheme: AuthScheme,
    path: fn(&str) -> String,
}

impl ProviderEndpoint {
    /// Request path for `model`. The model string comes verbatim from the
    /// resolved catalog entry, never from unauthenticated caller input.
    pub fn build_path(&self, model: &str) -> String {
        (self.path)(model)
    }
}

/// The registry is static configuration: loaded once, immutable at runtime.
/// Every base URL is HTTPS except the local ollama daemon, which is the one
/// documented loopback exception.
pub static PROVIDER_ENDPOINTS: Lazy<HashMap<&'static str, ProviderEndpoint>> = Lazy::new(|| {
    let mut endpoints = HashMap::new();
    endpoints.insert(
        "openai",
        ProviderEndpoint {
            base_url: "https://api.openai.com",
            auth_scheme: AuthScheme::Bearer,
            path: |_| "/v1/chat/completions".to_string(),
        },
    );
    endpoints.insert(
        "anthropic",
        ProviderEndpoint {
            base_url: "https://api.anthropic.com",
            auth_scheme: AuthScheme::XApiKey,
            path: |_| "/v1/chat/completions".to_string(),
        },
    );
    endpoints.insert(
        "google",
        ProviderEndpoint {
            base_url: "https://generativelanguage.googleapis.com",
            auth_scheme: AuthScheme::GoogApiKey,
            path: |model| format!("/v1beta/models/{}:generateContent", model),
        },
    );
    endpoints.insert(
        "mistral",
        ProviderEndpoint {
            base_url: "https://api.mistral.ai",
            auth_scheme: AuthScheme::Bearer,
            path: |_| "/v1/chat/completions".to_string(),
        },
    );
    endpoints.insert(
        "groq",
        ProviderEndpoint {
            base_url: "https://api.groq.com",
            auth_scheme: AuthScheme::Bearer,
            path: |_| "/openai/v1/chat/completions".to_string(),
        },
    );
    endpoints.insert(
        "ollama",
        ProviderEndpoint {
            // Loopback daemon; plain HTTP is permitted for this provider only.
            base_url: "http://127.0.0.1:11434",
            auth_scheme: AuthScheme::Bearer,
            path: |_| "/v1/chat/completions".to_string(),
        },
    );
    endpoints
});

static PROVIDER_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("gemini", "google"),
        ("google-ai", "google"),
        ("claude", "anthropic"),
        ("local", "ollama"),
    ])
});

/// Canonicalize a provider name to a registry key.
///
/// Anything that is not a plain known name is rejected: URLs, paths, and
/// traversal strings all come back as `None` so a caller-supplied
/// destination can never select an endpoint.
pub fn resolve_endpoint_key(name: &str) -> Option<&'static str> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty()
        || normalized
            .chars()
            .any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'))
    {
        return None;
    }
    let canonical = PROVIDER_ALIASES
        .get(normalized.as_str())
        .copied()
        .unwrap_or(normalized.as_str());
    PROVIDER_ENDPOINTS.get_key_value(canonical).map(|(k, _)| *k)
}
