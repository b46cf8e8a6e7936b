use axum::http::HeaderMap;
use cyder_tools::log::debug;
use reqwest::header::{ACCEPT_ENCODING, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use serde_json::{Value, json};

use crate::service::catalog::ModelCatalogEntry;
use crate::utils::{CALLER_HEADER, SESSION_HEADER, TENANT_HEADER};

use super::endpoints::{AuthScheme, ProviderEndpoint};
use super::error::RouteError;

/// Caller-supplied body fields that look like destinations. The forwarding
/// target is derived exclusively from server-side state, so these are
/// dropped before the body goes upstream.
const DESTINATION_FIELDS: [&str; 6] = [
    "base_url",
    "api_base",
    "api_url",
    "endpoint",
    "provider",
    "proxy_url",
];

/// Everything needed for the upstream call.
pub struct PreparedRequest {
    pub url: String,
    pub headers: reqwest::header::HeaderMap,
    pub body: String,
}

// Copies client headers for the upstream request, dropping hop-by-hop
// headers, every credential position, and the gateway's own identity
// headers, then attaches the provider credential in its expected scheme.
fn build_upstream_headers(
    pre_headers: &HeaderMap,
    credential: Option<&str>,
    scheme: AuthScheme,
) -> Result<reqwest::header::HeaderMap, RouteError> {
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in pre_headers.iter() {
        if name != HOST // do not expose host to api endpoint
            && name != CONTENT_LENGTH // body is rewritten below
            && name != ACCEPT_ENCODING // some clients send br, which we could not decode
            && name != AUTHORIZATION // caller credentials never travel upstream
            && name != "x-api-key"
            && name != "x-goog-api-key"
            && name != "cookie"
            && name != CALLER_HEADER
            && name != TENANT_HEADER
            && name != SESSION_HEADER
        {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());

    if let Some(key) = credential {
        let (name, value) = match scheme {
            AuthScheme::Bearer => (AUTHORIZATION.as_str(), format!("Bearer {}", key)),
            AuthScheme::XApiKey => ("x-api-key", key.to_string()),
            AuthScheme::GoogApiKey => ("x-goog-api-key", key.to_string()),
        };
        let value = reqwest::header::HeaderValue::try_from(value)
            .map_err(|_| RouteError::Internal("provider credential is not header-safe".to_string()))?;
        headers.insert(
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RouteError::Internal("invalid auth header name".to_string()))?,
            value,
        );
    }
    Ok(headers)
}

/// Build the full upstream request from server-side state only: the URL
/// comes from the endpoint registry, the model from the resolved catalog
/// entry, and the credential from the vault. Destination-like fields in the
/// caller's body are discarded.
pub fn prepare_upstream_request(
    endpoint: &ProviderEndpoint,
    entry: &ModelCatalogEntry,
    credential: Option<&str>,
    mut data: Value,
    original_headers: &HeaderMap,
) -> Result<PreparedRequest, RouteError> {
    if let Some(obj) = data.as_object_mut() {
        for field in DESTINATION_FIELDS {
            if obj.remove(field).is_some() {
                debug!("Dropped caller-supplied destination field '{}'", field);
            }
        }
        // The resolved model, verbatim from the catalog.
        obj.insert("model".to_string(), json!(entry.model_name));
    }

    let url = format!("{}{}", endpoint.base_url, endpoint.build_path(&entry.model_name));
    let headers = build_upstream_headers(original_headers, credential, endpoint.auth_scheme)?;
    let body = serde_json::to_string(&data).map_err(|e| {
        RouteError::Internal(format!("failed to serialize upstream request body: {}", e))
    })?;

    Ok(PreparedRequest { url, headers, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::endpoints::PROVIDER_ENDPOINTS;
    use axum::http::HeaderValue;

    fn entry(model: &str, provider: &str) -> ModelCatalogEntry {
        ModelCatalogEntry {
            model_name: model.to_string(),
            provider: provider.to_string(),
            input_price: 1e-6,
            output_price: 1e-6,
            context_window: 128_000,
            supports_reasoning: false,
            supports_code: true,
            quality: 3,
            synced_at: 0,
        }
    }

    #[test]
    fn caller_destination_fields_are_dropped_and_model_overwritten() {
        let endpoint = PROVIDER_ENDPOINTS.get("openai").unwrap();
        let data = serde_json::json!({
            "model": "attacker-model",
            "base_url": "https://evil.example.com",
            "endpoint": "http://169.254.169.254/metadata",
            "api_base": "https://also-evil.example",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let prepared = prepare_upstream_request(
            endpoint,
            &entry("gpt-4o-mini", "openai"),
            Some("sk-live-key"),
            data,
            &HeaderMap::new(),
        )
        .unwrap();

        assert_eq!(prepared.url, "https://api.openai.com/v1/chat/completions");
        let body: Value = serde_json::from_str(&prepared.body).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert!(body.get("base_url").is_none());
        assert!(body.get("endpoint").is_none());
        assert!(body.get("api_base").is_none());
        assert!(!prepared.body.contains("evil.example"));
    }

    #[test]
    fn caller_credentials_and_identity_headers_never_travel_upstream() {
        let endpoint = PROVIDER_ENDPOINTS.get("openai").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer caller-token"));
        headers.insert("x-api-key", HeaderValue::from_static("caller-key"));
        headers.insert("cookie", HeaderValue::from_static("session=abc"));
        headers.insert("x-caller-id", HeaderValue::from_static("caller-1"));
        headers.insert("x-tenant-id", HeaderValue::from_static("tenant-1"));
        headers.insert("user-agent", HeaderValue::from_static("test-client"));

        let prepared = prepare_upstream_request(
            endpoint,
            &entry("gpt-4o-mini", "openai"),
            Some("sk-provider-key"),
            serde_json::json!({"messages": []}),
            &headers,
        )
        .unwrap();

        assert_eq!(
            prepared.headers.get("authorization").unwrap().to_str().unwrap(),
            "Bearer sk-provider-key"
        );
        assert!(prepared.headers.get("x-api-key").is_none());
        assert!(prepared.headers.get("cookie").is_none());
        assert!(prepared.headers.get("x-caller-id").is_none());
        assert!(prepared.headers.get("x-tenant-id").is_none());
        assert_eq!(
            prepared.headers.get("user-agent").unwrap().to_str().unwrap(),
            "test-client"
        );
    }

    #[test]
    fn provider_scheme_controls_credential_placement() {
        let google = PROVIDER_ENDPOINTS.get("google").unwrap();
        let prepared = prepare_upstream_request(
            google,
            &entry("gemini-2.0-flash", "google"),
            Some("g-key"),
            serde_json::json!({"messages": []}),
            &HeaderMap::new(),
        )
        .unwrap();
        assert_eq!(
            prepared.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            prepared.headers.get("x-goog-api-key").unwrap().to_str().unwrap(),
            "g-key"
        );
        assert!(prepared.headers.get("authorization").is_none());

        let anthropic = PROVIDER_ENDPOINTS.get("anthropic").unwrap();
        let prepared = prepare_upstream_request(
            anthropic,
            &entry("claude-3-5-haiku", "anthropic"),
            Some("a-key"),
            serde_json::json!({"messages": []}),
            &HeaderMap::new(),
        )
        .unwrap();
        assert_eq!(
            prepared.headers.get("x-api-key").unwrap().to_str().unwrap(),
            "a-key"
        );
    }

    #[test]
    fn missing_credential_sends_no_auth_header() {
        let endpoint = PROVIDER_ENDPOINTS.get("ollama").unwrap();
        let prepared = prepare_upstream_request(
            endpoint,
            &entry("llama3.1:8b", "ollama"),
            None,
            serde_json::json!({"messages": []}),
            &HeaderMap::new(),
        )
        .unwrap();
        assert!(prepared.headers.get("authorization").is_none());
    }
}
