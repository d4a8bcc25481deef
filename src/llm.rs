use crate::auth::AuthGate;
use crate::conversation::Message;
use crate::error::{ChefError, IntoChefError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

// LLM Configuration Constants
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Edge function that forwards chat requests to the model provider
const CHAT_FUNCTION_PATH: &str = "functions/v1/openai-chat";

/// Anything that can turn an ordered message log into one assistant reply
///
/// Replies are non-deterministic; identical input may yield different text.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, messages: &[Message]) -> Result<String, ChefError>;
}

/// Proxy request body: the full log plus an optional provider key
#[derive(Debug, Serialize)]
struct ProxyChatRequest<'a> {
    messages: &'a [Message],
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

/// OpenAI-compatible Chat Completion Request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

/// Validate a base URL and join a relative endpoint path onto it
pub(crate) fn build_endpoint(base_url: &str, path: &str) -> Result<Url, ChefError> {
    let base = Url::parse(base_url)
        .map_chef_err(|e| ChefError::Config(format!("Invalid API Base URL '{}': {}", base_url, e)))?;

    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ChefError::Config(format!(
            "Invalid API Base URL: '{}'. Must start with http:// or https://",
            base_url
        )));
    }

    let normalized = format!("{}/", base.as_str().trim_end_matches('/'));
    Url::parse(&normalized)
        .and_then(|b| b.join(path))
        .map_chef_err(|e| ChefError::Config(format!("Invalid endpoint '{}': {}", path, e)))
}

pub(crate) fn http_client() -> Result<Client, ChefError> {
    Client::builder()
        .build()
        .map_chef_err(|e| ChefError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Pull the `error` field out of a failure body, falling back to `fallback`
pub(crate) fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Extract `choices[0].message.content` from a completion response
pub fn extract_reply(response: &Value) -> Result<String, ChefError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ChefError::MalformedResponse("choices[0].message.content missing".to_string())
        })
}

/// Treat a malformed success response as an empty reply
pub fn reply_or_empty(result: Result<String, ChefError>) -> Result<String, ChefError> {
    match result {
        Err(ChefError::MalformedResponse(detail)) => {
            log::warn!("Chat response had no reply field ({}), using empty reply", detail);
            Ok(String::new())
        }
        other => other,
    }
}

/// Chat client that goes through the authenticated edge-function proxy
pub struct ProxyChatClient {
    client: Client,
    endpoint: Url,
    anon_key: String,
    provider_key: Option<String>,
    auth: AuthGate,
}

impl ProxyChatClient {
    /// # Arguments
    /// * `api_base_url` - Backend base URL hosting the edge functions
    /// * `anon_key` - Public key the proxy expects as bearer token
    /// * `provider_key` - Optional model-provider key forwarded in the body
    pub fn new(
        api_base_url: &str,
        anon_key: String,
        provider_key: Option<String>,
        auth: AuthGate,
    ) -> Result<Self, ChefError> {
        let endpoint = build_endpoint(api_base_url, CHAT_FUNCTION_PATH)?;
        log::info!("Chat proxy endpoint: {}", endpoint);

        Ok(Self {
            client: http_client()?,
            endpoint,
            anon_key,
            provider_key: provider_key.filter(|k| !k.is_empty()),
            auth,
        })
    }
}

#[async_trait]
impl ChatBackend for ProxyChatClient {
    async fn send(&self, messages: &[Message]) -> Result<String, ChefError> {
        let session = self.auth.current()?;
        log::info!(
            "Sending {} messages to chat proxy for user {}",
            messages.len(),
            session.user_id
        );

        let body = ProxyChatRequest {
            messages,
            api_key: self.provider_key.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.anon_key)
            .json(&body)
            .send()
            .await
            .map_chef_err(|e| ChefError::Upstream(format!("Failed to reach chat proxy: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            log::warn!("Chat proxy returned {}: {}", status, text);
            return Err(ChefError::Upstream(error_message(&text, "Chat API failed")));
        }

        let data: Value = response
            .json()
            .await
            .map_chef_err(ChefError::MalformedResponse)?;

        let reply = extract_reply(&data)?;
        log::info!("Chat reply received: {} characters", reply.len());
        Ok(reply)
    }
}

/// Universal client for OpenAI-compatible APIs, bypassing the proxy
///
/// Applies the same model and temperature the proxy would.
pub struct OpenAiChatClient {
    client: Client,
    endpoint: Url,
    model_name: String,
    temperature: f32,
    api_key: Option<String>,
    auth: AuthGate,
}

impl OpenAiChatClient {
    /// # Arguments
    /// * `api_base_url` - Base URL of the API (e.g., "https://api.openai.com/v1")
    /// * `model_name` - Name of the model to use (e.g., "gpt-4o-mini")
    /// * `api_key` - Optional API key (some local servers don't require this)
    pub fn new(
        api_base_url: &str,
        model_name: String,
        api_key: Option<String>,
        auth: AuthGate,
    ) -> Result<Self, ChefError> {
        log::info!("Initializing OpenAI-compatible chat client");
        log::info!("  API Base URL: {}", api_base_url);
        log::info!("  Model: {}", model_name);
        log::info!("  API Key: {}", if api_key.is_some() { "provided" } else { "not provided" });

        Ok(Self {
            client: http_client()?,
            endpoint: build_endpoint(api_base_url, "chat/completions")?,
            model_name,
            temperature: DEFAULT_TEMPERATURE,
            api_key: api_key.filter(|k| !k.is_empty()),
            auth,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn send(&self, messages: &[Message]) -> Result<String, ChefError> {
        let session = self.auth.current()?;
        log::info!(
            "Sending {} messages to {} for user {}",
            messages.len(),
            self.endpoint,
            session.user_id
        );

        let request = ChatCompletionRequest {
            model: &self.model_name,
            messages,
            temperature: self.temperature,
        };
        log::debug!("Request payload: {:?}", request);

        let mut http_request = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await.map_chef_err(|e| {
            ChefError::Upstream(format!("Failed to connect to LLM API at {}: {}", self.endpoint, e))
        })?;

        if !response.status().is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            log::error!("OpenAI API error: {}", error_body);
            return Err(ChefError::Upstream(format!("OpenAI API error: {}", error_body)));
        }

        let data: Value = response
            .json()
            .await
            .map_chef_err(ChefError::MalformedResponse)?;

        extract_reply(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::conversation::{Conversation, Role};
    use serde_json::json;

    #[test]
    fn test_extract_reply() {
        let data = json!({"choices": [{"message": {"role": "assistant", "content": "Привет!"}}]});
        assert_eq!(extract_reply(&data).unwrap(), "Привет!");
    }

    #[test]
    fn test_missing_reply_is_malformed_then_empty() {
        let data = json!({"choices": []});
        let result = extract_reply(&data);
        assert!(matches!(result, Err(ChefError::MalformedResponse(_))));
        assert_eq!(reply_or_empty(result).unwrap(), "");
    }

    #[test]
    fn test_reply_or_empty_keeps_other_errors() {
        let result = reply_or_empty(Err(ChefError::Upstream("boom".to_string())));
        assert!(matches!(result, Err(ChefError::Upstream(_))));
    }

    #[test]
    fn test_error_message_uses_error_field() {
        assert_eq!(
            error_message(r#"{"error":"OPENAI_API_KEY not provided"}"#, "Chat API failed"),
            "OPENAI_API_KEY not provided"
        );
        assert_eq!(error_message("<html>502</html>", "Chat API failed"), "Chat API failed");
    }

    #[test]
    fn test_build_endpoint() {
        let url = build_endpoint("https://project.example.co", CHAT_FUNCTION_PATH).unwrap();
        assert_eq!(url.as_str(), "https://project.example.co/functions/v1/openai-chat");

        let url = build_endpoint("http://localhost:11434/v1/", "chat/completions").unwrap();
        assert_eq!(url.as_str(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_invalid_url() {
        let client = ProxyChatClient::new("ftp://example.com", "anon".to_string(), None, AuthGate::new());
        assert!(matches!(client, Err(ChefError::Config(_))));

        let client = OpenAiChatClient::new("invalid-url", DEFAULT_MODEL.to_string(), None, AuthGate::new());
        assert!(client.is_err());
    }

    #[test]
    fn test_proxy_request_shape() {
        let mut conv = Conversation::new();
        conv.append(Role::User, "Борщ").unwrap();
        let snapshot = conv.snapshot();

        let body = serde_json::to_value(ProxyChatRequest {
            messages: &snapshot,
            api_key: None,
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Борщ");
        assert!(body.get("apiKey").is_none());
    }

    #[tokio::test]
    async fn test_signed_out_client_fails_before_network() {
        // Port 9 (discard) would refuse or hang; the gate must short-circuit first.
        let client = ProxyChatClient::new("http://127.0.0.1:9", "anon".to_string(), None, AuthGate::new()).unwrap();
        let result = client.send(&Conversation::new().snapshot()).await;
        assert!(matches!(result, Err(ChefError::Authentication)));

        let client = OpenAiChatClient::new("http://127.0.0.1:9/v1", DEFAULT_MODEL.to_string(), None, AuthGate::new()).unwrap();
        let result = client.send(&Conversation::new().snapshot()).await;
        assert!(matches!(result, Err(ChefError::Authentication)));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_upstream_error() {
        let auth = AuthGate::signed_in(Session::new("user-1", "token"));
        let client = ProxyChatClient::new("http://127.0.0.1:1", "anon".to_string(), None, auth).unwrap();
        let result = client.send(&Conversation::new().snapshot()).await;
        assert!(matches!(result, Err(ChefError::Upstream(_))));
    }
}
