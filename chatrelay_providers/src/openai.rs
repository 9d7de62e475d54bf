use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::{
    ChatMessage, CompletionParams, CompletionProvider, ImageGenerator, LLMResponse, Usage,
};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::retry::retry_with_backoff;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible HTTP API: chat completions, model listing and image generation.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    retry_delays: Vec<Duration>,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        info!("Creating OpenAiProvider");
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            retry_delays: vec![Duration::from_secs(1), Duration::from_secs(2)],
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Delays between attempts of idempotent requests (model listing).
    #[must_use]
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> anyhow::Result<Value> {
        Ok(self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?)
    }

    async fn fetch_models(&self) -> anyhow::Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let models = response["data"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing model list"))?
            .iter()
            .filter_map(|m| m["id"].as_str().map(ToString::to_string))
            .collect();
        Ok(models)
    }
}

/// Completion request body: the conversation plus every parameter, flattened.
fn completion_request(messages: &[ChatMessage], params: &CompletionParams) -> anyhow::Result<Value> {
    let mut request = serde_json::to_value(params)?;
    if let Value::Object(map) = &mut request {
        map.insert("messages".to_string(), serde_json::to_value(messages)?);
    }
    Ok(request)
}

fn parse_usage(response: &Value) -> Option<Usage> {
    let usage = response["usage"].as_object()?;
    let field = |name: &str| {
        usage
            .get(name)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };
    Some(Usage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    })
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> anyhow::Result<LLMResponse> {
        let request = completion_request(messages, params)?;
        info!(
            "Sending request to completion API: model={}, messages={}",
            params.model,
            messages.len()
        );

        let response = self.post_json("chat/completions", &request).await?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing content"))?
            .trim()
            .to_string();

        debug!("Received completion of {} chars", content.len());
        Ok(LLMResponse {
            content,
            usage: parse_usage(&response),
        })
    }

    async fn available_models(&self) -> anyhow::Result<Vec<String>> {
        retry_with_backoff(|| self.fetch_models(), &self.retry_delays).await
    }
}

#[async_trait]
impl ImageGenerator for OpenAiProvider {
    async fn generate_image(&self, prompt: &str) -> anyhow::Result<String> {
        info!("Requesting image generation");
        let response = self
            .post_json(
                "images/generations",
                &json!({
                    "prompt": prompt,
                    "n": 1,
                    "size": "1024x1024",
                }),
            )
            .await?;

        response["data"][0]["url"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing image url"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new("sk-test".to_string())
            .with_base_url(server.uri())
            .with_retry_delays(vec![Duration::from_millis(5)])
    }

    #[test]
    fn request_flattens_parameters() {
        let mut params = CompletionParams::default();
        params.set("stop", json!("\n")).unwrap();
        let request = completion_request(&[ChatMessage::user("hi")], &params).unwrap();
        assert_eq!(request["model"], "gpt-3.5-turbo");
        assert_eq!(request["max_tokens"], 1000);
        assert_eq!(request["stop"], "\n");
        assert_eq!(request["messages"], json!([{"role": "user", "content": "hi"}]));
    }

    #[tokio::test]
    async fn completes_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-3.5-turbo", "temperature": 1.2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  Hello there!\n"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server)
            .complete(&[ChatMessage::user("hi")], &CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(response.content, "Hello there!");
        assert_eq!(response.usage.unwrap().total_tokens, 13);
    }

    #[tokio::test]
    async fn completion_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(&server)
            .complete(&[ChatMessage::user("hi")], &CompletionParams::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lists_models_with_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "gpt-4"}, {"id": "gpt-3.5-turbo"}]
            })))
            .mount(&server)
            .await;

        let models = provider(&server).available_models().await.unwrap();
        assert_eq!(models, vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()]);
    }

    #[tokio::test]
    async fn generates_image_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(body_partial_json(json!({"prompt": "a fox", "n": 1, "size": "1024x1024"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"url": "https://images.test/fox.png"}]
            })))
            .mount(&server)
            .await;

        let url = provider(&server).generate_image("a fox").await.unwrap();
        assert_eq!(url, "https://images.test/fox.png");
    }

    #[tokio::test]
    async fn missing_image_url_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        assert!(provider(&server).generate_image("a fox").await.is_err());
    }
}
