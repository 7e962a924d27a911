//! Client for an OpenAI-compatible `/v1/chat/completions` endpoint.
//!
//! Only the subset of the wire format needed to ask a vision-language
//! model about a single image is modelled here.

use std::time::Duration;

use frame_caption_common::config::InferenceConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl<'a> {
    pub url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Build a non-streaming single-image chat request.
pub fn build_request<'a>(
    model: &'a str,
    instruction: &'a str,
    image_data_uri: &'a str,
    max_tokens: u32,
) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text { text: instruction },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_data_uri,
                    },
                },
            ],
        }],
        max_tokens,
        stream: false,
    }
}

/// Pull `choices[0].message.content` out of a response body.
pub fn extract_description(body: &str) -> Result<String, InferenceError> {
    let no_valid = |reason: &str| InferenceError::NoValidResponse {
        reason: reason.to_string(),
        body: body.to_string(),
    };

    let response: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| no_valid(&format!("invalid JSON: {e}")))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| no_valid("empty choices"))?;
    let content = choice
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| no_valid("missing message content"))?;

    if content.trim().is_empty() {
        return Err(no_valid("blank message content"));
    }
    Ok(content)
}

// ---------------------------------------------------------------------------
// Describer
// ---------------------------------------------------------------------------

/// Turns one encoded image into a text description.
#[allow(async_fn_in_trait)]
pub trait Describer {
    async fn describe(&self, image_data_uri: &str) -> Result<String, InferenceError>;
}

/// Describer backed by the HTTP inference server.
pub struct HttpDescriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    instruction: String,
    max_tokens: u32,
}

impl HttpDescriber {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        Self::with_timeout(config, Duration::from_secs(config.timeout_secs))
    }

    pub fn with_timeout(
        config: &InferenceConfig,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InferenceError::Client)?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            model: config.model.clone(),
            instruction: config.instruction.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Describer for HttpDescriber {
    async fn describe(&self, image_data_uri: &str) -> Result<String, InferenceError> {
        let request = build_request(
            &self.model,
            &self.instruction,
            image_data_uri,
            self.max_tokens,
        );

        // `.json()` sets `Content-Type: application/json`.
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(InferenceError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(InferenceError::Transport)?;
        debug!(status = %status, bytes = body.len(), "inference response received");

        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        extract_description(&body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("inference request failed: {0}")]
    Transport(reqwest::Error),
    #[error("inference server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no valid response ({reason}): {body}")]
    NoValidResponse { reason: String, body: String },
}

impl InferenceError {
    /// Timeouts, connection errors and non-2xx statuses.
    pub fn is_network(&self) -> bool {
        matches!(self, InferenceError::Transport(_) | InferenceError::Status { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spawn_endpoint;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    fn config(base_url: &str) -> InferenceConfig {
        InferenceConfig {
            base_url: base_url.to_string(),
            ..InferenceConfig::default()
        }
    }

    #[test]
    fn request_matches_wire_format() {
        let request = build_request("smolvlm", "What is this?", "data:image/jpeg;base64,AAAA", 100);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "smolvlm",
                "messages": [{"role": "user", "content": [
                    {"type": "text", "text": "What is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AAAA"}}
                ]}],
                "max_tokens": 100,
                "stream": false
            })
        );
    }

    #[test]
    fn extracts_first_choice() {
        let body = r#"{"id":"x","choices":[
            {"index":0,"message":{"role":"assistant","content":"A cat."}},
            {"message":{"content":"ignored"}}
        ]}"#;
        assert_eq!(extract_description(body).unwrap(), "A cat.");
    }

    #[test]
    fn empty_choices_is_no_valid_response() {
        match extract_description(r#"{"choices": []}"#) {
            Err(InferenceError::NoValidResponse { body, .. }) => {
                assert_eq!(body, r#"{"choices": []}"#)
            }
            other => panic!("expected NoValidResponse, got {other:?}"),
        }
    }

    #[test]
    fn missing_fields_are_no_valid_response() {
        for body in [
            r#"{}"#,
            r#"{"choices":[{}]}"#,
            r#"{"choices":[{"message":{}}]}"#,
            r#"{"choices":[{"message":{"content":null}}]}"#,
            r#"{"choices":[{"message":{"content":"  \n"}}]}"#,
            "not json",
        ] {
            let err = extract_description(body).unwrap_err();
            assert!(!err.is_network(), "{body}");
            assert!(matches!(err, InferenceError::NoValidResponse { .. }), "{body}");
        }
    }

    #[tokio::test]
    async fn posts_json_and_reads_content() {
        let seen: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::default();
        let seen_in_handler = Arc::clone(&seen);
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let seen = Arc::clone(&seen_in_handler);
                async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    *seen.lock().unwrap() = Some((content_type, body));
                    Json(serde_json::json!({"choices": [{"message": {"content": "A desk lamp."}}]}))
                }
            }),
        );
        let base_url = spawn_endpoint(app).await;

        let describer = HttpDescriber::new(&config(&base_url)).unwrap();
        let text = describer.describe("data:image/jpeg;base64,/9j/4A==").await.unwrap();
        assert_eq!(text, "A desk lamp.");

        let (content_type, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(content_type, "application/json");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stream"], false);
        assert_eq!(
            body["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,/9j/4A=="
        );
    }

    #[tokio::test]
    async fn server_error_keeps_body() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let base_url = spawn_endpoint(app).await;

        let err = HttpDescriber::new(&config(&base_url))
            .unwrap()
            .describe("data:image/jpeg;base64,")
            .await
            .unwrap_err();
        assert!(err.is_network());
        match err {
            InferenceError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "too late"
            }),
        );
        let base_url = spawn_endpoint(app).await;

        let describer =
            HttpDescriber::with_timeout(&config(&base_url), Duration::from_millis(200)).unwrap();
        match describer.describe("data:image/jpeg;base64,").await {
            Err(InferenceError::Transport(e)) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = HttpDescriber::new(&config(&format!("http://{addr}")))
            .unwrap()
            .describe("data:image/jpeg;base64,")
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Transport(_)));
        assert!(err.is_network());
    }
}
