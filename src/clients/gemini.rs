/// Gemini `generateContent` を用いた分類器アダプタ。
///
/// 一時的な障害（5xx・タイムアウト・接続失敗）はFull Jitterで再試行する。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::{Classifier, ClassifierError, MediaFrame};
use crate::util::retry::{RetryConfig, is_transient_transport_error, retry_with_backoff};

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiClassifier {
    client: Client,
    endpoint: Url,
    api_key: String,
    retry: RetryConfig,
}

impl GeminiClassifier {
    /// # Errors
    /// HTTPクライアントの構築、またはエンドポイントURLの組み立てに失敗した場合。
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build classifier HTTP client")?;
        let endpoint = Url::parse(&config.base_url)
            .context("invalid classifier base URL")?
            .join(&format!("v1beta/models/{}:generateContent", config.model))
            .context("failed to build generateContent URL")?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            retry: config.retry,
        })
    }

    async fn generate_once(
        &self,
        request: &GenerateContentRequest<'_>,
    ) -> Result<String, ClassifierError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::from_status(status, &body));
        }

        let payload: GenerateContentResponse = response.json().await.map_err(|error| {
            ClassifierError::Rejected(format!("malformed generateContent body: {error}"))
        })?;

        let text: String = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ClassifierError::Rejected(
                "generateContent returned no text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn invoke(&self, prompt: &str, media: &[MediaFrame]) -> Result<String, ClassifierError> {
        let mut parts = Vec::with_capacity(media.len() + 1);
        parts.push(RequestPart::Text { text: prompt });
        parts.extend(media.iter().map(|frame| RequestPart::Inline {
            inline_data: InlineData {
                mime_type: &frame.mime_type,
                data: STANDARD.encode(&frame.data),
            },
        }));
        let request = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts,
            }],
        };

        debug!(
            prompt_chars = prompt.chars().count(),
            media_count = media.len(),
            "invoking classifier"
        );

        retry_with_backoff(
            &self.retry,
            "classifier.generate_content",
            || self.generate_once(&request),
            ClassifierError::is_retryable,
        )
        .await
    }
}

fn transport_error(error: reqwest::Error) -> ClassifierError {
    if is_transient_transport_error(&error) {
        ClassifierError::Transient(error.to_string())
    } else {
        ClassifierError::Rejected(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const GENERATE_PATH: &str = "/v1beta/models/gemini-test:generateContent";

    fn classifier(base_url: String) -> GeminiClassifier {
        GeminiClassifier::new(GeminiConfig {
            base_url,
            api_key: "test-key".to_string(),
            model: "gemini-test".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryConfig::new(3, 1, 5),
        })
        .expect("client should build")
    }

    fn text_response(text: &str) -> serde_json::Value {
        json!({
            "candidates": [
                { "content": { "parts": [ { "text": text } ] } }
            ]
        })
    }

    #[tokio::test]
    async fn invoke_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "classify this" },
                        { "inline_data": { "mime_type": "image/jpeg", "data": "AQID" } }
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                "```json\n{\"full_path\": \"Gaming\"}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let frames = [MediaFrame::new("image/jpeg", vec![1, 2, 3])];
        let text = classifier(server.uri())
            .invoke("classify this", &frames)
            .await
            .expect("invoke succeeds");
        assert!(text.contains("\"full_path\""));
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let error = classifier(server.uri())
            .invoke("prompt", &[])
            .await
            .expect_err("401 must fail");
        assert!(matches!(error, ClassifierError::Auth(_)));
    }

    #[tokio::test]
    async fn too_many_requests_is_quota_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let error = classifier(server.uri())
            .invoke("prompt", &[])
            .await
            .expect_err("429 must fail");
        assert!(matches!(error, ClassifierError::Quota(_)));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("{}")))
            .mount(&server)
            .await;

        let text = classifier(server.uri())
            .invoke("prompt", &[])
            .await
            .expect("second attempt succeeds");
        assert_eq!(text, "{}");
    }

    #[tokio::test]
    async fn persistent_server_errors_surface_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let error = classifier(server.uri())
            .invoke("prompt", &[])
            .await
            .expect_err("all attempts fail");
        assert!(error.is_retryable());
    }
}
