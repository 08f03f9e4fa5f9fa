use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    parse::{build_analysis_prompt, parse_insights},
    retry::{is_retryable_http_error, new_request_id, next_backoff_ms, should_retry_status},
    AnalysisError, AnalysisOutcome, AnalysisRequest, TextAnalysisClient,
};

#[derive(Debug, Clone)]
/// Configuration for the HTTP analysis provider.
pub struct HttpAnalysisConfig {
    pub api_base: String,
    /// Empty key means the capability is not configured for this deployment;
    /// the client then reports `Unavailable` instead of erroring.
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

impl Default for HttpAnalysisConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.anthropic.com/v1".to_string(),
            api_key: String::new(),
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 1_024,
            request_timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
/// HTTP-backed analysis collaborator client.
pub struct HttpAnalysisClient {
    client: Option<reqwest::Client>,
    config: HttpAnalysisConfig,
}

impl HttpAnalysisClient {
    pub fn new(config: HttpAnalysisConfig) -> Result<Self, AnalysisError> {
        if config.api_key.trim().is_empty() {
            return Ok(Self {
                client: None,
                config,
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(config.api_key.trim())
                .map_err(|e| AnalysisError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self {
            client: Some(client),
            config,
        })
    }

    fn messages_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/messages") {
            return base.to_string();
        }
        format!("{base}/messages")
    }

    async fn complete(&self, client: &reqwest::Client, prompt: &str) -> Result<String, AnalysisError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let url = self.messages_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let request_id = new_request_id();
            let response = client
                .post(&url)
                .header("x-sift-request-id", request_id)
                .header("x-sift-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    let raw = response.text().await?;
                    if status.is_success() {
                        return extract_completion_text(&raw);
                    }
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        sleep(std::time::Duration::from_millis(next_backoff_ms(attempt))).await;
                        continue;
                    }
                    return Err(AnalysisError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        sleep(std::time::Duration::from_millis(next_backoff_ms(attempt))).await;
                        continue;
                    }
                    return Err(AnalysisError::Http(error));
                }
            }
        }

        Err(AnalysisError::InvalidResponse(
            "retry loop exhausted without a response".to_string(),
        ))
    }
}

/// Pulls the completion text out of a messages-style response body.
fn extract_completion_text(raw: &str) -> Result<String, AnalysisError> {
    let parsed: Value = serde_json::from_str(raw)?;
    let blocks = parsed
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::InvalidResponse("missing content array".to_string()))?;
    let text = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        return Err(AnalysisError::InvalidResponse(
            "content carried no text blocks".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl TextAnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, AnalysisError> {
        let Some(client) = self.client.as_ref() else {
            return Ok(AnalysisOutcome::Unavailable);
        };

        let prompt = build_analysis_prompt(request);
        let text = self.complete(client, &prompt).await?;
        let insights = parse_insights(&text);
        if insights.is_empty() {
            return Ok(AnalysisOutcome::NoneFound);
        }
        Ok(AnalysisOutcome::Found(insights))
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_completion_text, HttpAnalysisClient, HttpAnalysisConfig};
    use crate::{AnalysisOutcome, AnalysisRequest, TextAnalysisClient};

    #[tokio::test]
    async fn missing_api_key_reports_capability_unavailable() {
        let client = HttpAnalysisClient::new(HttpAnalysisConfig::default()).expect("client");
        let outcome = client
            .analyze(&AnalysisRequest {
                company_id: "co-1".to_string(),
                successful_samples: vec!["sample".to_string()],
                failure_samples: vec![],
                successful_total: 1,
                failure_total: 0,
            })
            .await
            .expect("analyze");
        assert_eq!(outcome, AnalysisOutcome::Unavailable);
    }

    #[test]
    fn completion_text_is_joined_from_content_blocks() {
        let raw = r#"{"content":[{"type":"text","text":"first"},{"type":"text","text":"second"}]}"#;
        assert_eq!(extract_completion_text(raw).expect("text"), "first\nsecond");
    }

    #[test]
    fn completion_without_text_blocks_is_invalid() {
        let raw = r#"{"content":[]}"#;
        assert!(extract_completion_text(raw).is_err());
    }
}
