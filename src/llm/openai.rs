//! OpenAI-compatible completion and embedding client.
//!
//! Works against the hosted API or any server exposing the same
//! `/v1/chat/completions` and `/v1/embeddings` surface.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    fn request(&self, url: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn chat_body(request: &ChatRequest, model_id: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        body
    }
}

/// Extracts the content delta from one SSE line of a streamed completion.
/// Returns `None` for keep-alives, empty deltas, and non-data lines;
/// `Some(None)` marks the terminal `[DONE]` event.
fn delta_from_sse_line(line: &str) -> Option<Option<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "data: [DONE]" {
        return Some(None);
    }

    let data = line.strip_prefix("data: ")?;
    let json: Value = serde_json::from_str(data).ok()?;
    let content = json["choices"][0]["delta"]["content"].as_str()?;

    if content.is_empty() {
        None
    } else {
        Some(Some(content.to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::chat_body(&request, model_id, false);

        let res = self
            .request(&url, &body)
            .send()
            .await
            .map_err(ApiError::generation)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Generation(format!(
                "completion request failed ({}): {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::generation)?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        model_id: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::chat_body(&request, model_id, true);

        let res = self
            .request(&url, &body)
            .send()
            .await
            .map_err(ApiError::generation)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Generation(format!(
                "completion stream failed ({}): {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        let chunk_str = String::from_utf8_lossy(&bytes);
                        for line in chunk_str.lines() {
                            match delta_from_sse_line(line) {
                                Some(Some(content)) => {
                                    if tx.send(Ok(content)).await.is_err() {
                                        return;
                                    }
                                }
                                Some(None) => return,
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::generation(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .request(&url, &body)
            .send()
            .await
            .map_err(ApiError::retrieval)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Retrieval(format!(
                "embedding request failed ({}): {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::retrieval)?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != inputs.len() {
            return Err(ApiError::Retrieval(format!(
                "embedding response returned {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            )));
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_content_deltas_are_extracted() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hola"}}]}"#;
        assert_eq!(delta_from_sse_line(line), Some(Some("Hola".to_string())));
    }

    #[test]
    fn sse_done_marker_terminates() {
        assert_eq!(delta_from_sse_line("data: [DONE]"), Some(None));
    }

    #[test]
    fn sse_noise_is_ignored() {
        assert_eq!(delta_from_sse_line(""), None);
        assert_eq!(delta_from_sse_line(": keep-alive"), None);
        assert_eq!(
            delta_from_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            None
        );
        assert_eq!(
            delta_from_sse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            None
        );
    }

    #[test]
    fn chat_body_carries_sampling_options() {
        let request = ChatRequest::new(vec![]).with_temperature(0.9);
        let body = OpenAiProvider::chat_body(&request, "gpt-3.5-turbo", true);

        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.9);
        assert!(body.get("max_tokens").is_none());
    }
}
