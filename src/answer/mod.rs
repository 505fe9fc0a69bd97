//! Answer Pipeline: turns a question plus retrieved context into answer
//! text, either through a second completion call (streamed or batched) or
//! by passing the engine-synthesized string straight through.

pub mod prompt;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::config::service::{AnswerModeSetting, AnswerSettings, OpenAiSettings};
use crate::core::errors::ApiError;
use crate::index::engine::QueryResult;
use crate::llm::{ChatRequest, LlmProvider};
use prompt::{build_context, build_messages, INSUFFICIENT_CONTEXT};

/// How the pipeline produces answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    /// Completion call over the retrieved context, streamed chunk by chunk.
    Streaming,
    /// Completion call over the retrieved context, one batched response.
    Batched,
    /// No completion call; the retrieval synthesis is the answer.
    RetrievalOnly,
}

impl AnswerMode {
    pub fn from_settings(settings: &AnswerSettings) -> Self {
        match settings.mode {
            AnswerModeSetting::RetrievalOnly => AnswerMode::RetrievalOnly,
            AnswerModeSetting::Synthesis if settings.stream => AnswerMode::Streaming,
            AnswerModeSetting::Synthesis => AnswerMode::Batched,
        }
    }
}

pub struct AnswerPipeline {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    mode: AnswerMode,
}

impl AnswerPipeline {
    pub fn new(provider: Arc<dyn LlmProvider>, openai: &OpenAiSettings, mode: AnswerMode) -> Self {
        Self {
            provider,
            model: openai.model.clone(),
            temperature: openai.temperature,
            mode,
        }
    }

    pub fn mode(&self) -> AnswerMode {
        self.mode
    }

    /// Produces the answer for `question` given the retrieval result.
    ///
    /// `display` receives the full visible buffer after every update, in
    /// arrival order; the final buffer is also returned. In the batched
    /// and retrieval-only modes the buffer updates exactly once.
    pub async fn answer(
        &self,
        question: &str,
        retrieved: &QueryResult,
        display: &mpsc::Sender<String>,
    ) -> Result<String, ApiError> {
        match self.mode {
            AnswerMode::RetrievalOnly => {
                let text = retrieved
                    .synthesized
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .unwrap_or(INSUFFICIENT_CONTEXT)
                    .to_string();

                let _ = display.send(text.clone()).await;
                Ok(text)
            }
            AnswerMode::Batched => {
                let request = self.build_request(question, retrieved);
                let text = self.provider.chat(request, &self.model).await?;

                let _ = display.send(text.clone()).await;
                Ok(text)
            }
            AnswerMode::Streaming => {
                let request = self.build_request(question, retrieved);
                let rx = self.provider.stream_chat(request, &self.model).await?;
                accumulate_stream(rx, display).await
            }
        }
    }

    fn build_request(&self, question: &str, retrieved: &QueryResult) -> ChatRequest {
        let context = build_context(&retrieved.passages);
        ChatRequest::new(build_messages(&context, question)).with_temperature(self.temperature)
    }
}

/// Consumes the delta stream, appending each chunk to the growing buffer
/// and emitting the buffer after every chunk. Chunks are applied strictly
/// in arrival order; an error mid-stream aborts with whatever error the
/// provider reported.
pub async fn accumulate_stream(
    mut rx: mpsc::Receiver<Result<String, ApiError>>,
    display: &mpsc::Sender<String>,
) -> Result<String, ApiError> {
    let mut buffer = String::new();

    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        buffer.push_str(&chunk);
        let _ = display.send(buffer.clone()).await;
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::index::engine::RetrievedPassage;

    struct ScriptedProvider {
        chunks: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            if self.fail {
                return Err(ApiError::Generation("completion unavailable".to_string()));
            }
            assert_eq!(request.messages[0].role, "system");
            Ok(self.chunks.concat())
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
            if self.fail {
                return Err(ApiError::Generation("completion unavailable".to_string()));
            }
            let (tx, rx) = mpsc::channel(8);
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(Ok(chunk.to_string())).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        async fn embed(
            &self,
            _inputs: &[String],
            _model_id: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn pipeline(provider: ScriptedProvider, mode: AnswerMode) -> AnswerPipeline {
        AnswerPipeline::new(
            Arc::new(provider),
            &crate::core::config::service::OpenAiSettings::default(),
            mode,
        )
    }

    fn retrieved_with(synthesized: Option<&str>) -> QueryResult {
        QueryResult {
            passages: vec![RetrievedPassage {
                rank: 1,
                text: "Longwall mining context.".to_string(),
                source: "doc.txt".to_string(),
                score: 0.9,
            }],
            synthesized: synthesized.map(str::to_string),
        }
    }

    async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn streaming_buffer_grows_in_arrival_order() {
        let pipeline = pipeline(
            ScriptedProvider {
                chunks: vec!["Tec", "nical ", "answer."],
                fail: false,
            },
            AnswerMode::Streaming,
        );
        let (tx, rx) = mpsc::channel(8);

        let final_text = pipeline
            .answer("q", &retrieved_with(None), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(final_text, "Tecnical answer.");
        assert_eq!(
            drain(rx).await,
            vec!["Tec", "Tecnical ", "Tecnical answer."]
        );
    }

    #[tokio::test]
    async fn batched_mode_updates_the_display_once() {
        let pipeline = pipeline(
            ScriptedProvider {
                chunks: vec!["Full answer."],
                fail: false,
            },
            AnswerMode::Batched,
        );
        let (tx, rx) = mpsc::channel(8);

        let final_text = pipeline
            .answer("q", &retrieved_with(None), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(final_text, "Full answer.");
        assert_eq!(drain(rx).await, vec!["Full answer."]);
    }

    #[tokio::test]
    async fn retrieval_only_passes_the_synthesis_through() {
        let pipeline = pipeline(
            ScriptedProvider {
                chunks: vec![],
                fail: false,
            },
            AnswerMode::RetrievalOnly,
        );
        let (tx, _rx) = mpsc::channel(8);

        let text = pipeline
            .answer("q", &retrieved_with(Some("[1] (Source: doc.txt)\nExtract.")), &tx)
            .await
            .unwrap();

        assert_eq!(text, "[1] (Source: doc.txt)\nExtract.");
    }

    #[tokio::test]
    async fn blank_synthesis_falls_back_to_the_fixed_message() {
        let pipeline = pipeline(
            ScriptedProvider {
                chunks: vec![],
                fail: false,
            },
            AnswerMode::RetrievalOnly,
        );
        let (tx, _rx) = mpsc::channel(8);

        for synthesized in [None, Some(""), Some("   \n ")] {
            let text = pipeline
                .answer("q", &retrieved_with(synthesized), &tx)
                .await
                .unwrap();
            assert_eq!(text, INSUFFICIENT_CONTEXT);
        }
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_a_generation_error() {
        let pipeline = pipeline(
            ScriptedProvider {
                chunks: vec![],
                fail: true,
            },
            AnswerMode::Streaming,
        );
        let (tx, _rx) = mpsc::channel(8);

        let err = pipeline
            .answer("q", &retrieved_with(None), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Generation(_)));
    }

    #[test]
    fn mode_resolution_follows_settings() {
        use crate::core::config::service::AnswerSettings;

        let streaming = AnswerSettings {
            mode: AnswerModeSetting::Synthesis,
            stream: true,
        };
        let batched = AnswerSettings {
            mode: AnswerModeSetting::Synthesis,
            stream: false,
        };
        let retrieval = AnswerSettings {
            mode: AnswerModeSetting::RetrievalOnly,
            stream: true,
        };

        assert_eq!(AnswerMode::from_settings(&streaming), AnswerMode::Streaming);
        assert_eq!(AnswerMode::from_settings(&batched), AnswerMode::Batched);
        assert_eq!(
            AnswerMode::from_settings(&retrieval),
            AnswerMode::RetrievalOnly
        );
    }
}
