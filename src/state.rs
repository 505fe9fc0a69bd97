use std::sync::Arc;

use crate::answer::{AnswerMode, AnswerPipeline};
use crate::core::config::{AnswerModeSetting, AppPaths, ConfigService, Settings};
use crate::core::errors::ApiError;
use crate::index::{IndexAccessor, ResponseMode};
use crate::llm::{LlmProvider, OpenAiProvider};

/// Application state shared across routes and WebSocket sessions.
///
/// Per-session data (question history, active question) does not live
/// here; it belongs to each socket's `SessionContext`.
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Settings,
    pub index: Arc<IndexAccessor>,
    pub pipeline: AnswerPipeline,
}

impl AppState {
    /// Loads configuration, wires the provider, and prepares the (still
    /// unbuilt) index accessor. The expensive build-or-load runs on the
    /// first `index.engine()` call.
    pub fn initialize() -> Result<Arc<Self>, ApiError> {
        let bootstrap = Arc::new(AppPaths::new());
        let config = ConfigService::new(bootstrap.clone());
        let settings = config.load_settings()?;

        let paths = Arc::new(AppPaths::with_dirs(
            &settings.retrieval.docs_dir,
            &settings.retrieval.index_dir,
        ));

        if settings.openai.api_key.is_none() {
            tracing::warn!(
                "No API key configured (OPENAI_API_KEY or secrets.yaml); completion and embedding calls will fail"
            );
        }

        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
            settings.openai.api_base.clone(),
            settings.openai.api_key.clone(),
        ));

        let response_mode = match settings.answer.mode {
            AnswerModeSetting::RetrievalOnly => ResponseMode::Compact,
            AnswerModeSetting::Synthesis => ResponseMode::Passages,
        };

        let index = Arc::new(IndexAccessor::new(
            paths.docs_dir.clone(),
            paths.index_dir.clone(),
            settings.retrieval.clone(),
            settings.openai.embedding_model.clone(),
            response_mode,
            provider.clone(),
        ));

        let pipeline = AnswerPipeline::new(
            provider.clone(),
            &settings.openai,
            AnswerMode::from_settings(&settings.answer),
        );

        Ok(Arc::new(AppState {
            paths,
            settings,
            index,
            pipeline,
        }))
    }
}
