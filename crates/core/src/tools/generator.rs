//! # Radkit Generator
//!
//! `Generator` backed by a radkit `LlmFunction`. Model and system prompt
//! are chosen by the request's purpose.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{render_passages, GenerationPurpose, GenerationRequest, Generator, ToolError};
use crate::config::{ModelSelection, CRITIC, DRAFTER, QA};
use crate::models::ModelConfig;
use crate::run_llm_function;
use crate::skills::prompts;

/// Structured wrapper so the model returns one markdown body
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct GeneratedText {
    /// The complete markdown response
    pub text: String,
}

pub struct RadkitGenerator {
    models: ModelSelection,
}

impl RadkitGenerator {
    pub fn new(models: &ModelSelection) -> Self {
        Self {
            models: models.clone(),
        }
    }

    fn model_for(&self, purpose: GenerationPurpose) -> ModelConfig {
        let stage = match purpose {
            GenerationPurpose::Draft => DRAFTER,
            GenerationPurpose::Critique => CRITIC,
            GenerationPurpose::Answer => QA,
        };
        self.models.for_stage(stage)
    }

    /// Prompt followed by the numbered reference passages
    pub fn compose_input(request: &GenerationRequest) -> String {
        if request.context_passages.is_empty() {
            return request.prompt.clone();
        }
        format!(
            "{}\n\n## Reference Passages\n\n{}",
            request.prompt,
            render_passages(&request.context_passages)
        )
    }

    async fn call(config: &ModelConfig, system_prompt: &'static str, input: String) -> anyhow::Result<GeneratedText> {
        run_llm_function!(config, GeneratedText, system_prompt, input)
    }
}

#[async_trait]
impl Generator for RadkitGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ToolError> {
        let config = self.model_for(request.purpose);
        let system_prompt = match request.purpose {
            GenerationPurpose::Draft => prompts::DRAFTER,
            GenerationPurpose::Critique => prompts::CRITIC,
            GenerationPurpose::Answer => prompts::QA,
        };

        tracing::debug!(
            provider = config.provider.as_str(),
            model = %config.model,
            purpose = ?request.purpose,
            passages = request.context_passages.len(),
            "Calling generator"
        );

        let output = Self::call(&config, system_prompt, Self::compose_input(request))
            .await
            .map_err(|e| {
                ToolError::Generation(format!(
                    "{} (provider: {}, model: {})",
                    e,
                    config.provider.as_str(),
                    config.model
                ))
            })?;
        Ok(output.text)
    }
}
