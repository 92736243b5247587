//! # LLM Helpers
//!
//! Provider dispatch for radkit `LlmFunction` calls. Each radkit provider
//! is a distinct type, so the match has to happen where the function is built.

/// Run an `LlmFunction<$output_type>` against whichever provider `$config` names.
///
/// Evaluates to `anyhow::Result<$output_type>`. A missing API key is reported
/// with the environment variable the provider reads.
#[macro_export]
macro_rules! run_llm_function {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {{
        use anyhow::Context as _;
        use radkit::agent::LlmFunction;
        use radkit::models::providers::{
            AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
        };
        use $crate::models::LlmProvider;

        let config = $config;
        let system_prompt = $system_prompt;
        let input = $input;
        let result: anyhow::Result<$output_type> = match config.provider {
            LlmProvider::Anthropic => {
                let llm = AnthropicLlm::from_env(&config.model)
                    .context("Anthropic client needs ANTHROPIC_API_KEY")?;
                LlmFunction::<$output_type>::new_with_system_instructions(llm, system_prompt)
                    .run(input)
                    .await
                    .map_err(Into::into)
            }
            LlmProvider::OpenAI => {
                let mut llm = OpenAILlm::from_env(&config.model)
                    .context("OpenAI client needs OPENAI_API_KEY")?;
                if let Some(base_url) = &config.base_url {
                    llm = llm.with_base_url(base_url);
                }
                LlmFunction::<$output_type>::new_with_system_instructions(llm, system_prompt)
                    .run(input)
                    .await
                    .map_err(Into::into)
            }
            LlmProvider::Gemini => {
                let llm = GeminiLlm::from_env(&config.model)
                    .context("Gemini client needs GEMINI_API_KEY")?;
                LlmFunction::<$output_type>::new_with_system_instructions(llm, system_prompt)
                    .run(input)
                    .await
                    .map_err(Into::into)
            }
            LlmProvider::OpenRouter => {
                let llm = OpenRouterLlm::from_env(&config.model)
                    .context("OpenRouter client needs OPENROUTER_API_KEY")?;
                LlmFunction::<$output_type>::new_with_system_instructions(llm, system_prompt)
                    .run(input)
                    .await
                    .map_err(Into::into)
            }
            LlmProvider::Grok => {
                let llm = GrokLlm::from_env(&config.model)
                    .context("Grok client needs XAI_API_KEY")?;
                LlmFunction::<$output_type>::new_with_system_instructions(llm, system_prompt)
                    .run(input)
                    .await
                    .map_err(Into::into)
            }
            LlmProvider::DeepSeek => {
                let llm = DeepSeekLlm::from_env(&config.model)
                    .context("DeepSeek client needs DEEPSEEK_API_KEY")?;
                LlmFunction::<$output_type>::new_with_system_instructions(llm, system_prompt)
                    .run(input)
                    .await
                    .map_err(Into::into)
            }
        };
        result
    }};
}

pub use run_llm_function;
