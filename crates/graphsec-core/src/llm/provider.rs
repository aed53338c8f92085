use std::sync::Arc;

use super::{ClaudeClient, LLMError, OpenAIClient, LLM};
use crate::config::{
    LLMConfig, DEFAULT_ANTHROPIC_API_VERSION, DEFAULT_ANTHROPIC_MODEL, DEFAULT_ANTHROPIC_URL,
    DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_MODEL, DEFAULT_OPENAI_URL,
};

/// LLM provider selection.
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI-compatible endpoint (default, most universal)
    OpenAI {
        base_url: Option<String>,
        api_key: Option<String>,
        model: Option<String>,
    },
    /// Anthropic Claude
    Anthropic {
        base_url: Option<String>,
        api_key: Option<String>,
        model: Option<String>,
        api_version: Option<String>,
    },
    /// Local Ollama instance
    Ollama {
        base_url: Option<String>,
        model: String,
    },
}

impl Default for Provider {
    fn default() -> Self {
        Provider::OpenAI {
            base_url: None,
            api_key: None,
            model: None,
        }
    }
}

impl Provider {
    /// Creates a provider from LLMConfig.
    pub fn from_config(config: &LLMConfig) -> Result<Self, LLMError> {
        match config.provider.as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic {
                base_url: config.base_url.clone(),
                api_key: config.api_key_or_env(),
                model: config.model.clone(),
                api_version: config.api_version.clone(),
            }),
            "ollama" => Ok(Provider::Ollama {
                base_url: config.base_url.clone(),
                model: config
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            }),
            "openai" | "openrouter" | "openai-compatible" => Ok(Provider::OpenAI {
                base_url: Some(config.base_url_or_default()),
                api_key: config.api_key_or_env(),
                model: config.model.clone(),
            }),
            other => Err(LLMError::UnknownProvider(other.to_string())),
        }
    }

    /// Creates an LLM client from the provider configuration.
    pub fn build(self) -> Result<Arc<dyn LLM>, LLMError> {
        match self {
            Provider::OpenAI {
                base_url,
                api_key,
                model,
            } => {
                let base = base_url
                    .or_else(|| std::env::var("GRAPHSEC_LLM_BASE_URL").ok())
                    .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
                    .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

                let key = api_key
                    .or_else(|| std::env::var("GRAPHSEC_LLM_API_KEY").ok())
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .unwrap_or_default();

                let mdl = model
                    .or_else(|| std::env::var("GRAPHSEC_LLM_MODEL").ok())
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());

                Ok(Arc::new(OpenAIClient::new(base, key, mdl)))
            }

            Provider::Anthropic {
                base_url,
                api_key,
                model,
                api_version,
            } => {
                let key = api_key
                    .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                    .ok_or(LLMError::MissingApiKey)?;

                let client = ClaudeClient::new(key)
                    .with_model(model.unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()))
                    .with_api_url(base_url.unwrap_or_else(|| DEFAULT_ANTHROPIC_URL.to_string()))
                    .with_api_version(
                        api_version.unwrap_or_else(|| DEFAULT_ANTHROPIC_API_VERSION.to_string()),
                    );
                Ok(Arc::new(client))
            }

            Provider::Ollama { base_url, model } => {
                let base = base_url
                    .or_else(|| {
                        std::env::var("OLLAMA_HOST")
                            .ok()
                            .map(|h| format!("{}/v1", h.trim_end_matches('/')))
                    })
                    .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

                Ok(Arc::new(OpenAIClient::new(base, "", model)))
            }
        }
    }

    /// Auto-detect provider from environment variables.
    ///
    /// Detection order:
    /// 1. GRAPHSEC_LLM_PROVIDER explicitly set
    /// 2. ANTHROPIC_API_KEY set → Anthropic
    /// 3. OLLAMA_HOST set → Ollama
    /// 4. OpenAI-compatible
    pub fn from_env() -> Result<Arc<dyn LLM>, LLMError> {
        if let Ok(provider) = std::env::var("GRAPHSEC_LLM_PROVIDER") {
            let config = LLMConfig {
                provider: provider.to_lowercase(),
                model: std::env::var("GRAPHSEC_LLM_MODEL").ok(),
                ..LLMConfig::default()
            };
            return Provider::from_config(&config)?.build();
        }

        if std::env::var("ANTHROPIC_API_KEY").is_ok() {
            return Provider::Anthropic {
                base_url: None,
                api_key: None,
                model: None,
                api_version: None,
            }
            .build();
        }

        if std::env::var("OLLAMA_HOST").is_ok() {
            let model = std::env::var("GRAPHSEC_LLM_MODEL")
                .unwrap_or_else(|_| DEFAULT_OLLAMA_MODEL.to_string());
            return Provider::Ollama {
                base_url: None,
                model,
            }
            .build();
        }

        Provider::default().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_provider() {
        assert!(matches!(Provider::default(), Provider::OpenAI { .. }));
    }

    #[test]
    fn test_ollama_provider_build() {
        let provider = Provider::Ollama {
            base_url: None,
            model: DEFAULT_OLLAMA_MODEL.to_string(),
        };
        assert!(provider.build().is_ok());
    }

    #[test]
    fn test_openai_provider_build() {
        let provider = Provider::OpenAI {
            base_url: Some("http://localhost:8080/v1".to_string()),
            api_key: Some("test".to_string()),
            model: Some("local-model".to_string()),
        };
        assert!(provider.build().is_ok());
    }

    #[test]
    fn test_from_config() {
        let config = LLMConfig {
            provider: "ollama".to_string(),
            model: Some("codellama".to_string()),
            ..LLMConfig::default()
        };
        let provider = Provider::from_config(&config).unwrap();
        assert!(matches!(provider, Provider::Ollama { model, .. } if model == "codellama"));
    }

    #[test]
    fn test_unknown_provider() {
        let config = LLMConfig {
            provider: "carrier-pigeon".to_string(),
            ..LLMConfig::default()
        };
        assert!(matches!(
            Provider::from_config(&config),
            Err(LLMError::UnknownProvider(_))
        ));
    }
}
