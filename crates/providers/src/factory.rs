use tabrelay_core::config::ProviderConfig;
use tabrelay_core::Config;

use crate::{OpenAIProvider, Provider};

/// Default api_base for each OpenAI-compatible provider.
fn default_api_base(provider_name: &str) -> &'static str {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "ollama" => "http://localhost:11434/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Infers the provider name from a model prefix. `None` means unknown.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("ollama/") {
        Some("ollama")
    } else if model.starts_with("openrouter/") {
        Some("openrouter")
    } else if model.starts_with("openai/")
        || model.starts_with("gpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
    {
        Some("openai")
    } else if model.starts_with("deepseek") {
        Some("deepseek")
    } else if model.starts_with("groq/") {
        Some("groq")
    } else {
        None
    }
}

/// Strips a routing prefix such as `ollama/` that the endpoint does not expect.
fn wire_model_name<'a>(provider: &str, model: &'a str) -> &'a str {
    match provider {
        "ollama" | "groq" => model.split_once('/').map(|(_, m)| m).unwrap_or(model),
        _ => model,
    }
}

/// Builds the provider for `model`.
///
/// Resolution order: `explicit_provider`, then the model prefix, then the
/// first provider in config with an API key. Ollama needs no key.
pub fn create_provider(
    config: &Config,
    model: &str,
    explicit_provider: Option<&str>,
) -> anyhow::Result<Box<dyn Provider>> {
    let effective_provider: &str = if let Some(ep) = explicit_provider {
        ep
    } else if let Some(inferred) = infer_provider_from_model(model) {
        inferred
    } else if let Some((fallback, _)) = config.get_api_key() {
        fallback
    } else if config.providers.contains_key("ollama") {
        "ollama"
    } else {
        return Err(anyhow::anyhow!(
            "No LLM provider configured. Set 'provider' in config, use a recognized model prefix \
             (e.g. 'gpt-4o', 'deepseek-chat', 'ollama/llama3'), or add an API key to the providers section."
        ));
    };

    let provider_cfg = config.get_provider(effective_provider);
    if effective_provider != "ollama" {
        match provider_cfg {
            None => {
                return Err(anyhow::anyhow!(
                    "Provider '{}' is not configured in the providers section",
                    effective_provider
                ));
            }
            Some(cfg) if cfg.api_key.is_empty() => {
                return Err(anyhow::anyhow!(
                    "Provider '{}' has no API key",
                    effective_provider
                ));
            }
            _ => {}
        }
    }

    let empty_cfg = ProviderConfig::default();
    let resolved_cfg = provider_cfg.unwrap_or(&empty_cfg);
    let api_base = resolved_cfg
        .api_base
        .as_deref()
        .unwrap_or_else(|| default_api_base(effective_provider));

    let defaults = &config.agents.defaults;
    Ok(Box::new(OpenAIProvider::new(
        &resolved_cfg.api_key,
        Some(api_base),
        wire_model_name(effective_provider, model),
        defaults.max_tokens,
        defaults.temperature,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(name: &str) -> Config {
        let mut config = Config::default();
        config.providers.insert(
            name.to_string(),
            ProviderConfig {
                api_key: "sk-test".to_string(),
                api_base: None,
            },
        );
        config
    }

    #[test]
    fn test_infer_provider_from_model() {
        assert_eq!(infer_provider_from_model("gpt-4o-mini"), Some("openai"));
        assert_eq!(infer_provider_from_model("deepseek-chat"), Some("deepseek"));
        assert_eq!(infer_provider_from_model("ollama/llama3"), Some("ollama"));
        assert_eq!(infer_provider_from_model("groq/llama-3.1-70b"), Some("groq"));
        assert_eq!(infer_provider_from_model("mystery-model"), None);
    }

    #[test]
    fn test_explicit_provider_wins() {
        let config = config_with_key("openrouter");
        assert!(create_provider(&config, "gpt-4o", Some("openrouter")).is_ok());
    }

    #[test]
    fn test_model_prefix_needs_key() {
        let config = Config::default();
        assert!(create_provider(&config, "gpt-4o", None).is_err());
        let config = config_with_key("openai");
        assert!(create_provider(&config, "gpt-4o", None).is_ok());
    }

    #[test]
    fn test_fallback_to_configured_key() {
        let config = config_with_key("deepseek");
        assert!(create_provider(&config, "mystery-model", None).is_ok());
    }

    #[test]
    fn test_ollama_without_key() {
        let config = Config::default();
        assert!(create_provider(&config, "ollama/llama3", None).is_ok());
    }

    #[test]
    fn test_nothing_configured_fails() {
        let config = Config::default();
        let err = create_provider(&config, "mystery-model", None).err().unwrap();
        assert!(err.to_string().contains("No LLM provider configured"));
    }

    #[test]
    fn test_wire_model_name() {
        assert_eq!(wire_model_name("ollama", "ollama/llama3"), "llama3");
        assert_eq!(wire_model_name("openrouter", "anthropic/claude"), "anthropic/claude");
    }
}
