use std::time::Duration;

use copilot_contracts::prompts::PromptTemplate;

use crate::normalize::NormalizeOptions;
use crate::payload::FollowUpImagePolicy;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_TOKENS: u64 = 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Requested model; `None` takes the registry's first vision model.
    pub model: Option<String>,
    /// Falls back to `OPENAI_API_BASE` / `OPENAI_BASE_URL`, then the public endpoint.
    pub api_base: Option<String>,
    pub max_tokens: u64,
    pub timeout: Duration,
    pub template: PromptTemplate,
    pub follow_up_image: FollowUpImagePolicy,
    pub suggestions_enabled: bool,
    pub normalize: NormalizeOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: Some(DEFAULT_MODEL.to_string()),
            api_base: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            template: PromptTemplate::default(),
            follow_up_image: FollowUpImagePolicy::default(),
            suggestions_enabled: true,
            normalize: NormalizeOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn resolved_api_base(&self) -> String {
        self.api_base
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(crate::provider::openai_api_base)
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;
    use crate::payload::FollowUpImagePolicy;
    use crate::provider::DEFAULT_OPENAI_API_BASE;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.timeout.as_secs(), 60);
        assert_eq!(config.follow_up_image, FollowUpImagePolicy::Attach);
        assert!(config.suggestions_enabled);
        assert_eq!(config.normalize.jpeg_quality, 90);
        assert!(config.normalize.max_dimension.is_none());
    }

    #[test]
    fn explicit_api_base_wins() {
        let config = EngineConfig {
            api_base: Some(" http://localhost:8080/v1 ".to_string()),
            ..EngineConfig::default()
        };
        assert_eq!(config.resolved_api_base(), "http://localhost:8080/v1");
        assert!(DEFAULT_OPENAI_API_BASE.starts_with("https://"));
    }
}
