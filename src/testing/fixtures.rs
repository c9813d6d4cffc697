//! Shared fixtures for unit and integration tests

use crate::config::AssistantConfig;

/// Offline configuration: hashing embeddings, small chunks and a low
/// similarity threshold so short documents are retrievable
pub fn test_config() -> AssistantConfig {
    let toml_content = r#"
[assistant]
id = "test-daf"
organization = "Acme SAS"

[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
api_key_env = "ANTHROPIC_API_KEY"
temperature = 0.2
max_tokens = 2000

[embedding]
provider = "hashing"
dimensions = 256

[rag]
chunk_size = 64
chunk_overlap = 8
similarity_threshold = 0.1
"#;
    toml::from_str(toml_content).expect("Test config should parse")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_offline() {
        let config = test_config();
        assert_eq!(config.assistant.id, "test-daf");
        assert_eq!(config.rag.chunk_size, 64);
        assert!(config.get_embedding_api_key().is_err());
    }
}
