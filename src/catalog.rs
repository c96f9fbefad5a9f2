//! Model catalog: known embedding and cross-encoder models with their
//! dimensions and token limits.
//!
//! Built explicitly at startup and passed by reference into the components
//! that need it; there is no ambient global registry.

use std::collections::HashMap;

use crate::models::ModelProvider;

/// Fallback token limit when a model name is unrecognized.
pub const DEFAULT_TOKEN_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct ModelEntry {
    pub dimensions: usize,
    pub token_limit: usize,
}

/// Lookup table keyed by `(provider, model name)`.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: HashMap<(ModelProvider, String), ModelEntry>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Catalog pre-loaded with the models the pipeline ships support for.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            ModelProvider::Bedrock,
            "titan-embed-text-v1",
            ModelEntry {
                dimensions: 1536,
                token_limit: 8000,
            },
        );
        catalog.register(
            ModelProvider::Bedrock,
            "titan-embed-text-v2",
            ModelEntry {
                dimensions: 1024,
                token_limit: 8000,
            },
        );
        catalog.register(
            ModelProvider::OpenAi,
            "text-embedding-3-small",
            ModelEntry {
                dimensions: 1536,
                token_limit: 8191,
            },
        );
        catalog.register(
            ModelProvider::OpenAi,
            "text-embedding-3-large",
            ModelEntry {
                dimensions: 3072,
                token_limit: 8191,
            },
        );
        catalog.register(
            ModelProvider::Sagemaker,
            "multilingual-e5-large",
            ModelEntry {
                dimensions: 1024,
                token_limit: 512,
            },
        );
        catalog.register(
            ModelProvider::Sagemaker,
            "all-MiniLM-L6-v2",
            ModelEntry {
                dimensions: 384,
                token_limit: 256,
            },
        );
        catalog
    }

    pub fn register(&mut self, provider: ModelProvider, name: &str, entry: ModelEntry) {
        self.entries.insert((provider, name.to_string()), entry);
    }

    pub fn get(&self, provider: ModelProvider, name: &str) -> Option<ModelEntry> {
        self.entries.get(&(provider, name.to_string())).copied()
    }

    pub fn dimensions(&self, provider: ModelProvider, name: &str) -> Option<usize> {
        self.get(provider, name).map(|e| e.dimensions)
    }

    /// Token limit for the model, falling back to [`DEFAULT_TOKEN_LIMIT`]
    /// when the name is unrecognized.
    pub fn token_limit(&self, provider: ModelProvider, name: &str) -> usize {
        self.get(provider, name)
            .map(|e| e.token_limit)
            .unwrap_or(DEFAULT_TOKEN_LIMIT)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_has_table_limit() {
        let catalog = ModelCatalog::with_builtins();
        assert_eq!(
            catalog.token_limit(ModelProvider::Sagemaker, "all-MiniLM-L6-v2"),
            256
        );
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let catalog = ModelCatalog::with_builtins();
        assert_eq!(
            catalog.token_limit(ModelProvider::OpenAi, "some-future-model"),
            DEFAULT_TOKEN_LIMIT
        );
        assert!(catalog
            .dimensions(ModelProvider::OpenAi, "some-future-model")
            .is_none());
    }
}
