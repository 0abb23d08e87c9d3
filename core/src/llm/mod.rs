//! Uniform generate/stream contract over model providers, plus the
//! registry that picks a default and honours per-call overrides.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

mod ollama;

pub use ollama::OllamaProvider;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("no default provider configured")]
    NoDefaultProvider,

    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("provider response could not be decoded: {0}")]
    Decode(String),

    #[error("provider returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Provider-specific model override
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: Usage,
}

/// One streamed fragment. The final chunk has `done = true` and may carry usage.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn token(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
            usage: None,
        }
    }

    pub fn done(usage: Option<Usage>) -> Self {
        Self {
            content: String::new(),
            done: true,
            usage,
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, LlmError>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, LlmError>;

    async fn generate_stream(&self, req: &GenerateRequest) -> Result<ChunkStream, LlmError>;
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProviderInfo {
    pub name: String,
    pub is_default: bool,
}

/// Named providers with a switchable default. The first registered
/// provider becomes the default until [`ProviderRegistry::set_default`].
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<BTreeMap<String, Arc<dyn LlmProvider>>>,
    default: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        let name = name.into();
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(name.clone(), provider);
        }
        if let Ok(mut default) = self.default.write() {
            if default.is_none() {
                *default = Some(name);
            }
        }
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        let default = self.default_name();
        self.providers
            .read()
            .map(|providers| {
                providers
                    .keys()
                    .map(|name| ProviderInfo {
                        name: name.clone(),
                        is_default: default.as_deref() == Some(name.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.providers
            .read()
            .ok()
            .and_then(|providers| providers.get(name).cloned())
            .ok_or_else(|| LlmError::UnknownProvider(name.to_string()))
    }

    pub fn set_default(&self, name: &str) -> Result<(), LlmError> {
        self.get(name)?;
        if let Ok(mut default) = self.default.write() {
            *default = Some(name.to_string());
        }
        Ok(())
    }

    pub fn default_name(&self) -> Option<String> {
        self.default.read().ok().and_then(|d| d.clone())
    }

    /// Resolve an explicit provider name or fall back to the default.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>, LlmError> {
        match name {
            Some(name) => self.get(name),
            None => {
                let default = self.default_name().ok_or(LlmError::NoDefaultProvider)?;
                self.get(&default)
            }
        }
    }

    pub async fn generate(
        &self,
        provider: Option<&str>,
        req: &GenerateRequest,
    ) -> Result<(String, GenerateResponse), LlmError> {
        let provider = self.resolve(provider)?;
        let response = provider.generate(req).await?;
        Ok((provider.name().to_string(), response))
    }

    pub async fn generate_stream(
        &self,
        provider: Option<&str>,
        req: &GenerateRequest,
    ) -> Result<(String, ChunkStream), LlmError> {
        let provider = self.resolve(provider)?;
        let stream = provider.generate_stream(req).await?;
        Ok((provider.name().to_string(), stream))
    }
}
