//! Model provider implementations for Forgehand.
//!
//! All providers implement the `forgehand_core::Provider` trait.

pub mod anthropic;

pub use anthropic::{AnthropicProvider, SseParser};

use forgehand_config::ProviderConfig;
use forgehand_core::error::ProviderError;
use forgehand_core::Provider;
use std::sync::Arc;

/// Build the provider described by `[provider]`.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key: set provider.api_key or FORGEHAND_API_KEY".into(),
            )
        })?;
    let provider = AnthropicProvider::new(api_key)?.with_api_url(&config.api_url);
    Ok(Arc::new(provider))
}
