//! OpenRouter provider bundle: one [`HttpChatProvider`] per configured model
//! code, all sharing one [`KeyPool`] parsed from `OPENROUTER_API_KEYS`.
//!
//! Unlike Gemini, OpenRouter proxies an open-ended catalogue of upstream
//! models, so the model codes are caller-supplied rather than hardcoded.

use std::sync::Arc;

use synapse_core::provider::{KeyPool, Provider, ProviderBundle};

use crate::http_chat::HttpChatProvider;

const OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1";

/// Builds the OpenRouter bundle from a comma-separated `OPENROUTER_API_KEYS`
/// value and the set of model codes this gateway should expose (typically
/// sourced from configuration, e.g. `openrouter/anthropic/claude-3.5-sonnet`).
pub fn bundle(api_keys: &str, model_codes: &[String]) -> ProviderBundle {
    let keys = KeyPool::from_comma_separated(api_keys);

    let models = model_codes
        .iter()
        .map(|code| {
            let provider: Arc<dyn Provider> =
                Arc::new(HttpChatProvider::new(format!("openrouter:{code}"), OPENROUTER_BASE, code.clone(), keys.clone()));
            (code.clone(), provider)
        })
        .collect();

    ProviderBundle::new(models)
}
