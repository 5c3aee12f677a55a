//! Gemini provider bundle: one [`HttpChatProvider`] per supported model code,
//! all sharing one [`KeyPool`] parsed from `GEMINI_API_KEYS`, talking to
//! Gemini's OpenAI-compatible endpoint.

use std::sync::Arc;

use synapse_core::provider::{KeyPool, Provider, ProviderBundle};

use crate::http_chat::HttpChatProvider;

const GEMINI_OPENAI_COMPAT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Model codes this gateway is willing to route to Gemini.
const MODEL_CODES: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
];

/// Builds the Gemini bundle from a comma-separated `GEMINI_API_KEYS` value.
/// An empty or missing value still produces a bundle (each model registers,
/// but every call will fail fast with a configuration error) so a gateway
/// without Gemini credentials configured doesn't have to special-case
/// `ListModels`.
pub fn bundle(api_keys: &str) -> ProviderBundle {
    let keys = KeyPool::from_comma_separated(api_keys);

    let models = MODEL_CODES
        .iter()
        .map(|code| {
            let provider: Arc<dyn Provider> = Arc::new(HttpChatProvider::new(
                format!("gemini:{code}"),
                GEMINI_OPENAI_COMPAT_BASE,
                *code,
                keys.clone(),
            ));
            (code.to_string(), provider)
        })
        .collect();

    ProviderBundle::new(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_registers_every_known_model_code() {
        let bundle = bundle("key-a,key-b");
        let codes: Vec<&str> = bundle.models.iter().map(|(code, _)| code.as_str()).collect();
        for expected in MODEL_CODES {
            assert!(codes.contains(expected));
        }
    }
}
