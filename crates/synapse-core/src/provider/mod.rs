//! The provider contract workers consume, and a small per-call credential
//! failover helper shared by concrete provider implementations.

mod registry;

pub use registry::{ProviderBundle, ProviderRegistry, ProviderRegistryBuilder};

use bytes::Bytes;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::task::GenerationConfig;

/// The two-channel result of a streaming generation call. Exactly one of
/// "the chunk channel closes cleanly" or "the error channel yields a value"
/// happens for a given call; both close promptly when `ctx` is cancelled.
pub struct GenerateStream {
    pub chunks: mpsc::Receiver<String>,
    pub errors: mpsc::Receiver<crate::error::Error>,
}

/// A pluggable adapter to an upstream LLM, registered under one or more
/// `model_code` keys in a [`ProviderRegistry`]. Implementations are expected
/// to be internally thread-safe: workers call them concurrently across
/// tasks.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// A short, human-readable name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Blocks until the upstream yields a complete response or fails. Must
    /// abort and return [`crate::error::Error::Cancelled`] promptly when
    /// `ctx` is cancelled.
    async fn generate(
        &self,
        ctx: CancellationToken,
        prompt: &str,
        images: Option<&[Bytes]>,
        config: Option<&GenerationConfig>,
    ) -> Result<String>;

    /// Returns a [`GenerateStream`] whose chunk channel emits zero or more
    /// strings in generation order. Must close both channels promptly on
    /// `ctx` cancellation.
    async fn generate_stream(
        &self,
        ctx: CancellationToken,
        prompt: &str,
        images: Option<&[Bytes]>,
        config: Option<&GenerationConfig>,
    ) -> GenerateStream;

    /// A cheap, pure token count estimate. No network access, no `ctx`.
    fn count_tokens(&self, prompt: &str) -> Result<usize>;
}

/// A pool of interchangeable credentials (API keys) shared by a single
/// provider instance.
///
/// `shuffled()` produces a fresh randomized ordering on every call (not
/// once per process) so that concurrent callers don't all exhaust the same
/// key first under load. Concrete providers fold over this ordering,
/// retrying the whole operation per key, and surface an error wrapping the
/// last underlying cause only once every key has failed.
#[derive(Debug, Clone)]
pub struct KeyPool {
    keys: Vec<String>,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    /// Parses a comma-separated credential list, the format used by every
    /// provider-credential environment variable in this system (e.g.
    /// `GEMINI_API_KEYS=key1,key2,key3`). Empty entries are dropped.
    pub fn from_comma_separated(raw: &str) -> Self {
        Self::new(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns a freshly shuffled copy of the key list, seeded from the
    /// thread-local RNG (effectively a high-resolution-clock-seeded source).
    pub fn shuffled(&self) -> Vec<String> {
        let mut keys = self.keys.clone();
        keys.shuffle(&mut rand::rng());
        keys
    }
}

/// The reference token-count estimate: 0.3 token per ASCII char, 0.6 token
/// per non-ASCII char, truncated toward zero. Ported directly from
/// `OpenRouterModel.CountTokens` rather than approximated by word count, so
/// every `Provider::count_tokens` implementation agrees on the same number
/// for the same prompt.
pub fn estimate_token_count(prompt: &str) -> usize {
    let mut total: f32 = 0.0;
    for ch in prompt.chars() {
        if ch.is_ascii() {
            total += 0.3;
        } else {
            total += 0.6;
        }
    }
    total as usize
}
