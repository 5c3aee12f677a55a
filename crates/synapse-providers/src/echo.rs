//! A deterministic, network-free provider used for local development and
//! integration tests: it never calls out, so gateway behavior (broker
//! ordering, keep-alives, cancellation) can be exercised without a live
//! upstream.

use async_trait::async_trait;
use bytes::Bytes;
use synapse_core::error::Result;
use synapse_core::provider::{GenerateStream, Provider};
use synapse_core::task::GenerationConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Echoes the prompt back, word by word, with a fixed per-word delay so
/// streaming tests can observe more than one chunk.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    name: String,
    word_delay: std::time::Duration,
}

impl EchoProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            word_delay: std::time::Duration::from_millis(0),
        }
    }

    /// Sets a per-word delay, useful for tests that need to observe a
    /// keep-alive fire before the first real chunk.
    pub fn with_word_delay(mut self, delay: std::time::Duration) -> Self {
        self.word_delay = delay;
        self
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        _ctx: CancellationToken,
        prompt: &str,
        _images: Option<&[Bytes]>,
        _config: Option<&GenerationConfig>,
    ) -> Result<String> {
        Ok(prompt.to_string())
    }

    async fn generate_stream(
        &self,
        ctx: CancellationToken,
        prompt: &str,
        _images: Option<&[Bytes]>,
        _config: Option<&GenerationConfig>,
    ) -> GenerateStream {
        let (chunk_tx, chunks) = mpsc::channel(16);
        let (_error_tx, errors) = mpsc::channel(1);

        let words: Vec<String> = prompt.split_whitespace().map(str::to_string).collect();
        let delay = self.word_delay;

        tokio::spawn(async move {
            for (i, word) in words.iter().enumerate() {
                if delay > std::time::Duration::ZERO {
                    tokio::select! {
                        () = ctx.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                let chunk = if i == 0 { word.clone() } else { format!(" {word}") };
                if chunk_tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });

        GenerateStream { chunks, errors }
    }

    fn count_tokens(&self, prompt: &str) -> Result<usize> {
        Ok(synapse_core::provider::estimate_token_count(prompt))
    }
}
