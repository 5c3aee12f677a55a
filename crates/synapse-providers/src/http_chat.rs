//! A generic OpenAI-compatible chat completions client, parameterized by
//! base URL and model id. Concrete provider families (Gemini, OpenRouter)
//! wire this up with their own endpoint and model list; the client itself
//! has no brand-specific knowledge beyond its `Authorization: Bearer`
//! credential and request shape.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::io;
use std::time::Duration;
use synapse_core::error::{Error, Result};
use synapse_core::provider::{GenerateStream, KeyPool, Provider};
use synapse_core::task::GenerationConfig;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// A chat-completions backend reachable over HTTP, speaking the
/// OpenAI-compatible `POST {base_url}/chat/completions` contract that
/// Gemini's and OpenRouter's compatibility layers both expose.
pub struct HttpChatProvider {
    name: String,
    base_url: String,
    model: String,
    keys: KeyPool,
    client: reqwest::Client,
}

impl HttpChatProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>, keys: KeyPool) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            model: model.into(),
            keys,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client configuration is static and always valid"),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, prompt: &str, stream: bool, config: Option<&GenerationConfig>) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": stream,
        });
        if let Some(config) = config {
            let obj = body.as_object_mut().expect("constructed as an object above");
            if let Some(temperature) = config.temperature {
                obj.insert("temperature".into(), serde_json::json!(temperature));
            }
            if let Some(top_p) = config.top_p {
                obj.insert("top_p".into(), serde_json::json!(top_p));
            }
            if let Some(output_length) = config.output_length {
                obj.insert("max_tokens".into(), serde_json::json!(output_length));
            }
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl Provider for HttpChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        ctx: CancellationToken,
        prompt: &str,
        _images: Option<&[Bytes]>,
        config: Option<&GenerationConfig>,
    ) -> Result<String> {
        if self.keys.is_empty() {
            return Err(Error::provider(anyhow::anyhow!("no API keys configured for {}", self.name)));
        }

        let body = self.request_body(prompt, false, config);
        let mut last_err: Option<anyhow::Error> = None;

        for key in self.keys.shuffled() {
            let send = self
                .client
                .post(self.endpoint())
                .bearer_auth(&key)
                .json(&body)
                .send();

            let response = tokio::select! {
                () = ctx.cancelled() => return Err(Error::Cancelled),
                result = send => result,
            };

            match response.and_then(reqwest::Response::error_for_status) {
                Ok(response) => match response.json::<ChatCompletionResponse>().await {
                    Ok(parsed) => {
                        return parsed
                            .choices
                            .into_iter()
                            .next()
                            .map(|choice| choice.message.content)
                            .ok_or_else(|| Error::provider(anyhow::anyhow!("{}: empty choices array", self.name)));
                    }
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(Error::provider(last_err.unwrap_or_else(|| anyhow::anyhow!("all API keys failed"))))
    }

    async fn generate_stream(
        &self,
        ctx: CancellationToken,
        prompt: &str,
        _images: Option<&[Bytes]>,
        config: Option<&GenerationConfig>,
    ) -> GenerateStream {
        let (chunk_tx, chunks) = mpsc::channel(64);
        let (error_tx, errors) = mpsc::channel(1);

        let body = self.request_body(prompt, true, config);
        let endpoint = self.endpoint();
        let client = self.client.clone();
        let keys = self.keys.shuffled();
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            if keys.is_empty() {
                let _ = error_tx
                    .send(Error::provider(anyhow::anyhow!("no API keys configured for {provider_name}")))
                    .await;
                return;
            }

            let mut last_err: Option<anyhow::Error> = None;

            for key in keys {
                let (emitted, outcome) = stream_one_key(&client, &endpoint, &key, &body, ctx.clone(), &chunk_tx).await;
                match outcome {
                    Ok(()) => return,
                    // Once a real chunk has reached the caller, a mid-stream
                    // failure is terminal: retrying a fresh key would splice a
                    // second generation's output onto the first's, so report
                    // the failure instead of trying the next key.
                    Err(err) if emitted => {
                        let _ = error_tx.send(Error::provider(err)).await;
                        return;
                    }
                    Err(err) => last_err = Some(err),
                }
                if ctx.is_cancelled() {
                    return;
                }
            }

            let _ = error_tx
                .send(Error::provider(last_err.unwrap_or_else(|| anyhow::anyhow!("all API keys failed"))))
                .await;
        });

        GenerateStream { chunks, errors }
    }

    fn count_tokens(&self, prompt: &str) -> Result<usize> {
        Ok(synapse_core::provider::estimate_token_count(prompt))
    }
}

/// Streams one SSE response body to completion, forwarding delta content as
/// chunks. Returns `(emitted, outcome)`: `emitted` is `true` once at least one
/// chunk has been forwarded on `chunk_tx` during this attempt, so the caller
/// can tell a mid-stream failure (retryable with a fresh key only while
/// `emitted` is still `false`) from one that never produced output. `outcome`
/// is `Ok(())` once the server sends its terminal `[DONE]` marker (or the
/// body simply ends); `Err` on a transport or HTTP failure.
async fn stream_one_key(
    client: &reqwest::Client,
    endpoint: &str,
    key: &str,
    body: &Value,
    ctx: CancellationToken,
    chunk_tx: &mpsc::Sender<String>,
) -> (bool, anyhow::Result<()>) {
    let mut emitted = false;

    let send = client.post(endpoint).bearer_auth(key).json(body).send();
    let response = tokio::select! {
        () = ctx.cancelled() => return (emitted, Ok(())),
        result = send => result,
    };
    let response = match response.and_then(reqwest::Response::error_for_status) {
        Ok(response) => response,
        Err(err) => return (emitted, Err(err.into())),
    };

    let byte_stream = response.bytes_stream().map_err(io::Error::other);
    let reader = StreamReader::new(byte_stream);
    let mut lines = FramedRead::new(reader, LinesCodec::new());

    loop {
        let next = tokio::select! {
            () = ctx.cancelled() => return (emitted, Ok(())),
            next = lines.next() => next,
        };
        let Some(line) = next else { return (emitted, Ok(())) };
        let line = match line {
            Ok(line) => line,
            Err(err) => return (emitted, Err(err.into())),
        };

        if line.trim().is_empty() {
            continue;
        }
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data.trim() == "[DONE]" {
            return (emitted, Ok(()));
        }

        let parsed: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(_) => continue,
        };
        let delta = parsed
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !delta.is_empty() {
            emitted = true;
            if chunk_tx.send(delta.to_string()).await.is_err() {
                return (emitted, Ok(()));
            }
        }
    }
}
