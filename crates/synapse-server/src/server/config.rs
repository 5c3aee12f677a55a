//! Runtime configuration for the `synapse-server` binary.
//!
//! These settings control listener addresses, worker pool sizing, channel
//! buffering, shutdown grace, and which upstream providers this gateway is
//! configured to reach. All values are parsed from CLI arguments or
//! environment variables, with defaults suitable for local development.

use anyhow::bail;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "synapse-server",
    version,
    about = "An LLM inference gateway: gRPC + HTTP front ends over a shared broker/worker-pool core"
)]
pub struct CliArgs {
    /// Address the gRPC listener binds to.
    ///
    /// Environment variable: `GRPC_ADDR`
    ///
    /// Default: `"0.0.0.0:50051"`
    #[arg(long, env = "GRPC_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub grpc_addr: String,

    /// Address the HTTP listener (JSON + OpenAI-compatible routes) binds to.
    ///
    /// Environment variable: `HTTP_ADDR`
    ///
    /// Default: `"0.0.0.0:8080"`
    #[arg(long, env = "HTTP_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub http_addr: String,

    /// Worker pool size multiplier. The pool spawns `multiplier * num_cpus`
    /// workers, all draining one shared task queue.
    ///
    /// Environment variable: `WORKER_CONCURRENCY_MULTIPLIER`
    ///
    /// Default: `4`
    #[arg(long, env = "WORKER_CONCURRENCY_MULTIPLIER", default_value_t = 4)]
    pub worker_concurrency_multiplier: usize,

    /// Capacity of the broker's bounded task queue (`B` in the design docs).
    /// `enqueue` blocks once this many tasks are pending dispatch.
    ///
    /// Environment variable: `QUEUE_BUFFER_SIZE`
    ///
    /// Default: `256`
    #[arg(long, env = "QUEUE_BUFFER_SIZE", default_value_t = 256)]
    pub queue_buffer_size: usize,

    /// Capacity of each task's per-subscriber chunk channel.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    ///
    /// Default: `128`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 128)]
    pub stream_buffer_size: usize,

    /// Maximum time (in seconds) to wait for in-flight tasks to drain during
    /// shutdown before cancelling them outright.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    ///
    /// Default: `10`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Comma-separated Gemini API keys. A provider with no keys configured
    /// still registers its model codes; calls simply fail with a
    /// configuration error rather than the registry omitting the model.
    ///
    /// Environment variable: `GEMINI_API_KEYS`
    ///
    /// Default: empty
    #[arg(long, env = "GEMINI_API_KEYS", default_value_t = String::new())]
    pub gemini_api_keys: String,

    /// Comma-separated OpenRouter API keys.
    ///
    /// Environment variable: `OPENROUTER_API_KEYS`
    ///
    /// Default: empty
    #[arg(long, env = "OPENROUTER_API_KEYS", default_value_t = String::new())]
    pub openrouter_api_keys: String,

    /// Comma-separated OpenRouter model codes this gateway should expose
    /// (e.g. `openrouter/anthropic/claude-3.5-sonnet,openrouter/openai/gpt-4o`).
    /// Unlike Gemini, OpenRouter has no fixed catalogue baked into this
    /// binary.
    ///
    /// Environment variable: `OPENROUTER_MODEL_CODES`
    ///
    /// Default: empty
    #[arg(long, env = "OPENROUTER_MODEL_CODES", default_value_t = String::new())]
    pub openrouter_model_codes: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub grpc_addr: String,
    pub http_addr: String,
    pub worker_count: usize,
    pub queue_buffer_size: usize,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: std::time::Duration,
    pub gemini_api_keys: String,
    pub openrouter_api_keys: String,
    pub openrouter_model_codes: Vec<String>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.worker_concurrency_multiplier == 0 {
            bail!("WORKER_CONCURRENCY_MULTIPLIER must be greater than 0");
        }
        if args.queue_buffer_size == 0 {
            bail!("QUEUE_BUFFER_SIZE must be greater than 0");
        }
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let worker_count = synapse_core::default_worker_count(args.worker_concurrency_multiplier);

        let openrouter_model_codes = args
            .openrouter_model_codes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            grpc_addr: args.grpc_addr,
            http_addr: args.http_addr,
            worker_count,
            queue_buffer_size: args.queue_buffer_size,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: std::time::Duration::from_secs(args.shutdown_timeout),
            gemini_api_keys: args.gemini_api_keys,
            openrouter_api_keys: args.openrouter_api_keys,
            openrouter_model_codes,
        })
    }
}
