#![doc = include_str!("../README.md")]

mod server;

use std::sync::Arc;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::gateway::GatewayState;
use server::service::handler::GenerateService;
use server::telemetry::{init_telemetry, TelemetryProviders};
use synapse_core::{Broker, ProviderRegistryBuilder, WorkerPool};
use synapse_proto::proto::generate_server::GenerateServer;
use synapse_proto::FILE_DESCRIPTOR_SET;
use tokio::net::TcpListener;
use tokio::signal;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server;
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// mimalloc performs noticeably better than the system allocator under the
// contention a worker pool this size puts on it.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        grpc_addr = %config.grpc_addr,
        http_addr = %config.http_addr,
        workers = config.worker_count,
        "starting synapse-server"
    );

    let broker = Broker::new(config.queue_buffer_size, config.stream_buffer_size);
    let registry = ProviderRegistryBuilder::new()
        .with_bundle(synapse_providers::gemini::bundle(&config.gemini_api_keys))
        .with_bundle(synapse_providers::openrouter::bundle(
            &config.openrouter_api_keys,
            &config.openrouter_model_codes,
        ))
        .build();
    let pool = Arc::new(WorkerPool::spawn(
        broker.clone(),
        registry.clone(),
        config.worker_count,
        config.shutdown_timeout,
    ));

    let state = GatewayState::new(broker, registry, pool);
    let grpc_service = GenerateService::new(state.clone());
    let http_app = server::http::router(state);

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<GenerateServer<GenerateService>>()
        .await;

    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let grpc_listener = TcpListener::bind(&config.grpc_addr).await?;
    let http_listener = TcpListener::bind(&config.http_addr).await?;

    let grpc_server = Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_generate_service(grpc_service.clone()))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(grpc_listener),
            shutdown_signal(grpc_service, health_reporter),
        );

    let http_server = axum::serve(http_listener, http_app.into_make_service())
        .with_graceful_shutdown(ctrl_c_or_sigterm());

    let (grpc_result, http_result) = tokio::join!(grpc_server, http_server);
    grpc_result?;
    http_result?;

    #[cfg(feature = "tracing")]
    tracing::info!("synapse-server shut down cleanly");

    flush_telemetry(providers);
    Ok(())
}

fn build_generate_service(service: GenerateService) -> GenerateServer<GenerateService> {
    GenerateServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn ctrl_c_or_sigterm() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Drives the gRPC server's own graceful-shutdown hook: flips health status
/// to not-serving, then drains and cancels the worker pool through the
/// service shared with the HTTP front end. `axum::serve`'s own
/// `with_graceful_shutdown` races the same signal independently, so both
/// listeners stop accepting new work together.
async fn shutdown_signal(service: GenerateService, health_reporter: HealthReporter) {
    ctrl_c_or_sigterm().await;

    #[cfg(feature = "tracing")]
    tracing::info!("shutdown signal received, draining in-flight work");

    health_reporter
        .set_not_serving::<GenerateServer<GenerateService>>()
        .await;

    service.shutdown().await;
}

fn flush_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        if let Err(err) = _providers.tracer_provider.force_flush() {
            eprintln!("error flushing traces: {err:#?}");
        }
        if let Err(err) = _providers.tracer_provider.shutdown() {
            eprintln!("error shutting down tracer: {err:#?}");
        }
    }

    #[cfg(feature = "metrics")]
    {
        if let Err(err) = _providers.meter_provider.force_flush() {
            eprintln!("error flushing metrics: {err:#?}");
        }
        if let Err(err) = _providers.meter_provider.shutdown() {
            eprintln!("error shutting down meter: {err:#?}");
        }
    }
}
