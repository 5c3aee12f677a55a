//! Per-mode generation: invokes the provider and republishes its output to
//! the broker as one or more chunks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::Result;
use crate::provider::Provider;
use crate::task::Task;

/// Non-streaming generation: calls [`Provider::generate`] and publishes the
/// full string as a single chunk.
pub async fn process(
    ctx: CancellationToken,
    broker: &Broker,
    task: &Task,
    provider: &Arc<dyn Provider>,
) -> Result<()> {
    let text = provider
        .generate(
            ctx,
            &task.prompt,
            task.images.as_deref(),
            task.config.as_ref(),
        )
        .await?;
    broker.publish(task.task_id, text).await;
    Ok(())
}

/// Streaming generation: reads the provider's chunk sequence and republishes
/// each chunk to the broker in order. Aborts on `ctx` cancellation or on the
/// first error surfaced by the provider's error channel.
pub async fn process_stream(
    ctx: CancellationToken,
    broker: &Broker,
    task: &Task,
    provider: &Arc<dyn Provider>,
) -> Result<()> {
    let mut stream = provider
        .generate_stream(
            ctx.clone(),
            &task.prompt,
            task.images.as_deref(),
            task.config.as_ref(),
        )
        .await;

    let mut errors_open = true;

    loop {
        if !errors_open {
            // The error channel has already told us "no error occurred";
            // the only remaining source of truth is the chunk channel.
            tokio::select! {
                biased;
                () = ctx.cancelled() => return Err(crate::error::Error::Cancelled),
                chunk = stream.chunks.recv() => {
                    match chunk {
                        Some(chunk) => broker.publish(task.task_id, chunk).await,
                        None => return Ok(()),
                    }
                }
            }
            continue;
        }

        tokio::select! {
            biased;
            () = ctx.cancelled() => {
                return Err(crate::error::Error::Cancelled);
            }
            chunk = stream.chunks.recv() => {
                match chunk {
                    Some(chunk) => broker.publish(task.task_id, chunk).await,
                    None => return Ok(()),
                }
            }
            err = stream.errors.recv() => {
                match err {
                    Some(err) => return Err(err),
                    None => errors_open = false,
                }
            }
        }
    }
}
