//! Async plumbing around the synchronous query client.
//!
//! Remote commands block, so every query runs on tokio's blocking pool
//! under the configured per-command timeout. Snapshots fan out one task
//! per member. The polling loop lives here too, bounded by a
//! [`RetryPolicy`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use slotwatch_cluster::{
    ClusterClient, Convergence, RemoteExecutor, RetryPolicy, ShardTopology, TopologyError,
    TransportError, VerificationError,
};
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::error::CliError;

/// Runs one blocking query with a time limit.
///
/// A timed-out command is reported as a transport failure on `label`.
/// The blocking call itself is left to finish in the background.
pub async fn blocking<E, T, F>(
    client: &Arc<ClusterClient<E>>,
    label: &str,
    f: F,
) -> Result<T, CliError>
where
    E: RemoteExecutor + 'static,
    T: Send + 'static,
    F: FnOnce(&ClusterClient<E>) -> Result<T, TopologyError> + Send + 'static,
{
    let limit = client.config().executor.command_timeout;
    let client = Arc::clone(client);
    let task = tokio::task::spawn_blocking(move || f(&client));
    match timeout(limit, task).await {
        Ok(joined) => Ok(joined??),
        Err(_) => Err(TopologyError::from(TransportError::new(
            label,
            format!("no reply within {limit:?}"),
        ))
        .into()),
    }
}

/// Builds a snapshot by asking every member about itself, in parallel.
pub async fn snapshot<E>(client: &Arc<ClusterClient<E>>) -> Result<ShardTopology, CliError>
where
    E: RemoteExecutor + 'static,
{
    let pending: Vec<Vec<_>> = client
        .shard_targets()
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|target| {
                    let client = Arc::clone(client);
                    tokio::spawn(async move {
                        let label = target.to_string();
                        blocking(&client, &label, move |c| c.myself(&target)).await
                    })
                })
                .collect()
        })
        .collect();

    let mut rows = Vec::with_capacity(pending.len());
    for row in pending {
        let mut nodes = Vec::with_capacity(row.len());
        for handle in row {
            nodes.push(handle.await??);
        }
        rows.push(nodes);
    }
    Ok(client.assemble(rows))
}

/// Polls `probe` until it reports convergence or the policy runs out.
///
/// Waits `settle` first, then makes up to `max_attempts` probes spaced by
/// `interval`, all under `timeout`. Pending results and verification
/// errors are retried; any other error ends the loop at once. Returns the
/// number of attempts used.
pub async fn wait_until_converged<F, Fut>(policy: &RetryPolicy, mut probe: F) -> Result<u32, CliError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Convergence, CliError>>,
{
    let started = Instant::now();
    let mut attempts = 0;
    let mut last: Option<VerificationError> = None;

    let outcome = timeout(policy.timeout, async {
        if !policy.settle.is_zero() {
            info!(settle = ?policy.settle, "waiting for cluster to settle");
            sleep(policy.settle).await;
        }
        while attempts < policy.max_attempts {
            attempts += 1;
            match probe().await {
                Ok(Convergence::Converged) => return Ok(true),
                Ok(Convergence::Pending(e)) => {
                    debug!(attempt = attempts, "not converged: {e}");
                    last = Some(e);
                }
                Err(CliError::Topology(TopologyError::Verification(e))) => {
                    debug!(attempt = attempts, "not converged: {e}");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
            if attempts < policy.max_attempts {
                sleep(policy.interval).await;
            }
        }
        Ok(false)
    })
    .await;

    match outcome {
        Ok(Ok(true)) => {
            info!(attempts, elapsed = ?started.elapsed(), "cluster converged");
            Ok(attempts)
        }
        Ok(Err(e)) => Err(e),
        Ok(Ok(false)) | Err(_) => Err(CliError::NotConverged {
            attempts,
            elapsed: started.elapsed(),
            last,
        }),
    }
}

/// A policy with no settle time, for interactive single checks.
pub fn immediate(policy: &RetryPolicy) -> RetryPolicy {
    RetryPolicy {
        settle: Duration::ZERO,
        ..*policy
    }
}
