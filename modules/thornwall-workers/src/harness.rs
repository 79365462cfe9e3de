//! Worker lifecycle: staggered startup, restart on exit, panic recovery, and
//! cooperative shutdown.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use thornwall_common::{context_sleep, SleepOutcome};

/// Delay before restarting a worker that stopped or panicked.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// A long-running worker loop. `run` returns only when its work is done (it
/// normally never is) or the token cancels; the harness restarts it
/// otherwise.
#[async_trait]
pub trait Worker: Send {
    fn kind(&self) -> &'static str;
    async fn run(&mut self, ctx: CancellationToken);
}

/// Run `count` instances of a worker kind until the token cancels.
///
/// Instance `i` starts after a cancellable delay of `i * startup_delay`. Each
/// instance loops: construct a worker, run it on its own task, and on normal
/// return or panic wait five seconds and restart. Panics are logged with the
/// worker kind; they never take down sibling instances.
pub async fn run_workers<F>(
    kind: &'static str,
    count: usize,
    startup_delay: Duration,
    ctx: CancellationToken,
    factory: F,
) where
    F: Fn(usize) -> Box<dyn Worker> + Clone + Send + Sync + 'static,
{
    let mut handles = Vec::with_capacity(count);

    for instance in 0..count {
        let ctx = ctx.clone();
        let factory = factory.clone();

        handles.push(tokio::spawn(async move {
            let delay = startup_delay * instance as u32;
            if context_sleep(&ctx, delay).await == SleepOutcome::Cancelled {
                return;
            }

            let worker_id = format!("{kind}_worker_{instance}");
            info!(worker_id, "Starting worker");

            loop {
                if ctx.is_cancelled() {
                    return;
                }

                let mut worker = factory(instance);
                let run_ctx = ctx.clone();
                let handle = tokio::spawn(async move {
                    worker.run(run_ctx).await;
                });

                match handle.await {
                    Ok(()) => {
                        if ctx.is_cancelled() {
                            return;
                        }
                        warn!(worker_id, worker_kind = kind, "Worker stopped unexpectedly");
                    }
                    Err(e) if e.is_panic() => {
                        error!(worker_id, worker_kind = kind, "Worker execution failed");
                        info!(worker_id, "Restarting worker in 5 seconds...");
                    }
                    Err(_) => return,
                }

                if context_sleep(&ctx, RESTART_DELAY).await == SleepOutcome::Cancelled {
                    return;
                }
            }
        }));
    }

    info!(worker_kind = kind, count, "Started workers");
    for handle in handles {
        let _ = handle.await;
    }
}
