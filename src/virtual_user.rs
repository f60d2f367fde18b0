use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;

use crate::http_probe::prelude::*;
use crate::http_probe::result::millis;

/// Run one round for a virtual user: probe every resource concurrently and collect exactly one
/// result per resource, in completion order.
///
/// Each probe task holds a permit of `pool` while it runs, which bounds how many probes are in
/// flight at once. After fan-in the total of every result is replaced by the wall-clock time of
/// the whole round, so it includes scheduling and hand-off delays.
pub async fn run_round(
    prober: Arc<Prober>,
    resources: Arc<[Resource]>,
    pool: Arc<Semaphore>,
) -> Vec<ProbeResult> {
    let round_start = Instant::now();
    let (tx, mut rx) = mpsc::channel::<(usize, ProbeResult)>(1);

    for index in 0..resources.len() {
        let tx = tx.clone();
        let prober = prober.clone();
        let resources = resources.clone();
        let pool = pool.clone();

        tokio::spawn(async move {
            // the pool is never closed
            let _permit = pool.acquire_owned().await.ok();
            let result = prober.probe(&resources[index]).await;
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut reported = vec![false; resources.len()];
    let mut results = Vec::with_capacity(resources.len());
    while results.len() < resources.len() {
        match rx.recv().await {
            Some((index, result)) => {
                reported[index] = true;
                results.push(result);
            }
            None => break,
        }
    }

    // a task only goes missing if it panicked
    for (index, _) in reported.iter().enumerate().filter(|(_, seen)| !**seen) {
        log::error!("Probe task for {} ended without a result", resources[index].url);
        results.push(ProbeResult::failed(&resources[index], ProbeError::Aborted));
    }

    let round_total = millis(round_start.elapsed());
    for result in &mut results {
        result.total_ms = round_total;
    }

    results
}

/// Permits for a round's worker pool. `0` means one permit per resource.
pub fn worker_pool(max_concurrent_probes: usize, resource_count: usize) -> Arc<Semaphore> {
    let permits = match max_concurrent_probes {
        0 => resource_count.max(1),
        n => n,
    };
    Arc::new(Semaphore::new(permits.min(Semaphore::MAX_PERMITS)))
}
