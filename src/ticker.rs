//! Background control loops
//!
//! Every loop in the crate ticks on a fixed interval and watches a shared
//! cancellation token. Cancellation is only observed between cycles, so a
//! cycle that has already started always runs to completion.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shortest period a loop may tick at
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Spawn `cycle` every `period` until `cancel` fires
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("{} started, running every {:?}", name, period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("{} shutting down", name);
                    break;
                }
                _ = ticker.tick() => {
                    debug!("{} cycle", name);
                    cycle().await;
                }
            }
        }
    })
}
