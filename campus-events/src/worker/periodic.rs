//! Fixed-period background loops

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run `tick` every `period` until `cancel` fires
///
/// The first run happens one period after start. A tick that overruns the
/// period causes the missed ticks to be skipped, never queued. Cancellation
/// is observed between ticks; an in-flight tick runs to completion.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(worker = name, period_secs = period.as_secs_f64(), "Periodic worker started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!(worker = name, "Periodic worker stopped");
                    break;
                }
                _ = interval.tick() => {
                    tracing::debug!(worker = name, "Periodic worker tick");
                    tick().await;
                }
            }
        }
    })
}
