pub mod health_monitor;
pub mod metrics_collector;

pub use health_monitor::{HealthReport, ServerHealthMonitor};
pub use metrics_collector::{CollectorPhase, CollectorSettings, MetricsCollector, TickReport};

use std::time::Duration;
use tokio::sync::watch;

/// Sleeps for `duration` unless shutdown is signalled first.
///
/// Returns `true` when the caller should stop. A dropped sender counts as
/// shutdown.
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        let stop = *shutdown_rx.borrow_and_update();
        if stop {
            return true;
        }
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
            _ = &mut sleep => return false,
        }
    }
}

pub(crate) fn is_shutting_down(shutdown_rx: &watch::Receiver<bool>) -> bool {
    *shutdown_rx.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn returns_early_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let started = Instant::now();
        let waiter = tokio::spawn(async move { sleep_or_shutdown(Duration::from_secs(30), &mut rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn completes_normally_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_or_shutdown(Duration::from_millis(10), &mut rx).await);
    }

    #[tokio::test]
    async fn dropped_sender_means_stop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(sleep_or_shutdown(Duration::from_secs(30), &mut rx).await);
    }
}
