//! Periodic and signal-driven background tasks.
//!
//! Every loop owns a [`CancellationToken`]; cancelling it stops the loop at
//! its next suspension point, so shutdown is deterministic. Loops are driven
//! by tokio time, which tests pause and advance instead of sleeping.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run `tick` every `period` until `token` is cancelled.
///
/// The first tick fires immediately. A tick that overruns the period delays
/// the next one instead of bursting to catch up, so two runs of the same
/// loop never overlap.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, period_secs = period.as_secs_f64(), "background task started");
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(task = name, "tick");
                    tick().await;
                }
            }
        }
        info!(task = name, "background task stopped");
    })
}

/// Run `on_change` every time the watched value changes to one accepted by
/// `filter`, until `token` is cancelled or the sender goes away.
pub fn spawn_on_change<T, P, F, Fut>(
    name: &'static str,
    mut rx: watch::Receiver<T>,
    token: CancellationToken,
    filter: P,
    mut on_change: F,
) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let accepted = filter(&rx.borrow_and_update());
                    if accepted {
                        debug!(task = name, "triggered");
                        on_change().await;
                    }
                }
            }
        }
        debug!(task = name, "watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn should_tick_once_per_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = Arc::clone(&count);
        let handle = spawn_periodic("test", Duration::from_secs(60), token.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // immediate tick, then 60s and 120s
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_when_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = Arc::clone(&count);
        let handle = spawn_periodic("test", Duration::from_secs(1), token.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        handle.await.unwrap();

        let after_cancel = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    async fn settle() {
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn should_run_only_for_accepted_changes() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = Arc::clone(&count);
        let handle = spawn_on_change("test", rx, token.clone(), |up: &bool| *up, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tx.send(true).unwrap();
        settle().await;
        tx.send(false).unwrap();
        settle().await;
        tx.send(true).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
