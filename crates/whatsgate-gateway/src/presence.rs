//! Periodic refresh of contact presence subscriptions.
//!
//! The server stops sending presence updates to clients it considers idle,
//! so each session re-subscribes on a jittered timer. A refresh is only
//! performed while our own presence is available; otherwise it is deferred
//! until we become available again.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::types::PresenceKind;

/// A duration uniformly drawn from `[base / 2, base * 3 / 2)`.
pub fn jittered_interval(base: Duration) -> Duration {
    let half = base / 2;
    if half.is_zero() {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0..base.as_nanos().min(u64::MAX as u128) as u64);
    half + Duration::from_nanos(jitter)
}

/// Run until `rx` closes, calling `refresh` on every due tick.
pub async fn refresh_loop<F, Fut>(mut rx: mpsc::Receiver<PresenceKind>, base: Duration, mut refresh: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let sleep = time::sleep(jittered_interval(base));
    tokio::pin!(sleep);

    let mut presence = PresenceKind::Available;
    let mut pending = false;

    loop {
        tokio::select! {
            _ = &mut sleep, if !pending => {
                if presence == PresenceKind::Available {
                    refresh().await;
                    sleep.as_mut().reset(Instant::now() + jittered_interval(base));
                } else {
                    pending = true;
                }
            }
            next = rx.recv() => {
                let Some(next) = next else {
                    debug!("Presence refresh stopped");
                    return;
                };
                if pending && next == PresenceKind::Available {
                    refresh().await;
                    pending = false;
                    sleep.as_mut().reset(Instant::now() + jittered_interval(base));
                }
                presence = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_jitter_within_half_of_base() {
        let base = 12 * HOUR;
        for _ in 0..1000 {
            let d = jittered_interval(base);
            assert!(d >= base / 2, "{d:?} too short");
            assert!(d < base * 3 / 2, "{d:?} too long");
        }
    }

    #[test]
    fn test_zero_base() {
        assert_eq!(jittered_interval(Duration::ZERO), Duration::ZERO);
    }

    fn counting() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<()>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_while_available() {
        let (tx, rx) = mpsc::channel(1);
        let (count, refresh) = counting();
        let task = tokio::spawn(refresh_loop(rx, HOUR, refresh));

        // Every interval is under 1.5 h, so two must elapse within 3 h.
        time::sleep(3 * HOUR).await;
        assert!(count.load(Ordering::SeqCst) >= 2);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_until_available() {
        let (tx, rx) = mpsc::channel(1);
        let (count, refresh) = counting();
        let task = tokio::spawn(refresh_loop(rx, HOUR, refresh));

        tx.send(PresenceKind::Unavailable).await.unwrap();
        time::sleep(2 * HOUR).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tx.send(PresenceKind::Available).await.unwrap();
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_on_close() {
        let (tx, rx) = mpsc::channel(1);
        let (count, refresh) = counting();
        let task = tokio::spawn(refresh_loop(rx, HOUR, refresh));
        drop(tx);
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
