use std::sync::Arc;
use std::time::Duration;

use courier_store::SessionStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodic GC over persisted bot sessions; rows idle past the horizon go
/// away and the next message simply reconnects from CLI history.
pub fn spawn_session_gc(
    store: Arc<SessionStore>,
    horizon_hours: u64,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.cleanup_expired(horizon_hours) {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, horizon_hours, "session GC sweep");
                }
                Err(error) => {
                    tracing::warn!(error = %error, "session GC sweep failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::{advance, sleep};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_rows_on_schedule() {
        let store = Arc::new(SessionStore::in_memory().expect("open store"));
        store.upsert(1, "sess", "/w", None, None).expect("seed row");

        // Horizon zero: anything older than "now" is expired.
        let sweeper = spawn_session_gc(Arc::clone(&store), 0, Duration::from_secs(60));

        advance(Duration::from_secs(61)).await;
        // Let the sweeper task observe the tick.
        for _ in 0..20 {
            if store.get_by_user(1).expect("query").is_none() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        assert!(store.get_by_user(1).expect("query").is_none());
        sweeper.abort();
    }
}
