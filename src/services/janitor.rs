//! Background sweep of abandoned upload sessions.
//!
//! Clients that never finalize leave their session directory behind. The
//! janitor removes sessions whose directory has not been touched for longer
//! than the configured TTL.

use crate::services::chunk_store::ChunkStore;
use std::time::Duration;
use tokio::{task::JoinHandle, time};

#[derive(Debug, Clone, Copy)]
pub struct SweepSchedule {
    /// Time between sweeps.
    pub interval: Duration,
    /// Age after which an untouched session is considered abandoned.
    pub session_ttl: Duration,
}

/// Spawn the sweep loop. Errors are logged and the loop keeps running.
pub fn spawn(store: ChunkStore, schedule: SweepSchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(schedule.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            run_once(&store, schedule.session_ttl).await;
        }
    })
}

async fn run_once(store: &ChunkStore, ttl: Duration) {
    match store.sweep_expired(ttl).await {
        Ok(0) => tracing::debug!(target: "janitor", "no expired upload sessions"),
        Ok(removed) => tracing::info!(
            target: "janitor",
            removed,
            "swept expired upload sessions"
        ),
        Err(err) => tracing::error!(
            target: "janitor",
            "sweeping {} failed: {:?}",
            store.root().display(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_sweeper_clears_expired_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("chunks"));
        store.write_chunk("stale", 0, b"x").await.unwrap();

        let handle = spawn(
            store.clone(),
            SweepSchedule {
                interval: Duration::from_millis(20),
                session_ttl: Duration::ZERO,
            },
        );

        let mut cleared = false;
        for _ in 0..100 {
            if !store.session_dir("stale").exists() {
                cleared = true;
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert!(cleared);
    }
}
