use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the WAL once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    info!("compacting WAL after {appends} appends");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::path::PathBuf;

    use crate::model::TimeInput;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn hours_from_now(h: i64) -> TimeInput {
        TimeInput::from(Utc::now() + ChronoDuration::hours(h))
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();

        let mut ids = Vec::new();
        for h in 0..4 {
            let r = engine
                .create_reservation("atlas".into(), hours_from_now(h + 1), hours_from_now(h + 2))
                .await
                .unwrap();
            ids.push(r.id);
        }
        engine.cancel_reservation(ids[0]).await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(!compact_if_needed(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(compact_if_needed(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let engine = Engine::new(path).unwrap();
        let listed = engine.list_reservations_for_room("atlas").await;
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|r| r.id != ids[0]));
    }
}
