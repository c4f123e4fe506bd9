use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::Engine;

/// Compact the WAL if at least `threshold` events were appended since the
/// last compaction. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appended} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically compacts the WAL.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

pub fn spawn_compactor(engine: Arc<Engine>, config: &EngineConfig) -> JoinHandle<()> {
    tokio::spawn(run_compactor(
        engine,
        config.compact_threshold,
        config.compact_interval,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::wal::Wal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn window() -> AvailabilityWindow {
        AvailabilityWindow::new(TimeOfDay::new(0).unwrap(), TimeOfDay::new(1439).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn below_threshold_skips() {
        let engine = Engine::new(test_wal_path("below.wal")).unwrap();
        engine
            .create_resource(Ulid::new(), Ulid::new(), "a".into(), window())
            .await
            .unwrap();
        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn compacts_churn_away() {
        let path = test_wal_path("churn.wal");
        let engine = Engine::new(path.clone()).unwrap();
        let owner = Ulid::new();
        let rid = Ulid::new();
        engine.create_resource(rid, owner, "a".into(), window()).await.unwrap();
        for i in 0..5 {
            let other = Ulid::new();
            engine
                .create_resource(other, owner, format!("tmp{i}"), window())
                .await
                .unwrap();
            engine.delete_resource(other, owner).await.unwrap();
        }

        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert!(matches!(replayed[0], Event::ResourceCreated { id, .. } if id == rid));
    }
}
