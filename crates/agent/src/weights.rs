use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use orderly_core::consensus::{WeightError, WeightStore};
use tokio::task::JoinHandle;

/// Reloads the active table once. A missing file keeps the current table.
pub fn refresh_once(store: &WeightStore, path: &Path) -> Result<bool, WeightError> {
    if !path.exists() {
        return Ok(false);
    }
    store.reload(path)
}

/// Polls `path` every `interval` and swaps in newly approved tables. Load
/// failures are logged and the current table stays live.
pub fn spawn_refresher(store: Arc<WeightStore>, path: PathBuf, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match refresh_once(&store, &path) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(
                        event_name = "consensus.weights.unchanged",
                        path = %path.display(),
                        "weight table unchanged"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "consensus.weights.reload_failed",
                        path = %path.display(),
                        version = %store.current().version,
                        error = %error,
                        "weight table reload failed; keeping current table"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use orderly_core::consensus::{WeightStore, WeightTable};

    use super::{refresh_once, spawn_refresher};

    fn approved(version: &str) -> WeightTable {
        let mut table = WeightTable::uniform(Utc::now());
        table.version = version.to_string();
        table
    }

    #[test]
    fn missing_file_keeps_current_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = WeightStore::uniform();
        let changed = refresh_once(&store, &dir.path().join("absent.json")).expect("refresh");
        assert!(!changed);
        assert_eq!(store.current().version, "uniform");
    }

    #[test]
    fn unapproved_table_on_disk_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("active.json");
        let mut candidate = approved("w-9");
        candidate.approved_by = None;
        candidate.approved_at = None;
        candidate.save(&path).expect("save");

        let store = WeightStore::uniform();
        assert!(refresh_once(&store, &path).is_err());
        assert_eq!(store.current().version, "uniform");
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_swaps_in_new_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("active.json");
        let store = Arc::new(WeightStore::uniform());
        let handle = spawn_refresher(Arc::clone(&store), path.clone(), Duration::from_secs(60));

        approved("w-2").save(&path).expect("save");
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.current().version, "w-2");

        handle.abort();
    }
}
