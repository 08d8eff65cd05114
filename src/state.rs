use crate::config::Config;
use crate::manager::DataManager;
use crate::storage::{FileStore, KeyValueStore, PersistenceChannel};
use crate::sync::CrossSyncChannel;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Mutex<DataManager>>,
    save_scheduled: Arc<AtomicBool>,
    save_debounce: Duration,
    save_retry: Duration,
}

impl AppState {
    pub fn new(manager: DataManager, save_debounce: Duration) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
            save_scheduled: Arc::new(AtomicBool::new(false)),
            save_debounce,
            save_retry: Duration::from_secs(5),
        }
    }

    pub fn with_save_retry(mut self, retry: Duration) -> Self {
        self.save_retry = retry;
        self
    }

    /// Opens the file-backed channels described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let primary_store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.data_dir));
        let sync = config.sync_enabled.then(|| {
            let sync_store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.sync_dir));
            CrossSyncChannel::new(sync_store, config.context.clone())
        });
        let manager = DataManager::open(
            PersistenceChannel::new(primary_store),
            sync,
            config.overlap_policy,
        );
        Self::new(manager, config.save_debounce).with_save_retry(config.save_retry)
    }

    /// Schedules one save after the debounce delay. Calls made while a save
    /// is pending join that save. A failed save is retried until it lands.
    pub fn schedule_save(&self) {
        if self.save_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.clone();
        tokio::spawn(async move {
            sleep(state.save_debounce).await;
            state.save_scheduled.store(false, Ordering::SeqCst);
            if !state.flush_now().await {
                warn!(retry_in = ?state.save_retry, "background save failed");
                sleep(state.save_retry).await;
                state.schedule_save();
            }
        });
    }

    /// Saves pending changes on the blocking pool, holding the lock throughout.
    pub async fn flush_now(&self) -> bool {
        let mut manager = self.manager.clone().lock_owned().await;
        if !manager.is_dirty() {
            return true;
        }
        match task::spawn_blocking(move || manager.flush()).await {
            Ok(saved) => saved,
            Err(err) => {
                error!("save task failed: {err}");
                false
            }
        }
    }
}

pub fn spawn_resident_cleanup(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = state
                .manager
                .lock()
                .await
                .cleanup_expired_residents(Utc::now().date_naive());
            if removed > 0 {
                state.schedule_save();
            }
        }
    })
}

/// Picks up changes other contexts wrote to the shared copies. Skipped while
/// local changes are pending so they are never overwritten before saving.
pub fn spawn_sync_poll(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let mut manager = state.manager.lock().await;
            if manager.is_dirty() {
                debug!("sync poll skipped, local changes pending");
                continue;
            }
            let outcome = manager.reconcile_from_storage();
            if outcome.adopted {
                info!(sequence = outcome.sequence, "state updated from another context");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::OverlapPolicy;
    use crate::storage::{MemoryStore, PRIMARY_KEY};

    fn app_state(store: &MemoryStore) -> AppState {
        let manager = DataManager::open(
            PersistenceChannel::new(Arc::new(store.clone())),
            None,
            OverlapPolicy::Warn,
        );
        AppState::new(manager, Duration::from_millis(10)).with_save_retry(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn failed_background_save_is_retried() {
        let store = MemoryStore::new();
        let state = app_state(&store);
        store.set_fail_writes(true);

        state.manager.lock().await.create_household("WG", None).unwrap();
        state.schedule_save();
        sleep(Duration::from_millis(80)).await;
        {
            let manager = state.manager.lock().await;
            assert!(manager.is_dirty());
            assert!(manager.status().last_save_error.is_some());
        }
        assert!(store.raw(PRIMARY_KEY).is_none());

        store.set_fail_writes(false);
        sleep(Duration::from_millis(300)).await;
        let manager = state.manager.lock().await;
        assert!(!manager.is_dirty());
        assert!(manager.status().last_save_error.is_none());
        assert!(store.raw(PRIMARY_KEY).is_some());
    }

    #[tokio::test]
    async fn flush_now_saves_pending_changes() {
        let store = MemoryStore::new();
        let state = app_state(&store);
        state.manager.lock().await.create_user("Anna", None).unwrap();

        assert!(state.flush_now().await);
        assert!(!state.manager.lock().await.is_dirty());
        assert!(store.raw(PRIMARY_KEY).is_some());
    }
}
