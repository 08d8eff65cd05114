use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use putzplan::models::{CreateTaskRequest, PeriodEntry, Task, User};
use putzplan::periods::OverlapPolicy;
use putzplan::stats;
use putzplan::storage::PRIMARY_KEY;
use putzplan::sync::SYNC_KEY;
use putzplan::{
    CrossSyncChannel, DataManager, Error, ExecuteOptions, FileStore, KeyValueStore, MemoryStore,
    PersistenceChannel,
};
use std::sync::Arc;

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, month, day).unwrap()
}

fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, month, day, 10, 0, 0).unwrap()
}

fn open(store: &MemoryStore) -> DataManager {
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    DataManager::open(
        PersistenceChannel::new(shared.clone()),
        Some(CrossSyncChannel::new(shared, "test")),
        OverlapPolicy::Warn,
    )
}

fn seed(manager: &mut DataManager) -> (User, Task) {
    manager.create_household("WG Sonnenallee", None).unwrap();
    let user = manager.create_user("Anna", None).unwrap();
    let task = manager
        .create_task(CreateTaskRequest {
            title: "Bad putzen".to_string(),
            emoji: None,
            base_points: 10,
            min_days_between: None,
            checklist: Vec::new(),
        })
        .unwrap();
    (user, task)
}

fn execute(manager: &mut DataManager, task: &Task, user: &User, when: DateTime<Utc>) {
    manager
        .execute_task_for_user(
            &task.id,
            &user.id,
            ExecuteOptions {
                executed_at: Some(when),
                ..ExecuteOptions::default()
            },
        )
        .unwrap();
}

#[test]
fn january_period_survives_restart() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    let (user, task) = seed(&mut manager);

    let created = manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    assert_eq!(created.period.days, 31);

    execute(&mut manager, &task, &user, at(1, 10));
    assert!(manager.flush());
    drop(manager);

    let restored = open(&store);
    let state = restored.get_state();
    let period = state.current_period.as_ref().unwrap();
    assert_eq!(period.id, created.period.id);
    assert_eq!((period.start, period.end), (date(1, 1), date(1, 31)));
    assert_eq!(state.executions.len(), 1);
    assert_eq!(state.users[&user.id].total_points, 10);
    assert!(!restored.is_dirty());
}

#[test]
fn reset_period_archives_previous_and_clears_points() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    let (user, task) = seed(&mut manager);
    let first = manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    execute(&mut manager, &task, &user, at(1, 10));

    let second = manager.set_custom_period(date(2, 1), date(2, 28), true).unwrap();
    assert_eq!(second.archived.as_deref(), Some(first.period.id.as_str()));

    let restored = open(&store);
    let state = restored.get_state();
    assert_eq!(state.current_period.as_ref().unwrap().id, second.period.id);
    assert!(state.executions.is_empty());
    assert_eq!(state.users[&user.id].total_points, 0);
    assert_eq!(state.users.len(), 1);
    assert_eq!(state.tasks.len(), 1);

    let history = restored.historical_periods();
    assert_eq!(history.len(), 2);
    match history.iter().find(|entry| entry.id() == first.period.id) {
        Some(PeriodEntry::Archive(archived)) => {
            assert_eq!(archived.summary.total_points, 10);
            assert_eq!(archived.summary.execution_count, 1);
        }
        other => panic!("expected archived first period, got {other:?}"),
    }
}

#[test]
fn deleted_historical_period_stays_deleted_after_reload() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    seed(&mut manager);
    let first = manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    manager.set_custom_period(date(2, 1), date(2, 28), false).unwrap();

    manager.delete_period(&first.period.id, false).unwrap();
    drop(manager);

    let restored = open(&store);
    let ids: Vec<String> = restored
        .historical_periods()
        .iter()
        .map(|entry| entry.id().to_string())
        .collect();
    assert_eq!(ids, vec!["2025-02-01_2025-02-28".to_string()]);
}

#[test]
fn deleting_active_period_without_force_changes_nothing() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    seed(&mut manager);
    let created = manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    let before = manager.sequence();

    let err = manager.delete_period(&created.period.id, false).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(manager.sequence(), before);
    assert_eq!(manager.historical_periods().len(), 1);

    manager.delete_period(&created.period.id, true).unwrap();
    assert!(manager.get_state().current_period.is_none());
    assert!(open(&store).get_state().current_period.is_none());
}

#[test]
fn period_sequences_never_duplicate_ids() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    seed(&mut manager);

    let mut created = Vec::new();
    for month in 1..=6 {
        let start = date(month, 1);
        let end = date(month, 20);
        created.push(manager.set_custom_period(start, end, month % 2 == 0).unwrap().period.id);
        if month % 3 == 0 {
            let archived = created[(month / 3 - 1) as usize].clone();
            manager.delete_period(&archived, true).unwrap();
        }
    }
    // Same range again gets a fresh id.
    manager.set_custom_period(date(6, 1), date(6, 20), false).unwrap();

    for manager in [&manager, &open(&store)] {
        let history = manager.historical_periods();
        let mut ids: Vec<&str> = history.iter().map(|entry| entry.id()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);

        let household = manager.current_wg().unwrap();
        for entry in &history {
            let live = household.periods.iter().filter(|p| p.id == entry.id()).count();
            let archived = household
                .historical_periods
                .iter()
                .filter(|a| a.period.id == entry.id())
                .count();
            assert_eq!(live + archived, 1, "period {} stored twice", entry.id());
        }
        let current = manager.get_state().current_period.as_ref().unwrap();
        assert!(household.periods.iter().any(|period| period.id == current.id));
    }
}

#[test]
fn aggregation_agrees_across_views() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    let (user, task) = seed(&mut manager);
    let ben = manager.create_user("Ben", None).unwrap();
    manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();

    execute(&mut manager, &task, &user, at(1, 2));
    execute(&mut manager, &task, &ben, at(1, 3));
    execute(&mut manager, &task, &user, at(1, 31));
    execute(&mut manager, &task, &user, at(2, 1));

    let scoped = manager.display_period_executions();
    assert_eq!(scoped.len(), 3);

    let period = manager.get_state().current_period.clone().unwrap();
    let direct = stats::filter_by_period(manager.get_state().executions.values(), &period);
    assert_eq!(direct.len(), scoped.len());
    assert_eq!(
        stats::total_points(&user.id, direct.iter().copied()),
        stats::total_points(&user.id, scoped.iter())
    );

    let summary = manager.period_stats().unwrap();
    let anna = summary.members.iter().find(|member| member.user_id == user.id).unwrap();
    assert_eq!(anna.points, 20);
    assert_eq!(anna.executions, 2);
    assert_eq!(summary.team.total_points, 30);
    assert_eq!(summary.leaderboard[0].user_id, user.id);
    assert_eq!(summary.timeline.len(), 31);
}

#[test]
fn display_pointer_reads_archived_snapshot() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    let (user, task) = seed(&mut manager);
    let first = manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    execute(&mut manager, &task, &user, at(1, 5));
    manager.set_custom_period(date(2, 1), date(2, 28), true).unwrap();

    assert!(manager.display_period_executions().is_empty());
    let sequence = manager.sequence();
    manager.set_display_period(Some(first.period.id.clone())).unwrap();
    manager.set_display_period(Some(first.period.id.clone())).unwrap();
    assert_eq!(manager.sequence(), sequence);
    assert_eq!(manager.display_period_executions().len(), 1);

    manager.set_display_period(None).unwrap();
    assert!(manager.display_period_executions().is_empty());
}

#[test]
fn failed_save_keeps_memory_and_pending_flag() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    let (user, task) = seed(&mut manager);
    manager.force_save().unwrap();

    store.set_fail_writes(true);
    execute(&mut manager, &task, &user, at(1, 4));
    let err = manager.force_save().unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert!(manager.is_dirty());
    assert_eq!(manager.get_state().executions.len(), 1);
    let status = manager.status();
    assert!(status.pending_changes);
    assert!(status.last_save_error.is_some());

    store.set_fail_writes(false);
    assert!(manager.flush());
    assert!(manager.status().last_save_error.is_none());
    assert_eq!(open(&store).get_state().executions.len(), 1);
}

#[test]
fn period_changes_roll_back_when_the_write_fails() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    let (user, task) = seed(&mut manager);
    let january = manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    execute(&mut manager, &task, &user, at(1, 10));
    assert!(manager.flush());
    let before = manager.get_state().clone();

    store.set_fail_writes(true);
    let err = manager.set_custom_period(date(2, 1), date(2, 28), true).unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(manager.get_state(), &before);

    let err = manager.delete_period(&january.period.id, true).unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(manager.get_state(), &before);

    let err = manager.import_json("{}").unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(manager.get_state(), &before);
    assert!(!manager.is_dirty());
    assert!(manager.status().last_save_error.is_some());

    let stored = open(&store);
    assert_eq!(stored.get_state().current_period.as_ref().unwrap().id, january.period.id);
    assert_eq!(stored.get_state().executions.len(), 1);

    store.set_fail_writes(false);
    let february = manager.set_custom_period(date(2, 1), date(2, 28), true).unwrap();
    assert_eq!(february.archived.as_deref(), Some(january.period.id.as_str()));
    let restored = open(&store);
    assert_eq!(restored.get_state().current_period.as_ref().unwrap().id, february.period.id);
    assert!(restored.get_state().executions.is_empty());
}

#[test]
fn stored_day_counts_are_recomputed_on_load() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    seed(&mut manager);
    let created = manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    drop(manager);

    let mut envelope: serde_json::Value = serde_json::from_str(&store.raw(PRIMARY_KEY).unwrap()).unwrap();
    envelope["state"]["currentPeriod"]["days"] = 5000.into();
    let wg = envelope["state"]["currentWG"].as_str().unwrap().to_string();
    envelope["state"]["wgs"][&wg]["periods"][0]["days"] = (-3).into();
    store.set(PRIMARY_KEY, &envelope.to_string()).unwrap();
    store.remove(SYNC_KEY).unwrap();

    let restored = open(&store);
    let state = restored.get_state();
    assert_eq!(state.current_period.as_ref().unwrap().days, 31);
    assert_eq!(state.current_household().unwrap().periods[0].days, 31);
    let stats = restored.period_stats().unwrap();
    assert_eq!(stats.period.id, created.period.id);
    assert_eq!(stats.timeline.len(), 31);
}

#[test]
fn newer_sync_copy_wins_and_repairs_primary() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    seed(&mut manager);
    manager.force_save().unwrap();
    let saved_sequence = manager.sequence();

    // Another context writes a newer state to the sync copy only.
    let sync_only = MemoryStore::new();
    let mut other = open(&sync_only);
    other.create_household("Other", None).unwrap();
    let newer = other.get_state().clone();
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
    CrossSyncChannel::new(shared.clone(), "other-tab")
        .publish(&newer, saved_sequence + 5)
        .unwrap();

    let restored = open(&store);
    assert_eq!(restored.sequence(), saved_sequence + 5);
    assert_eq!(restored.current_wg().unwrap().name, "Other");
    let primary = PersistenceChannel::new(shared).load().unwrap();
    assert_eq!(primary.sequence, saved_sequence + 5);
    assert!(store.raw(PRIMARY_KEY).is_some());
    assert!(store.raw(SYNC_KEY).is_some());
}

#[test]
fn running_manager_adopts_newer_copy_on_reconcile() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    seed(&mut manager);
    manager.force_save().unwrap();

    let mut other = open(&store);
    other.create_user("Chris", None).unwrap();
    other.force_save().unwrap();

    let outcome = manager.reconcile_from_storage();
    assert!(outcome.adopted);
    assert_eq!(outcome.outcome, "both-agree");
    assert_eq!(manager.get_state().users.len(), 2);
    assert!(!manager.is_dirty());
}

#[test]
fn import_replaces_state_and_export_round_trips() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    let (user, task) = seed(&mut manager);
    manager.set_custom_period(date(1, 1), date(1, 31), false).unwrap();
    execute(&mut manager, &task, &user, at(1, 8));
    let dump = manager.export_json().unwrap();

    let fresh_store = MemoryStore::new();
    let mut fresh = open(&fresh_store);
    fresh.import_json(&dump).unwrap();
    assert_eq!(fresh.get_state(), manager.get_state());
    assert_eq!(open(&fresh_store).get_state().executions.len(), 1);
}

#[test]
fn clear_all_data_writes_empty_state() {
    let store = MemoryStore::new();
    let mut manager = open(&store);
    seed(&mut manager);
    manager.force_save().unwrap();
    let before = manager.sequence();

    manager.clear_all_data().unwrap();
    assert!(manager.sequence() > before);
    let restored = open(&store);
    assert!(restored.get_state().users.is_empty());
    assert!(restored.current_wg().is_none());
}

#[test]
fn file_store_restart_survival() {
    let dir = tempfile::tempdir().unwrap();
    let open_dir = || {
        let shared: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));
        DataManager::open(
            PersistenceChannel::new(shared.clone()),
            Some(CrossSyncChannel::new(shared, "test")),
            OverlapPolicy::Warn,
        )
    };

    let mut manager = open_dir();
    let (user, task) = seed(&mut manager);
    let created = manager.set_custom_period(date(3, 1), date(3, 31), false).unwrap();
    execute(&mut manager, &task, &user, at(3, 2));
    assert!(manager.flush());
    drop(manager);

    assert!(dir.path().join("app-data.json").exists());
    assert!(dir.path().join("app-sync.json").exists());
    let restored = open_dir();
    assert_eq!(
        restored.get_state().current_period.as_ref().unwrap().id,
        created.period.id
    );
    assert_eq!(restored.get_state().executions.len(), 1);
}
