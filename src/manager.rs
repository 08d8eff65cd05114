use crate::absences;
use crate::errors::{Error, Result};
use crate::models::{
    Absence, AbsenceReason, CreateTaskRequest, Execution, Household, HouseholdSettings,
    PeriodEntry, PeriodStats, RateTaskRequest, ReconcileResponse, State, StatePatch,
    StatusResponse, Task, TaskRating, TemporaryResident, UpdateTaskRequest, UpdateUserRequest, User,
    new_id, new_invite_code,
};
use crate::periods::{self, CreatePeriodOptions, OverlapPolicy, PeriodCreated, PreviousPeriod};
use crate::residents;
use crate::stats;
use crate::storage::{PersistenceChannel, sanitize};
use crate::store::StateStore;
use crate::sync::{CrossSyncChannel, Reconciliation, Source, load_reconciled};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_AVATAR: &str = "🙂";
pub const DEFAULT_TASK_EMOJI: &str = "🧹";

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Defaults to now.
    pub executed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub ignore_cooldown: bool,
}

/// Owns the state and both durable channels.
///
/// Mutations go through [`StateStore::update`] so that a rejected operation
/// changes nothing. Saving is left to the caller (debounced by the service
/// shell) except for period creation, period deletion and import. Those write
/// through and are rolled back if the write fails.
pub struct DataManager {
    store: StateStore,
    primary: PersistenceChannel,
    sync: Option<CrossSyncChannel>,
    overlap_policy: OverlapPolicy,
    last_save_error: Option<String>,
}

impl DataManager {
    /// Loads and reconciles both durable copies, repairing whichever one lost.
    pub fn open(
        primary: PersistenceChannel,
        sync: Option<CrossSyncChannel>,
        overlap_policy: OverlapPolicy,
    ) -> Self {
        let outcome = load_reconciled(&primary, sync.as_ref());
        let needs_primary_repair = matches!(outcome.winner(), Some(Source::Secondary));
        let needs_sync_publish = matches!(
            outcome,
            Reconciliation::PrimaryOnly(_)
                | Reconciliation::BothConflict {
                    winner: Source::Primary,
                    ..
                }
        );

        let store = match outcome.into_loaded() {
            Some(loaded) => {
                if needs_primary_repair {
                    if let Err(err) = primary.save(&loaded.state, loaded.sequence) {
                        error!("failed to repair primary copy: {err}");
                    }
                }
                if needs_sync_publish {
                    if let Some(sync) = &sync {
                        if let Err(err) = sync.publish(&loaded.state, loaded.sequence) {
                            warn!("failed to refresh sync copy: {err}");
                        }
                    }
                }
                info!(
                    sequence = loaded.sequence,
                    users = loaded.state.users.len(),
                    executions = loaded.state.executions.len(),
                    "state restored"
                );
                StateStore::restored(loaded.state, loaded.sequence)
            }
            None => {
                info!("no stored state, starting empty");
                StateStore::new()
            }
        };

        Self {
            store,
            primary,
            sync,
            overlap_policy,
            last_save_error: None,
        }
    }

    pub fn get_state(&self) -> &State {
        self.store.get_state()
    }

    pub fn sequence(&self) -> u64 {
        self.store.sequence()
    }

    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap_policy
    }

    pub fn set_state(&mut self, patch: StatePatch) {
        self.store.set_state(patch);
    }

    pub fn current_wg(&self) -> Option<&Household> {
        self.get_state().current_household()
    }

    pub fn historical_periods(&self) -> Vec<PeriodEntry> {
        periods::historical_periods(self.get_state())
    }

    pub fn display_period_id(&self) -> Option<&str> {
        self.store.display_period()
    }

    /// Period the views look at: the display pointer if set, else the current period.
    pub fn display_period(&self) -> Option<PeriodEntry> {
        let state = self.get_state();
        match self.store.display_period() {
            Some(id) => periods::find_period(state, id),
            None => state.current_period.clone().map(PeriodEntry::Live),
        }
    }

    /// Executions of the display period. Archived periods answer from their
    /// snapshot; with no period at all every execution is returned.
    pub fn display_period_executions(&self) -> Vec<Execution> {
        let state = self.get_state();
        match self.display_period() {
            Some(PeriodEntry::Archive(archived)) => match archived.saved_state {
                Some(snapshot) => snapshot.executions,
                None => stats::filter_by_period(state.executions.values(), &archived.period)
                    .into_iter()
                    .cloned()
                    .collect(),
            },
            Some(PeriodEntry::Live(period)) => stats::filter_by_period(state.executions.values(), &period)
                .into_iter()
                .cloned()
                .collect(),
            None => state.executions.values().cloned().collect(),
        }
    }

    pub fn period_stats(&self) -> Option<PeriodStats> {
        let entry = self.display_period()?;
        let executions = self.display_period_executions();
        let refs: Vec<&Execution> = executions.iter().collect();
        Some(stats::build_period_stats(self.get_state(), entry.record(), &refs))
    }

    pub fn create_household(&mut self, name: &str, monthly_points_target: Option<u32>) -> Result<Household> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("household name is required"));
        }
        let household = Household {
            id: new_id("wg"),
            name: name.to_string(),
            member_ids: Vec::new(),
            settings: HouseholdSettings {
                monthly_points_target: monthly_points_target
                    .unwrap_or(crate::models::DEFAULT_MONTHLY_TARGET),
            },
            invite_code: Some(new_invite_code()),
            created_at: Utc::now(),
            periods: Vec::new(),
            historical_periods: Vec::new(),
        };
        self.store.update(|state| {
            state.wgs.insert(household.id.clone(), household.clone());
            state.current_wg = Some(household.id.clone());
            Ok(())
        })?;
        info!(wg = %household.id, "household created");
        Ok(household)
    }

    /// Creates a user and adds them to the current household, if any.
    pub fn create_user(&mut self, name: &str, avatar: Option<&str>) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("user name is required"));
        }
        let user = User {
            id: new_id("user"),
            name: name.to_string(),
            avatar: avatar.unwrap_or(DEFAULT_AVATAR).to_string(),
            total_points: 0,
            joined_at: Utc::now(),
            is_active: true,
        };
        self.store.update(|state| {
            state.users.insert(user.id.clone(), user.clone());
            if let Some(household) = state.current_household_mut() {
                household.member_ids.push(user.id.clone());
            }
            Ok(())
        })?;
        info!(user = %user.id, "user created");
        Ok(user)
    }

    /// Adds a user to the household holding `invite_code` and makes it current.
    pub fn join_wg(&mut self, invite_code: &str, user_id: &str) -> Result<Household> {
        let code = invite_code.trim();
        if code.is_empty() {
            return Err(Error::validation("invite code is required"));
        }
        let household = self.store.update(|state| {
            if !state.users.contains_key(user_id) {
                return Err(Error::not_found(format!("user {user_id}")));
            }
            let household = state
                .wgs
                .values_mut()
                .find(|household| {
                    household
                        .invite_code
                        .as_deref()
                        .is_some_and(|existing| existing.eq_ignore_ascii_case(code))
                })
                .ok_or_else(|| Error::not_found(format!("household with invite code {code}")))?;
            if !household.member_ids.iter().any(|member| member == user_id) {
                household.member_ids.push(user_id.to_string());
            }
            let household = household.clone();
            state.current_wg = Some(household.id.clone());
            Ok(household)
        })?;
        info!(wg = %household.id, user = %user_id, "user joined household");
        Ok(household)
    }

    /// Applies a partial edit. `isActive: false` keeps the user and their
    /// executions but marks them as gone.
    pub fn update_user(&mut self, user_id: &str, request: UpdateUserRequest) -> Result<User> {
        let name = match request.name.as_deref().map(str::trim) {
            Some("") => return Err(Error::validation("user name is required")),
            other => other.map(str::to_string),
        };
        let user = self.store.update(|state| {
            let user = state
                .users
                .get_mut(user_id)
                .ok_or_else(|| Error::not_found(format!("user {user_id}")))?;
            if let Some(name) = name {
                user.name = name;
            }
            if let Some(avatar) = request.avatar {
                user.avatar = avatar;
            }
            if let Some(is_active) = request.is_active {
                user.is_active = is_active;
            }
            Ok(user.clone())
        })?;
        info!(user = %user.id, active = user.is_active, "user updated");
        Ok(user)
    }

    pub fn update_task(&mut self, task_id: &str, request: UpdateTaskRequest) -> Result<Task> {
        let title = match request.title.as_deref().map(str::trim) {
            Some("") => return Err(Error::validation("task title is required")),
            other => other.map(str::to_string),
        };
        if request.base_points == Some(0) {
            return Err(Error::validation("task points must be positive"));
        }
        let task = self.store.update(|state| {
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| Error::not_found(format!("task {task_id}")))?;
            if let Some(title) = title {
                task.title = title;
            }
            if let Some(emoji) = request.emoji {
                task.emoji = emoji;
            }
            if let Some(points) = request.base_points {
                task.base_points = points;
            }
            if let Some(days) = request.min_days_between {
                task.min_days_between = (days > 0).then_some(days);
            }
            if let Some(checklist) = request.checklist {
                task.checklist = checklist;
            }
            if let Some(is_active) = request.is_active {
                task.is_active = is_active;
            }
            Ok(task.clone())
        })?;
        info!(task = %task.id, points = task.base_points, active = task.is_active, "task updated");
        Ok(task)
    }

    /// Soft delete: the task stays so its executions keep their title.
    pub fn deactivate_task(&mut self, task_id: &str) -> Result<Task> {
        self.update_task(
            task_id,
            UpdateTaskRequest {
                is_active: Some(false),
                ..UpdateTaskRequest::default()
            },
        )
    }

    pub fn create_task(&mut self, request: CreateTaskRequest) -> Result<Task> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(Error::validation("task title is required"));
        }
        if request.base_points == 0 {
            return Err(Error::validation("task points must be positive"));
        }
        let household_id = self
            .current_wg()
            .map(|household| household.id.clone())
            .ok_or_else(|| Error::not_found("current household"))?;

        let task = Task {
            id: new_id("task"),
            title: title.to_string(),
            emoji: request.emoji.unwrap_or_else(|| DEFAULT_TASK_EMOJI.to_string()),
            base_points: request.base_points,
            min_days_between: request.min_days_between,
            checklist: request.checklist,
            household_id,
            is_active: true,
        };
        self.store.update(|state| {
            state.tasks.insert(task.id.clone(), task.clone());
            Ok(())
        })?;
        info!(task = %task.id, points = task.base_points, "task created");
        Ok(task)
    }

    pub fn execute_task_for_user(
        &mut self,
        task_id: &str,
        user_id: &str,
        options: ExecuteOptions,
    ) -> Result<Execution> {
        let executed_at = options.executed_at.unwrap_or_else(Utc::now);
        let execution = self.store.update(|state| {
            let task = state
                .tasks
                .get(task_id)
                .ok_or_else(|| Error::not_found(format!("task {task_id}")))?;
            if !state.users.contains_key(user_id) {
                return Err(Error::not_found(format!("user {user_id}")));
            }
            if !task.is_active {
                return Err(Error::validation(format!("task {task_id} is inactive")));
            }
            if !options.ignore_cooldown {
                if let Some(next) = stats::next_execution_date(task, user_id, state.executions.values()) {
                    if executed_at < next {
                        return Err(Error::validation(format!(
                            "task {} is on cooldown until {}",
                            task.title,
                            next.date_naive()
                        )));
                    }
                }
            }

            let active = residents::active_residents(state, &task.household_id, executed_at.date_naive()).len();
            let points = residents::adjusted_task_points(task.base_points, active);

            let mut id = execution_id(executed_at);
            while state.executions.contains_key(&id) {
                id = execution_id(executed_at);
            }
            let execution = Execution {
                id,
                task_id: task_id.to_string(),
                user_id: user_id.to_string(),
                executed_at,
                points_awarded: points,
                notes: options.notes.clone(),
            };
            state.executions.insert(execution.id.clone(), execution.clone());
            state.recompute_user_points();
            Ok(execution)
        })?;

        info!(
            execution = %execution.id,
            task = %task_id,
            user = %user_id,
            points = execution.points_awarded,
            "task executed"
        );
        Ok(execution)
    }

    pub fn delete_execution(&mut self, execution_id: &str) -> Result<Execution> {
        let removed = self.store.update(|state| {
            let removed = state
                .executions
                .remove(execution_id)
                .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))?;
            state.recompute_user_points();
            Ok(removed)
        })?;
        info!(execution = %execution_id, "execution deleted");
        Ok(removed)
    }

    /// Stores a user's rating of a task, replacing their previous one.
    pub fn rate_task(&mut self, request: RateTaskRequest) -> Result<TaskRating> {
        let values = [request.minutes, request.pain, request.importance, request.frequency];
        if values.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(Error::validation("ratings must be non-negative numbers"));
        }
        let rating = TaskRating {
            user_id: request.user_id,
            task_id: request.task_id,
            minutes: request.minutes,
            pain: request.pain,
            importance: request.importance,
            frequency: request.frequency,
        };
        self.store.update(|state| {
            if !state.users.contains_key(&rating.user_id) {
                return Err(Error::not_found(format!("user {}", rating.user_id)));
            }
            if !state.tasks.contains_key(&rating.task_id) {
                return Err(Error::not_found(format!("task {}", rating.task_id)));
            }
            state
                .ratings
                .retain(|existing| !(existing.user_id == rating.user_id && existing.task_id == rating.task_id));
            state.ratings.push(rating.clone());
            Ok(())
        })?;
        Ok(rating)
    }

    /// Starts a new current period, archiving the previous one. Succeeds only
    /// once the primary copy holds the new period.
    pub fn set_custom_period(&mut self, start: NaiveDate, end: NaiveDate, reset_data: bool) -> Result<PeriodCreated> {
        self.create_period(
            start,
            end,
            CreatePeriodOptions {
                reset_data,
                previous: PreviousPeriod::Archive,
                ..CreatePeriodOptions::default()
            },
        )
    }

    pub fn create_period(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
        options: CreatePeriodOptions,
    ) -> Result<PeriodCreated> {
        let policy = self.overlap_policy;
        let before = self.store.clone();
        let created = self
            .store
            .update(|state| periods::create_period(state, start, end, options, policy, Utc::now()))?;

        self.commit_durably(before)?;
        if !self.primary_has_current(&created.period.id) {
            return Err(Error::Persistence(format!(
                "period {} missing from the primary copy after saving",
                created.period.id
            )));
        }
        Ok(created)
    }

    pub fn delete_period(&mut self, period_id: &str, force: bool) -> Result<PeriodEntry> {
        let before = self.store.clone();
        let removed = self
            .store
            .update(|state| periods::delete_period(state, period_id, force))?;
        self.commit_durably(before)?;
        Ok(removed)
    }

    /// Points the views at a period. Idempotent; never touches `State`.
    pub fn set_display_period(&mut self, period_id: Option<String>) -> Result<()> {
        if let Some(id) = period_id.as_deref() {
            let known = self
                .current_wg()
                .is_some_and(|household| household.contains_period(id));
            if !known {
                return Err(Error::not_found(format!("period {id}")));
            }
        }
        debug!(period = ?period_id, "display period switched");
        self.store.set_display_period(period_id);
        Ok(())
    }

    pub fn add_absence(
        &mut self,
        user_id: &str,
        reason: AbsenceReason,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Absence> {
        self.store
            .update(|state| absences::add_absence(state, user_id, reason, start, end, Utc::now()))
    }

    pub fn update_absence(
        &mut self,
        user_id: &str,
        absence_id: &str,
        reason: AbsenceReason,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Absence> {
        self.store.update(|state| {
            absences::update_absence(state, user_id, absence_id, reason, start, end, Utc::now())
        })
    }

    pub fn remove_absence(&mut self, user_id: &str, absence_id: &str) -> Result<Absence> {
        self.store
            .update(|state| absences::remove_absence(state, user_id, absence_id))
    }

    pub fn add_resident(
        &mut self,
        name: &str,
        icon: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TemporaryResident> {
        let resident = self
            .store
            .update(|state| residents::add_resident(state, name, icon, start, end, Utc::now()))?;
        info!(resident = %resident.id, "temporary resident added");
        Ok(resident)
    }

    pub fn remove_resident(&mut self, resident_id: &str) -> Result<TemporaryResident> {
        self.store
            .update(|state| residents::remove_resident(state, resident_id))
    }

    /// Leaves the sequence untouched when nothing has expired.
    pub fn cleanup_expired_residents(&mut self, today: NaiveDate) -> usize {
        let cutoff = today - Duration::days(residents::RESIDENT_RETENTION_DAYS);
        let expired = self
            .get_state()
            .temporary_residents
            .values()
            .any(|resident| resident.end_date < cutoff);
        if !expired {
            return 0;
        }
        let removed = self
            .store
            .update(|state| Ok(residents::cleanup_expired(state, today)))
            .unwrap_or_default();
        info!(removed, "expired temporary residents removed");
        removed
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self.get_state())?)
    }

    /// Replaces the whole state with a flat dump and writes it through.
    pub fn import_json(&mut self, raw: &str) -> Result<()> {
        let imported: State = serde_json::from_str(raw)
            .map_err(|err| Error::validation(format!("invalid import data: {err}")))?;
        let invalid = periods::invalid_periods(&imported);
        if !invalid.is_empty() {
            return Err(Error::validation(format!(
                "periods end before they start: {}",
                invalid.join(", ")
            )));
        }
        let imported = sanitize(imported);

        let before = self.store.clone();
        self.store.update(|state| {
            *state = imported;
            Ok(())
        })?;
        self.commit_durably(before)?;
        info!(sequence = self.sequence(), "state imported");
        Ok(())
    }

    /// Writes the current state to the primary channel, then mirrors it to
    /// the sync channel. Memory is untouched on failure.
    pub fn force_save(&mut self) -> Result<()> {
        let sequence = self.store.sequence();
        if let Err(err) = self.primary.save(self.store.get_state(), sequence) {
            error!(sequence, "failed to save state: {err}");
            self.last_save_error = Some(err.to_string());
            return Err(err);
        }
        if let Some(sync) = &self.sync {
            if let Err(err) = sync.publish(self.store.get_state(), sequence) {
                warn!(sequence, "failed to publish sync copy: {err}");
            }
        }
        self.store.mark_saved(sequence);
        self.last_save_error = None;
        Ok(())
    }

    /// Saves if dirty. Errors are logged and recorded, not returned.
    pub fn flush(&mut self) -> bool {
        if !self.is_dirty() {
            return true;
        }
        self.force_save().is_ok()
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            sequence: self.sequence(),
            pending_changes: self.is_dirty(),
            last_save_error: self.last_save_error.clone(),
            sync_enabled: self.sync.is_some(),
            current_period_id: self
                .get_state()
                .current_period
                .as_ref()
                .map(|period| period.id.clone()),
            display_period_id: self.display_period_id().map(str::to_string),
        }
    }

    /// Re-reads both durable copies and adopts the winner if it is ahead of memory.
    pub fn reconcile_from_storage(&mut self) -> ReconcileResponse {
        let outcome = load_reconciled(&self.primary, self.sync.as_ref());
        let label = outcome.to_string();
        let mut adopted = false;

        if let Some(loaded) = outcome.into_loaded() {
            if loaded.sequence > self.store.sequence() && loaded.state != *self.get_state() {
                info!(
                    local = self.store.sequence(),
                    stored = loaded.sequence,
                    "adopting newer stored state"
                );
                self.store.replace(loaded.state, loaded.sequence);
                adopted = true;
            }
        }

        ReconcileResponse {
            outcome: label,
            adopted,
            sequence: self.sequence(),
        }
    }

    /// Resets to an empty state and writes it through.
    pub fn clear_all_data(&mut self) -> Result<()> {
        self.store.clear_all_data();
        warn!(sequence = self.sequence(), "all data cleared");
        self.force_save()
    }

    /// Saves a change that must be durable before it counts. On failure the
    /// store goes back to `before` and the persistence error is returned.
    fn commit_durably(&mut self, before: StateStore) -> Result<()> {
        if let Err(err) = self.force_save() {
            warn!(sequence = self.sequence(), "rolling back change that could not be saved");
            self.store = before;
            return Err(err);
        }
        Ok(())
    }

    fn primary_has_current(&self, period_id: &str) -> bool {
        self.primary
            .load()
            .and_then(|loaded| loaded.state.current_period)
            .is_some_and(|period| period.id == period_id)
    }
}

fn execution_id(executed_at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("exec_{}_{}", executed_at.timestamp_millis(), &suffix[..8])
}
