use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_MONTHLY_TARGET: u32 = 100;

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Six uppercase hex characters.
pub fn new_invite_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub avatar: String,
    /// Cached sum of this user's execution points. Recomputed, never trusted.
    #[serde(default)]
    pub total_points: i64,
    pub joined_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HouseholdSettings {
    pub monthly_points_target: u32,
}

impl Default for HouseholdSettings {
    fn default() -> Self {
        Self {
            monthly_points_target: DEFAULT_MONTHLY_TARGET,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub settings: HouseholdSettings,
    /// Code other users join with. Households stored without one get none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub periods: Vec<PeriodRecord>,
    #[serde(default)]
    pub historical_periods: Vec<ArchivedPeriod>,
}

impl Household {
    pub fn contains_period(&self, id: &str) -> bool {
        self.periods.iter().any(|period| period.id == id)
            || self
                .historical_periods
                .iter()
                .any(|archived| archived.period.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_points: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl PeriodRecord {
    pub fn new(
        id: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        target_points: Option<u32>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            days: inclusive_days(start, end),
            target_points,
            created_at,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start <= end && start <= self.end
    }

    /// Length relative to a 30 day month.
    pub fn ratio(&self) -> f64 {
        self.days as f64 / 30.0
    }
}

/// Whole days from `start` to `end`, both ends included.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

pub fn derive_period_id(start: NaiveDate, end: NaiveDate) -> String {
    format!("{start}_{end}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub total_points: i64,
    pub execution_count: usize,
    #[serde(default)]
    pub member_points: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSnapshot {
    pub tasks: Vec<Task>,
    pub executions: Vec<Execution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedPeriod {
    #[serde(flatten)]
    pub period: PeriodRecord,
    pub archived_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: PeriodSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_state: Option<PeriodSnapshot>,
}

/// A period as seen by the history view: still live on the household, or archived.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PeriodEntry {
    Live(PeriodRecord),
    Archive(ArchivedPeriod),
}

impl PeriodEntry {
    pub fn id(&self) -> &str {
        &self.record().id
    }

    pub fn record(&self) -> &PeriodRecord {
        match self {
            Self::Live(period) => period,
            Self::Archive(archived) => &archived.period,
        }
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, Self::Archive(_))
    }

    /// Creation time for live records, archival time for archived ones.
    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            Self::Live(period) => period.created_at,
            Self::Archive(archived) => archived.archived_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub emoji: String,
    pub base_points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_days_between: Option<u32>,
    #[serde(default)]
    pub checklist: Vec<String>,
    pub household_id: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub executed_at: DateTime<Utc>,
    pub points_awarded: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AbsenceReason {
    Vacation,
    Work,
    Family,
    Sickness,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Absence {
    pub id: String,
    pub reason: AbsenceReason,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryResident {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub household_id: String,
    pub added_at: DateTime<Utc>,
}

impl TemporaryResident {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRating {
    pub user_id: String,
    pub task_id: String,
    pub minutes: f64,
    pub pain: f64,
    pub importance: f64,
    /// Suggested executions per month.
    pub frequency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    pub users: BTreeMap<String, User>,
    pub wgs: BTreeMap<String, Household>,
    #[serde(rename = "currentWG")]
    pub current_wg: Option<String>,
    pub current_period: Option<PeriodRecord>,
    pub tasks: BTreeMap<String, Task>,
    pub executions: BTreeMap<String, Execution>,
    /// Keyed by user id.
    pub absences: BTreeMap<String, Vec<Absence>>,
    pub temporary_residents: BTreeMap<String, TemporaryResident>,
    pub ratings: Vec<TaskRating>,
}

impl State {
    pub fn current_household(&self) -> Option<&Household> {
        self.current_wg.as_ref().and_then(|id| self.wgs.get(id))
    }

    pub fn current_household_mut(&mut self) -> Option<&mut Household> {
        match self.current_wg.as_ref() {
            Some(id) => self.wgs.get_mut(id),
            None => None,
        }
    }

    /// Rebuilds every user's cached `total_points` from the executions.
    pub fn recompute_user_points(&mut self) {
        for user in self.users.values_mut() {
            user.total_points = crate::stats::total_points(&user.id, self.executions.values());
        }
    }
}

/// Shallow merge input for `StateStore::set_state`; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub users: Option<BTreeMap<String, User>>,
    pub wgs: Option<BTreeMap<String, Household>>,
    pub current_wg: Option<Option<String>>,
    pub current_period: Option<Option<PeriodRecord>>,
    pub tasks: Option<BTreeMap<String, Task>>,
    pub executions: Option<BTreeMap<String, Execution>>,
    pub absences: Option<BTreeMap<String, Vec<Absence>>>,
    pub temporary_residents: Option<BTreeMap<String, TemporaryResident>>,
    pub ratings: Option<Vec<TaskRating>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHouseholdRequest {
    pub name: String,
    #[serde(default)]
    pub monthly_points_target: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub emoji: Option<String>,
    pub base_points: u32,
    #[serde(default)]
    pub min_days_between: Option<u32>,
    #[serde(default)]
    pub checklist: Vec<String>,
}

/// Partial user edit. Absent fields stay as they are.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub base_points: Option<u32>,
    #[serde(default)]
    pub min_days_between: Option<u32>,
    #[serde(default)]
    pub checklist: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinHouseholdRequest {
    pub invite_code: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTaskRequest {
    pub user_id: String,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub ignore_cooldown: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateTaskRequest {
    pub user_id: String,
    pub task_id: String,
    pub minutes: f64,
    pub pain: f64,
    pub importance: f64,
    pub frequency: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPeriodRequest {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub reset_data: bool,
    #[serde(default)]
    pub keep_previous_live: bool,
    #[serde(default)]
    pub target_points: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeletePeriodQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPeriodRequest {
    #[serde(default)]
    pub period_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceRequest {
    pub user_id: String,
    pub reason: AbsenceReason,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidentRequest {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub sequence: u64,
    pub pending_changes: bool,
    pub last_save_error: Option<String>,
    pub sync_enabled: bool,
    pub current_period_id: Option<String>,
    pub display_period_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub outcome: String,
    pub adopted: bool,
    pub sequence: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgress {
    pub date: String,
    pub points: i64,
    pub cumulative: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProgress {
    pub user_id: String,
    pub name: String,
    pub points: i64,
    pub executions: usize,
    pub base_target: i64,
    pub absence_days: i64,
    pub target: i64,
    pub achievement: i64,
    pub completed: bool,
    pub daily_progress: Vec<DailyProgress>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStats {
    pub total_points: i64,
    pub total_target: i64,
    pub average_achievement: i64,
    pub completed_members: usize,
    pub pending_members: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub date: String,
    pub total_points: i64,
    pub member_points: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub name: String,
    pub points: i64,
    pub executions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub period: PeriodRecord,
    pub members: Vec<MemberProgress>,
    pub team: TeamStats,
    pub timeline: Vec<TimelinePoint>,
    pub leaderboard: Vec<LeaderboardEntry>,
}
