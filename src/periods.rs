//! Period lifecycle: creation, archival, deletion and the history view.
//!
//! # Invariants
//! - A period id lives in at most one of `periods` / `historical_periods`.
//! - The current period, when set, is also present in the live list.
//! - `historical_periods` never returns the same id twice.

use crate::errors::{Error, Result};
use crate::models::{
    ArchivedPeriod, Execution, PeriodEntry, PeriodRecord, PeriodSnapshot, PeriodSummary, State,
    derive_period_id, inclusive_days,
};
use crate::stats::filter_by_period;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, warn};

/// What happens to the period being replaced by a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviousPeriod {
    #[default]
    Archive,
    KeepLive,
}

/// How date-range overlaps between periods are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    Allow,
    #[default]
    Warn,
    Reject,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "warn" => Ok(Self::Warn),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown overlap policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreatePeriodOptions {
    /// Explicit id; derived from the dates when `None`.
    pub id: Option<String>,
    pub target_points: Option<u32>,
    /// Clears all executions. Users, tasks and households are kept.
    pub reset_data: bool,
    pub previous: PreviousPeriod,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodCreated {
    pub period: PeriodRecord,
    pub archived: Option<String>,
    pub overlaps: Vec<String>,
}

pub fn create_period(
    state: &mut State,
    start: NaiveDate,
    end: NaiveDate,
    options: CreatePeriodOptions,
    policy: OverlapPolicy,
    now: DateTime<Utc>,
) -> Result<PeriodCreated> {
    if start >= end {
        return Err(Error::validation("period end date must be after its start date"));
    }

    let household = state
        .current_household()
        .ok_or_else(|| Error::not_found("current household"))?;

    let id = match options.id {
        Some(id) if household.contains_period(&id) => {
            return Err(Error::validation(format!("period {id} already exists")));
        }
        Some(id) => id,
        None => unique_period_id(&derive_period_id(start, end), |candidate| {
            household.contains_period(candidate)
        }),
    };

    let overlaps: Vec<String> = household
        .periods
        .iter()
        .chain(household.historical_periods.iter().map(|archived| &archived.period))
        .filter(|period| period.overlaps(start, end))
        .map(|period| period.id.clone())
        .collect();
    if !overlaps.is_empty() {
        match policy {
            OverlapPolicy::Allow => {}
            OverlapPolicy::Warn => warn!(period = %id, ?overlaps, "new period overlaps existing periods"),
            OverlapPolicy::Reject => {
                return Err(Error::validation(format!(
                    "period overlaps existing periods: {}",
                    overlaps.join(", ")
                )));
            }
        }
    }

    let replaced = state.current_period.take();
    let archived = match (&replaced, options.previous) {
        (Some(previous), PreviousPeriod::Archive) => Some(archive_period(state, previous, now)),
        _ => None,
    };

    if options.reset_data {
        let cleared = state.executions.len();
        state.executions.clear();
        state.recompute_user_points();
        info!(cleared, "period reset cleared executions");
    }

    let period = PeriodRecord::new(id, start, end, options.target_points, now);
    let household = state
        .current_household_mut()
        .ok_or_else(|| Error::not_found("current household"))?;
    let archived_id = match archived {
        Some(archived) => {
            let archived_id = archived.period.id.clone();
            household.periods.retain(|live| live.id != archived_id);
            household
                .historical_periods
                .retain(|existing| existing.period.id != archived_id);
            household.historical_periods.push(archived);
            Some(archived_id)
        }
        None => None,
    };
    household.periods.push(period.clone());
    state.current_period = Some(period.clone());

    info!(
        period = %period.id,
        days = period.days,
        archived = ?archived_id,
        reset = options.reset_data,
        "period created"
    );

    Ok(PeriodCreated {
        period,
        archived: archived_id,
        overlaps,
    })
}

/// Freezes a period with its summary and the executions inside its range.
pub fn archive_period(state: &State, period: &PeriodRecord, now: DateTime<Utc>) -> ArchivedPeriod {
    let executions: Vec<Execution> = filter_by_period(state.executions.values(), period)
        .into_iter()
        .cloned()
        .collect();

    let mut summary = PeriodSummary {
        execution_count: executions.len(),
        ..PeriodSummary::default()
    };
    for execution in &executions {
        summary.total_points += execution.points_awarded;
        *summary
            .member_points
            .entry(execution.user_id.clone())
            .or_default() += execution.points_awarded;
    }

    ArchivedPeriod {
        period: period.clone(),
        archived_at: now,
        summary,
        saved_state: Some(PeriodSnapshot {
            tasks: state.tasks.values().cloned().collect(),
            executions,
        }),
    }
}

/// Removes a period from both lists. The current period needs `force`.
pub fn delete_period(state: &mut State, period_id: &str, force: bool) -> Result<PeriodEntry> {
    let is_current = state
        .current_period
        .as_ref()
        .is_some_and(|current| current.id == period_id);
    if is_current && !force {
        return Err(Error::validation(format!(
            "period {period_id} is the active period; archive it or delete with force"
        )));
    }

    let household = state
        .current_household_mut()
        .ok_or_else(|| Error::not_found("current household"))?;

    let mut removed = None;
    if let Some(index) = household.periods.iter().position(|period| period.id == period_id) {
        removed = Some(PeriodEntry::Live(household.periods.remove(index)));
    }
    if let Some(index) = household
        .historical_periods
        .iter()
        .position(|archived| archived.period.id == period_id)
    {
        let archived = household.historical_periods.remove(index);
        removed.get_or_insert(PeriodEntry::Archive(archived));
    }
    household.periods.retain(|period| period.id != period_id);
    household
        .historical_periods
        .retain(|archived| archived.period.id != period_id);

    let removed = match removed {
        Some(entry) => entry,
        None if is_current => PeriodEntry::Live(
            state
                .current_period
                .clone()
                .ok_or_else(|| Error::not_found(format!("period {period_id}")))?,
        ),
        None => return Err(Error::not_found(format!("period {period_id}"))),
    };
    if is_current {
        state.current_period = None;
    }

    info!(period = %period_id, forced = is_current, "period deleted");
    Ok(removed)
}

/// Live and archived periods of the current household, newest first.
pub fn historical_periods(state: &State) -> Vec<PeriodEntry> {
    let Some(household) = state.current_household() else {
        return Vec::new();
    };

    let mut entries: Vec<PeriodEntry> = household
        .historical_periods
        .iter()
        .cloned()
        .map(PeriodEntry::Archive)
        .chain(household.periods.iter().cloned().map(PeriodEntry::Live))
        .collect();

    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.id().to_string()));
    entries.sort_by(|a, b| b.recorded_at().cmp(&a.recorded_at()));
    entries
}

pub fn find_period(state: &State, period_id: &str) -> Option<PeriodEntry> {
    let household = state.current_household()?;
    household
        .historical_periods
        .iter()
        .find(|archived| archived.period.id == period_id)
        .cloned()
        .map(PeriodEntry::Archive)
        .or_else(|| {
            household
                .periods
                .iter()
                .find(|period| period.id == period_id)
                .cloned()
                .map(PeriodEntry::Live)
        })
}

/// Ids of period records whose end date lies before their start date.
pub fn invalid_periods(state: &State) -> Vec<String> {
    let records = state.wgs.values().flat_map(|household| {
        household
            .periods
            .iter()
            .chain(household.historical_periods.iter().map(|archived| &archived.period))
    });
    let mut invalid: Vec<String> = state
        .current_period
        .iter()
        .chain(records)
        .filter(|period| period.end < period.start)
        .map(|period| period.id.clone())
        .collect();
    invalid.sort();
    invalid.dedup();
    invalid
}

/// Repairs period lists read from storage. Returns the number of records dropped,
/// restored or corrected.
///
/// Records ending before they start are dropped and `days` is always recomputed
/// from the date range.
pub fn normalize_periods(state: &mut State) -> usize {
    let mut repaired = 0;

    let current_invalid = state
        .current_period
        .as_ref()
        .is_some_and(|current| current.end < current.start);
    if current_invalid {
        state.current_period = None;
        repaired += 1;
    }
    if let Some(current) = state.current_period.as_mut() {
        repaired += usize::from(fix_days(current));
    }

    let current = state.current_period.clone();
    let current_wg = state.current_wg.clone();

    for (household_id, household) in state.wgs.iter_mut() {
        let before = household.historical_periods.len() + household.periods.len();
        household
            .historical_periods
            .retain(|archived| archived.period.end >= archived.period.start);
        household.periods.retain(|period| period.end >= period.start);
        repaired += before - household.historical_periods.len() - household.periods.len();

        for archived in household.historical_periods.iter_mut() {
            repaired += usize::from(fix_days(&mut archived.period));
        }
        for period in household.periods.iter_mut() {
            repaired += usize::from(fix_days(period));
        }

        let mut seen = HashSet::new();
        let before = household.historical_periods.len();
        household
            .historical_periods
            .retain(|archived| seen.insert(archived.period.id.clone()));
        repaired += before - household.historical_periods.len();

        let before = household.periods.len();
        household.periods.retain(|period| seen.insert(period.id.clone()));
        repaired += before - household.periods.len();

        if current_wg.as_deref() == Some(household_id.as_str()) {
            if let Some(current) = &current {
                household
                    .historical_periods
                    .retain(|archived| archived.period.id != current.id);
                match household.periods.iter_mut().find(|period| period.id == current.id) {
                    Some(live) => {
                        if *live != *current {
                            *live = current.clone();
                            repaired += 1;
                        }
                    }
                    None => {
                        household.periods.push(current.clone());
                        repaired += 1;
                    }
                }
            }
        }
    }

    repaired
}

fn fix_days(period: &mut PeriodRecord) -> bool {
    let days = inclusive_days(period.start, period.end);
    if period.days == days {
        return false;
    }
    period.days = days;
    true
}

fn unique_period_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodPreset {
    ThisMonth,
    NextMonth,
    FourWeeks,
    TwoWeeks,
}

impl FromStr for PeriodPreset {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "this-month" | "thisMonth" => Ok(Self::ThisMonth),
            "next-month" | "nextMonth" => Ok(Self::NextMonth),
            "four-weeks" | "4weeks" => Ok(Self::FourWeeks),
            "two-weeks" | "2weeks" => Ok(Self::TwoWeeks),
            other => Err(Error::validation(format!("unknown period preset `{other}`"))),
        }
    }
}

/// Date range for a preset relative to `today`.
pub fn preset_range(preset: PeriodPreset, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let month_start = today - Duration::days(i64::from(today.day0()));
    match preset {
        PeriodPreset::ThisMonth => {
            let next = month_start.checked_add_months(Months::new(1))?;
            Some((month_start, next - Duration::days(1)))
        }
        PeriodPreset::NextMonth => {
            let start = month_start.checked_add_months(Months::new(1))?;
            let end = month_start.checked_add_months(Months::new(2))? - Duration::days(1);
            Some((start, end))
        }
        PeriodPreset::FourWeeks => Some((today, today.checked_add_months(Months::new(1))?)),
        PeriodPreset::TwoWeeks => {
            let start = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
            Some((start, start + Duration::days(13)))
        }
    }
}
