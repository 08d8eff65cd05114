use crate::errors::{Error, Result};
use crate::models::{State, TemporaryResident, new_id};
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Days after its end date that a resident record is kept.
pub const RESIDENT_RETENTION_DAYS: i64 = 30;

pub const DEFAULT_RESIDENT_ICON: &str = "👤";

pub fn add_resident(
    state: &mut State,
    name: &str,
    icon: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
) -> Result<TemporaryResident> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("resident name is required"));
    }
    if start >= end {
        return Err(Error::validation("resident end date must be after the start date"));
    }

    let household = state
        .current_household()
        .ok_or_else(|| Error::not_found("current household"))?;
    let clashes_with_member = household
        .member_ids
        .iter()
        .filter_map(|id| state.users.get(id))
        .any(|user| user.name.to_lowercase() == name.to_lowercase());
    if clashes_with_member {
        return Err(Error::validation(format!("{name} is already a permanent member")));
    }

    let resident = TemporaryResident {
        id: new_id("resident"),
        name: name.to_string(),
        icon: icon.unwrap_or(DEFAULT_RESIDENT_ICON).to_string(),
        start_date: start,
        end_date: end,
        household_id: household.id.clone(),
        added_at: now,
    };
    state
        .temporary_residents
        .insert(resident.id.clone(), resident.clone());
    Ok(resident)
}

pub fn remove_resident(state: &mut State, resident_id: &str) -> Result<TemporaryResident> {
    state
        .temporary_residents
        .remove(resident_id)
        .ok_or_else(|| Error::not_found(format!("resident {resident_id}")))
}

/// Residents of `household_id` whose stay covers `date`. Always derived, never cached.
pub fn active_residents<'a>(
    state: &'a State,
    household_id: &str,
    date: NaiveDate,
) -> Vec<&'a TemporaryResident> {
    state
        .temporary_residents
        .values()
        .filter(|resident| resident.household_id == household_id && resident.is_active_on(date))
        .collect()
}

/// Every six extra people add one full share of points.
pub fn points_multiplier(active_residents: usize) -> f64 {
    1.0 + active_residents as f64 / 6.0
}

pub fn adjusted_task_points(base_points: u32, active_residents: usize) -> i64 {
    if active_residents == 0 {
        return i64::from(base_points);
    }
    (f64::from(base_points) * points_multiplier(active_residents)).round() as i64
}

/// Drops residents whose stay ended more than the retention window ago.
pub fn cleanup_expired(state: &mut State, today: NaiveDate) -> usize {
    let cutoff = today - Duration::days(RESIDENT_RETENTION_DAYS);
    let before = state.temporary_residents.len();
    state
        .temporary_residents
        .retain(|_, resident| resident.end_date >= cutoff);
    before - state.temporary_residents.len()
}
