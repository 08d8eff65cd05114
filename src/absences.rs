use crate::errors::{Error, Result};
use crate::models::{Absence, AbsenceReason, PeriodRecord, State, inclusive_days, new_id};
use chrono::{DateTime, NaiveDate, Utc};

pub fn add_absence(
    state: &mut State,
    user_id: &str,
    reason: AbsenceReason,
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Absence> {
    validate(state, user_id, start, end)?;
    let existing = state.absences.entry(user_id.to_string()).or_default();
    if let Some(conflict) = find_overlap(existing, start, end, None) {
        return Err(overlap_error(conflict));
    }

    let absence = Absence {
        id: new_id("absence"),
        reason,
        start_date: start,
        end_date: end,
        days: inclusive_days(start, end),
        created_at: now,
        updated_at: None,
    };
    existing.push(absence.clone());
    existing.sort_by_key(|absence| absence.start_date);
    Ok(absence)
}

pub fn update_absence(
    state: &mut State,
    user_id: &str,
    absence_id: &str,
    reason: AbsenceReason,
    start: NaiveDate,
    end: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Absence> {
    validate(state, user_id, start, end)?;
    let existing = state
        .absences
        .get_mut(user_id)
        .ok_or_else(|| Error::not_found(format!("absence {absence_id}")))?;
    if let Some(conflict) = find_overlap(existing, start, end, Some(absence_id)) {
        return Err(overlap_error(conflict));
    }

    let absence = existing
        .iter_mut()
        .find(|absence| absence.id == absence_id)
        .ok_or_else(|| Error::not_found(format!("absence {absence_id}")))?;
    absence.reason = reason;
    absence.start_date = start;
    absence.end_date = end;
    absence.days = inclusive_days(start, end);
    absence.updated_at = Some(now);
    let updated = absence.clone();
    existing.sort_by_key(|absence| absence.start_date);
    Ok(updated)
}

pub fn remove_absence(state: &mut State, user_id: &str, absence_id: &str) -> Result<Absence> {
    let existing = state
        .absences
        .get_mut(user_id)
        .ok_or_else(|| Error::not_found(format!("absence {absence_id}")))?;
    let index = existing
        .iter()
        .position(|absence| absence.id == absence_id)
        .ok_or_else(|| Error::not_found(format!("absence {absence_id}")))?;
    let removed = existing.remove(index);
    if existing.is_empty() {
        state.absences.remove(user_id);
    }
    Ok(removed)
}

pub fn is_absent_on(absences: &[Absence], date: NaiveDate) -> bool {
    absences
        .iter()
        .any(|absence| absence.start_date <= date && date <= absence.end_date)
}

/// Absent days that fall inside the period, each end included.
pub fn absence_days_in_period(absences: &[Absence], period: &PeriodRecord) -> i64 {
    absences
        .iter()
        .filter(|absence| period.overlaps(absence.start_date, absence.end_date))
        .map(|absence| {
            let start = absence.start_date.max(period.start);
            let end = absence.end_date.min(period.end);
            inclusive_days(start, end).max(0)
        })
        .sum()
}

fn validate(state: &State, user_id: &str, start: NaiveDate, end: NaiveDate) -> Result<()> {
    if !state.users.contains_key(user_id) {
        return Err(Error::not_found(format!("user {user_id}")));
    }
    if end < start {
        return Err(Error::validation("absence end date must not be before its start date"));
    }
    Ok(())
}

fn find_overlap<'a>(
    absences: &'a [Absence],
    start: NaiveDate,
    end: NaiveDate,
    skip: Option<&str>,
) -> Option<&'a Absence> {
    absences
        .iter()
        .filter(|absence| Some(absence.id.as_str()) != skip)
        .find(|absence| start <= absence.end_date && end >= absence.start_date)
}

fn overlap_error(conflict: &Absence) -> Error {
    Error::validation(format!(
        "absence overlaps existing absence {} to {}",
        conflict.start_date, conflict.end_date
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    fn state_with_user() -> State {
        let mut state = State::default();
        state.users.insert(
            "u1".to_string(),
            User {
                id: "u1".to_string(),
                name: "Anna".to_string(),
                avatar: "🙂".to_string(),
                total_points: 0,
                joined_at: Utc::now(),
                is_active: true,
            },
        );
        state
    }

    #[test]
    fn overlapping_absences_are_rejected() {
        let mut state = state_with_user();
        let first = add_absence(&mut state, "u1", AbsenceReason::Vacation, date(1, 10), date(1, 15), Utc::now())
            .unwrap();
        assert_eq!(first.days, 6);

        let err = add_absence(&mut state, "u1", AbsenceReason::Work, date(1, 15), date(1, 20), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        add_absence(&mut state, "u1", AbsenceReason::Work, date(1, 16), date(1, 20), Utc::now()).unwrap();
        assert_eq!(state.absences["u1"].len(), 2);
    }

    #[test]
    fn editing_ignores_the_edited_entry() {
        let mut state = state_with_user();
        let first = add_absence(&mut state, "u1", AbsenceReason::Vacation, date(1, 10), date(1, 15), Utc::now())
            .unwrap();
        add_absence(&mut state, "u1", AbsenceReason::Family, date(2, 1), date(2, 3), Utc::now()).unwrap();

        let updated = update_absence(&mut state, "u1", &first.id, AbsenceReason::Vacation, date(1, 12), date(1, 20), Utc::now())
            .unwrap();
        assert_eq!(updated.days, 9);
        assert!(updated.updated_at.is_some());

        let err = update_absence(&mut state, "u1", &first.id, AbsenceReason::Vacation, date(1, 30), date(2, 2), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn invalid_input_is_reported() {
        let mut state = state_with_user();
        let err = add_absence(&mut state, "u1", AbsenceReason::Other, date(1, 5), date(1, 4), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = add_absence(&mut state, "ghost", AbsenceReason::Other, date(1, 5), date(1, 6), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = remove_absence(&mut state, "u1", "missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn period_days_are_clipped_to_the_period() {
        let mut state = state_with_user();
        add_absence(&mut state, "u1", AbsenceReason::Vacation, date(1, 28), date(2, 4), Utc::now()).unwrap();
        add_absence(&mut state, "u1", AbsenceReason::Work, date(1, 5), date(1, 5), Utc::now()).unwrap();
        let january = PeriodRecord::new("jan", date(1, 1), date(1, 31), None, Utc::now());

        assert_eq!(absence_days_in_period(&state.absences["u1"], &january), 5);
        assert!(is_absent_on(&state.absences["u1"], date(2, 2)));
        assert!(!is_absent_on(&state.absences["u1"], date(1, 6)));
    }
}
