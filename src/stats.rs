use crate::absences::absence_days_in_period;
use crate::models::{
    DailyProgress, Execution, LeaderboardEntry, MemberProgress, PeriodRecord, PeriodStats, State,
    Task, TaskRating, TeamStats, TimelinePoint, User,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;

pub fn total_points<'a>(user_id: &str, executions: impl IntoIterator<Item = &'a Execution>) -> i64 {
    executions
        .into_iter()
        .filter(|execution| execution.user_id == user_id)
        .map(|execution| execution.points_awarded)
        .sum()
}

pub fn execution_count<'a>(
    user_id: &str,
    executions: impl IntoIterator<Item = &'a Execution>,
) -> usize {
    executions
        .into_iter()
        .filter(|execution| execution.user_id == user_id)
        .count()
}

/// Executions whose UTC date falls inside the period, both ends included.
///
/// Every consumer scopes executions through this function.
pub fn filter_by_period<'a>(
    executions: impl IntoIterator<Item = &'a Execution>,
    period: &PeriodRecord,
) -> Vec<&'a Execution> {
    executions
        .into_iter()
        .filter(|execution| period.contains(execution.executed_at.date_naive()))
        .collect()
}

/// Per-member points target estimated from the members' task ratings.
pub fn monthly_target_points<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    ratings: &[TaskRating],
    member_count: usize,
    period_ratio: f64,
) -> i64 {
    if member_count == 0 {
        return 0;
    }

    let mut total = 0i64;
    for task in tasks {
        let collected: Vec<&TaskRating> = ratings
            .iter()
            .filter(|rating| rating.task_id == task.id)
            .collect();
        if collected.is_empty() {
            continue;
        }

        let count = collected.len() as f64;
        let avg = |field: fn(&TaskRating) -> f64| collected.iter().copied().map(field).sum::<f64>() / count;
        let minutes = avg(|r| r.minutes);
        let pain = avg(|r| r.pain);
        let importance = avg(|r| r.importance);
        let frequency = avg(|r| r.frequency);

        let task_points = ((minutes + minutes * pain / 10.0) * importance).round();
        total += (task_points * frequency * period_ratio).round() as i64;
    }

    (total as f64 / member_count as f64).round() as i64
}

pub fn adjusted_target(base_target: i64, absence_days: i64, period_days: i64) -> i64 {
    if period_days <= 0 {
        return base_target;
    }
    let daily = base_target as f64 / period_days as f64;
    let reduction = (daily * absence_days as f64).round() as i64;
    (base_target - reduction).max(0)
}

/// Earliest time `user_id` may repeat `task`, if a cooldown applies.
pub fn next_execution_date<'a>(
    task: &Task,
    user_id: &str,
    executions: impl IntoIterator<Item = &'a Execution>,
) -> Option<DateTime<Utc>> {
    let cooldown = task.min_days_between.filter(|days| *days > 0)?;
    let last = executions
        .into_iter()
        .filter(|execution| execution.task_id == task.id && execution.user_id == user_id)
        .map(|execution| execution.executed_at)
        .max()?;
    Some(last + Duration::days(i64::from(cooldown)))
}

/// Household members, or every user when no household is selected.
pub fn members(state: &State) -> Vec<&User> {
    match state.current_household() {
        Some(household) => household
            .member_ids
            .iter()
            .filter_map(|id| state.users.get(id))
            .collect(),
        None => state.users.values().collect(),
    }
}

/// Target for one member before absence adjustment.
pub fn base_target(state: &State, period: &PeriodRecord) -> i64 {
    if let Some(target) = period.target_points {
        return i64::from(target);
    }

    let member_count = members(state).len();
    let household_tasks = state.tasks.values().filter(|task| {
        task.is_active
            && state
                .current_wg
                .as_deref()
                .is_none_or(|household| task.household_id == household)
    });
    let estimated = monthly_target_points(household_tasks, &state.ratings, member_count, period.ratio());
    if estimated > 0 {
        return estimated;
    }

    state
        .current_household()
        .map(|household| i64::from(household.settings.monthly_points_target))
        .unwrap_or(i64::from(crate::models::DEFAULT_MONTHLY_TARGET))
}

pub fn build_period_stats(state: &State, period: &PeriodRecord, executions: &[&Execution]) -> PeriodStats {
    let scoped = filter_by_period(executions.iter().copied(), period);
    let members = members(state);
    let base = base_target(state, period);
    let days: Vec<NaiveDate> = period
        .start
        .iter_days()
        .take_while(|date| *date <= period.end)
        .collect();

    let mut progress = Vec::with_capacity(members.len());
    for user in &members {
        let points = total_points(&user.id, scoped.iter().copied());
        let absence_days = state
            .absences
            .get(&user.id)
            .map(|absences| absence_days_in_period(absences, period))
            .unwrap_or(0);
        let target = if absence_days > 0 {
            adjusted_target(base, absence_days, period.days)
        } else {
            base
        };
        let achievement = if target > 0 {
            (points as f64 / target as f64 * 100.0).round() as i64
        } else {
            0
        };

        let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for execution in scoped.iter().filter(|execution| execution.user_id == user.id) {
            *per_day.entry(execution.executed_at.date_naive()).or_default() += execution.points_awarded;
        }
        let mut cumulative = 0;
        let daily_progress = days
            .iter()
            .map(|date| {
                let points = per_day.get(date).copied().unwrap_or(0);
                cumulative += points;
                DailyProgress {
                    date: date_key(*date),
                    points,
                    cumulative,
                }
            })
            .collect();

        progress.push(MemberProgress {
            user_id: user.id.clone(),
            name: user.name.clone(),
            points,
            executions: execution_count(&user.id, scoped.iter().copied()),
            base_target: base,
            absence_days,
            target,
            achievement,
            completed: points >= target,
            daily_progress,
        });
    }

    let total_points: i64 = progress.iter().map(|member| member.points).sum();
    let total_target: i64 = progress.iter().map(|member| member.target).sum();
    let completed_members = progress.iter().filter(|member| member.completed).count();
    let average_achievement = if progress.is_empty() {
        0
    } else {
        (progress.iter().map(|member| member.achievement).sum::<i64>() as f64 / progress.len() as f64)
            .round() as i64
    };

    let team = TeamStats {
        total_points,
        total_target,
        average_achievement,
        completed_members,
        pending_members: progress.len() - completed_members,
    };

    let timeline = build_timeline(&days, &scoped, &members);
    let leaderboard = build_leaderboard(&progress);

    PeriodStats {
        period: period.clone(),
        members: progress,
        team,
        timeline,
        leaderboard,
    }
}

fn build_timeline(days: &[NaiveDate], executions: &[&Execution], members: &[&User]) -> Vec<TimelinePoint> {
    let mut timeline: BTreeMap<NaiveDate, TimelinePoint> = days
        .iter()
        .map(|date| {
            let member_points = members.iter().map(|user| (user.id.clone(), 0)).collect();
            (
                *date,
                TimelinePoint {
                    date: date_key(*date),
                    total_points: 0,
                    member_points,
                },
            )
        })
        .collect();

    for execution in executions {
        if let Some(point) = timeline.get_mut(&execution.executed_at.date_naive()) {
            point.total_points += execution.points_awarded;
            *point
                .member_points
                .entry(execution.user_id.clone())
                .or_default() += execution.points_awarded;
        }
    }

    timeline.into_values().collect()
}

fn build_leaderboard(progress: &[MemberProgress]) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<&MemberProgress> = progress.iter().collect();
    ranked.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.name.cmp(&b.name)));
    ranked
        .into_iter()
        .enumerate()
        .map(|(index, member)| LeaderboardEntry {
            rank: index + 1,
            user_id: member.user_id.clone(),
            name: member.name.clone(),
            points: member.points,
            executions: member.executions,
        })
        .collect()
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
