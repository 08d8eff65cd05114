use crate::errors::{AppError, ErrorKind};
use crate::manager::ExecuteOptions;
use crate::models::{
    Absence, AbsenceRequest, CreateHouseholdRequest, CreateTaskRequest, CreateUserRequest,
    DeletePeriodQuery, DisplayPeriodRequest, Execution, ExecuteTaskRequest, Household,
    JoinHouseholdRequest, PeriodEntry, PeriodStats, RateTaskRequest, ReconcileResponse,
    ResidentRequest, SetPeriodRequest, State as AppData, StatusResponse, Task, TaskRating,
    TemporaryResident, UpdateTaskRequest, UpdateUserRequest, User,
};
use crate::periods::{CreatePeriodOptions, PeriodCreated, PeriodPreset, PreviousPeriod, preset_range};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::Value;

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.manager.lock().await.status())
}

pub async fn get_state(State(state): State<AppState>) -> Json<AppData> {
    Json(state.manager.lock().await.get_state().clone())
}

pub async fn get_current_wg(State(state): State<AppState>) -> Result<Json<Household>, AppError> {
    let manager = state.manager.lock().await;
    let household = manager
        .current_wg()
        .cloned()
        .ok_or_else(|| crate::errors::Error::not_found("current household"))?;
    Ok(Json(household))
}

pub async fn create_household(
    State(state): State<AppState>,
    Json(payload): Json<CreateHouseholdRequest>,
) -> Result<(StatusCode, Json<Household>), AppError> {
    let household = state
        .manager
        .lock()
        .await
        .create_household(&payload.name, payload.monthly_points_target)?;
    state.schedule_save();
    Ok((StatusCode::CREATED, Json(household)))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state
        .manager
        .lock()
        .await
        .create_user(&payload.name, payload.avatar.as_deref())?;
    state.schedule_save();
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn join_household(
    State(state): State<AppState>,
    Json(payload): Json<JoinHouseholdRequest>,
) -> Result<Json<Household>, AppError> {
    let household = state
        .manager
        .lock()
        .await
        .join_wg(&payload.invite_code, &payload.user_id)?;
    state.schedule_save();
    Ok(Json(household))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, AppError> {
    let user = state.manager.lock().await.update_user(&user_id, payload)?;
    state.schedule_save();
    Ok(Json(user))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let task = state.manager.lock().await.create_task(payload)?;
    state.schedule_save();
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let task = state.manager.lock().await.update_task(&task_id, payload)?;
    state.schedule_save();
    Ok(Json(task))
}

pub async fn deactivate_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = state.manager.lock().await.deactivate_task(&task_id)?;
    state.schedule_save();
    Ok(Json(task))
}

pub async fn execute_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(payload): Json<ExecuteTaskRequest>,
) -> Result<(StatusCode, Json<Execution>), AppError> {
    let options = ExecuteOptions {
        executed_at: payload.executed_at,
        notes: payload.notes,
        ignore_cooldown: payload.ignore_cooldown,
    };
    let execution = state
        .manager
        .lock()
        .await
        .execute_task_for_user(&task_id, &payload.user_id, options)?;
    state.schedule_save();
    Ok((StatusCode::CREATED, Json(execution)))
}

pub async fn delete_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Execution>, AppError> {
    let removed = state.manager.lock().await.delete_execution(&execution_id)?;
    state.schedule_save();
    Ok(Json(removed))
}

pub async fn rate_task(
    State(state): State<AppState>,
    Json(payload): Json<RateTaskRequest>,
) -> Result<Json<TaskRating>, AppError> {
    let rating = state.manager.lock().await.rate_task(payload)?;
    state.schedule_save();
    Ok(Json(rating))
}

pub async fn list_periods(State(state): State<AppState>) -> Json<Vec<PeriodEntry>> {
    Json(state.manager.lock().await.historical_periods())
}

pub async fn set_period(
    State(state): State<AppState>,
    Json(payload): Json<SetPeriodRequest>,
) -> Result<(StatusCode, Json<PeriodCreated>), AppError> {
    let (start, end) = match (payload.start, payload.end, payload.preset.as_deref()) {
        (Some(start), Some(end), _) => (start, end),
        (_, _, Some(preset)) => {
            let preset: PeriodPreset = preset.parse()?;
            preset_range(preset, Utc::now().date_naive())
                .ok_or_else(|| AppError::bad_request("preset range is out of bounds"))?
        }
        _ => return Err(AppError::bad_request("provide start and end dates or a preset")),
    };

    let options = CreatePeriodOptions {
        id: None,
        target_points: payload.target_points,
        reset_data: payload.reset_data,
        previous: if payload.keep_previous_live {
            PreviousPeriod::KeepLive
        } else {
            PreviousPeriod::Archive
        },
    };
    let created = state.manager.lock().await.create_period(start, end, options);
    Ok((StatusCode::CREATED, Json(retry_on_failure(&state, created)?)))
}

pub async fn delete_period(
    State(state): State<AppState>,
    Path(period_id): Path<String>,
    Query(query): Query<DeletePeriodQuery>,
) -> Result<Json<PeriodEntry>, AppError> {
    let removed = state
        .manager
        .lock()
        .await
        .delete_period(&period_id, query.force);
    Ok(Json(retry_on_failure(&state, removed)?))
}

pub async fn set_display_period(
    State(state): State<AppState>,
    Json(payload): Json<DisplayPeriodRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let mut manager = state.manager.lock().await;
    manager.set_display_period(payload.period_id)?;
    Ok(Json(manager.status()))
}

pub async fn list_executions(State(state): State<AppState>) -> Json<Vec<Execution>> {
    let mut executions = state.manager.lock().await.display_period_executions();
    executions.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
    Json(executions)
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<PeriodStats>, AppError> {
    let stats = state
        .manager
        .lock()
        .await
        .period_stats()
        .ok_or_else(|| crate::errors::Error::not_found("active period"))?;
    Ok(Json(stats))
}

pub async fn add_absence(
    State(state): State<AppState>,
    Json(payload): Json<AbsenceRequest>,
) -> Result<(StatusCode, Json<Absence>), AppError> {
    let absence = state.manager.lock().await.add_absence(
        &payload.user_id,
        payload.reason,
        payload.start_date,
        payload.end_date,
    )?;
    state.schedule_save();
    Ok((StatusCode::CREATED, Json(absence)))
}

pub async fn update_absence(
    State(state): State<AppState>,
    Path((user_id, absence_id)): Path<(String, String)>,
    Json(payload): Json<AbsenceRequest>,
) -> Result<Json<Absence>, AppError> {
    if payload.user_id != user_id {
        return Err(AppError::bad_request("absence user does not match the path"));
    }
    let absence = state.manager.lock().await.update_absence(
        &user_id,
        &absence_id,
        payload.reason,
        payload.start_date,
        payload.end_date,
    )?;
    state.schedule_save();
    Ok(Json(absence))
}

pub async fn remove_absence(
    State(state): State<AppState>,
    Path((user_id, absence_id)): Path<(String, String)>,
) -> Result<Json<Absence>, AppError> {
    let removed = state
        .manager
        .lock()
        .await
        .remove_absence(&user_id, &absence_id)?;
    state.schedule_save();
    Ok(Json(removed))
}

pub async fn add_resident(
    State(state): State<AppState>,
    Json(payload): Json<ResidentRequest>,
) -> Result<(StatusCode, Json<TemporaryResident>), AppError> {
    let resident = state.manager.lock().await.add_resident(
        &payload.name,
        payload.icon.as_deref(),
        payload.start_date,
        payload.end_date,
    )?;
    state.schedule_save();
    Ok((StatusCode::CREATED, Json(resident)))
}

pub async fn remove_resident(
    State(state): State<AppState>,
    Path(resident_id): Path<String>,
) -> Result<Json<TemporaryResident>, AppError> {
    let removed = state.manager.lock().await.remove_resident(&resident_id)?;
    state.schedule_save();
    Ok(Json(removed))
}

pub async fn force_save(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let mut manager = state.manager.lock().await;
    manager.force_save()?;
    Ok(Json(manager.status()))
}

pub async fn reconcile(State(state): State<AppState>) -> Json<ReconcileResponse> {
    Json(state.manager.lock().await.reconcile_from_storage())
}

pub async fn export_data(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.manager.lock().await.export_json()?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

pub async fn import_data(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<StatusResponse>, AppError> {
    let mut manager = state.manager.lock().await;
    let imported = manager.import_json(&payload.to_string());
    retry_on_failure(&state, imported)?;
    Ok(Json(manager.status()))
}

/// A change that could not be written was rolled back, but earlier pending
/// changes still need a save, so one is scheduled before the error goes out.
fn retry_on_failure<T>(state: &AppState, result: crate::errors::Result<T>) -> Result<T, AppError> {
    result.map_err(|err| {
        if err.kind() == ErrorKind::Persistence {
            state.schedule_save();
        }
        AppError::from(err)
    })
}
