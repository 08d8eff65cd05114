use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{delete, get, post, put},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/state", get(handlers::get_state))
        .route("/api/wg", get(handlers::get_current_wg))
        .route("/api/wgs", post(handlers::create_household))
        .route("/api/wgs/join", post(handlers::join_household))
        .route("/api/users", post(handlers::create_user))
        .route("/api/users/:id", put(handlers::update_user))
        .route("/api/tasks", post(handlers::create_task))
        .route(
            "/api/tasks/:id",
            put(handlers::update_task).delete(handlers::deactivate_task),
        )
        .route("/api/tasks/:id/execute", post(handlers::execute_task))
        .route("/api/executions", get(handlers::list_executions))
        .route("/api/executions/:id", delete(handlers::delete_execution))
        .route("/api/ratings", post(handlers::rate_task))
        .route("/api/periods", get(handlers::list_periods))
        .route("/api/period", post(handlers::set_period))
        .route("/api/periods/:id", delete(handlers::delete_period))
        .route("/api/display-period", post(handlers::set_display_period))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/absences", post(handlers::add_absence))
        .route(
            "/api/absences/:user/:id",
            put(handlers::update_absence).delete(handlers::remove_absence),
        )
        .route("/api/residents", post(handlers::add_resident))
        .route("/api/residents/:id", delete(handlers::remove_resident))
        .route("/api/save", post(handlers::force_save))
        .route("/api/sync/reconcile", post(handlers::reconcile))
        .route("/api/export", get(handlers::export_data))
        .route("/api/import", post(handlers::import_data))
        .with_state(state)
}
