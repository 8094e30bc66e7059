use utoipa_axum::{router::OpenApiRouter, routes};

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest("/sms", sms_routes())
}

fn sms_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::sms::get_balance))
        .routes(routes!(handlers::sms::requeue_balance_failures))
        .routes(routes!(handlers::sms::list_failures))
        .routes(routes!(handlers::sms::get_failure_stats))
        .routes(routes!(handlers::sms::retry_message))
        .routes(routes!(handlers::sms::dismiss_message))
        .routes(routes!(handlers::sms::enqueue_enrolment))
        .merge(job_routes())
}

/// Machine callers: cron and the SMS provider.
fn job_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::sms::run_enqueue))
        .routes(routes!(handlers::sms::run_process))
        .routes(routes!(handlers::sms::status_callback))
}
