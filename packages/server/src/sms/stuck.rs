use chrono::{DateTime, Duration, Utc};
use common::SmsStatus;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use tracing::{info, warn};

use crate::entity::outgoing_sms;

/// Outcome of a stale-claim sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StaleRecovery {
    /// Abandoned claims put back in the queue.
    pub rescheduled: u64,
    /// Abandoned claims that had used up every attempt.
    pub failed: u64,
}

/// Release messages stuck in `sending` because a processor died mid-send.
///
/// The claim already counted the attempt, so the counter is left alone.
pub async fn recover_stale_claims<C: ConnectionTrait>(
    conn: &C,
    now: DateTime<Utc>,
    stale_after: Duration,
    max_attempts: u32,
) -> Result<StaleRecovery, DbErr> {
    let threshold = now - stale_after;
    let max_attempts = i32::try_from(max_attempts).unwrap_or(i32::MAX);

    let failed = outgoing_sms::Entity::update_many()
        .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Failed))
        .col_expr(
            outgoing_sms::Column::NextAttemptAt,
            Expr::value(Option::<DateTime<Utc>>::None),
        )
        .col_expr(
            outgoing_sms::Column::LastErrorMessage,
            Expr::value(Some("Send abandoned: claim expired".to_string())),
        )
        .filter(outgoing_sms::Column::Status.eq(SmsStatus::Sending))
        .filter(outgoing_sms::Column::LastAttemptAt.lt(threshold))
        .filter(outgoing_sms::Column::AttemptCount.gte(max_attempts))
        .exec(conn)
        .await?
        .rows_affected;

    let rescheduled = outgoing_sms::Entity::update_many()
        .col_expr(outgoing_sms::Column::Status, Expr::value(SmsStatus::Retrying))
        .col_expr(outgoing_sms::Column::NextAttemptAt, Expr::value(Some(now)))
        .col_expr(
            outgoing_sms::Column::LastErrorMessage,
            Expr::value(Some("Send abandoned: claim expired".to_string())),
        )
        .filter(outgoing_sms::Column::Status.eq(SmsStatus::Sending))
        .filter(outgoing_sms::Column::LastAttemptAt.lt(threshold))
        .exec(conn)
        .await?
        .rows_affected;

    if failed > 0 {
        warn!(count = failed, "Abandoned sends exhausted their attempts");
    }
    if rescheduled > 0 {
        info!(count = rescheduled, "Rescheduled abandoned sends");
    }

    Ok(StaleRecovery {
        rescheduled,
        failed,
    })
}
