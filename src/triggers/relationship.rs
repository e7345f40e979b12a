//! Connection requests and accepted connections. These only create
//! per-user records; the push goes out when the record's own trigger fires.

use super::{Report, Services, TriggerError, TriggerOutcome};
use crate::fanout::fan_out;
use crate::models::documents::{ConnectionDocument, Fields};
use crate::models::notification::NewUserNotification;

pub const REQUEST_TRIGGER: &str = "connection_request";
pub const ACCEPTED_TRIGGER: &str = "connection_accepted";

/// `users/{user_id}/ReceivedConnectionRequests/{requester_id}`
pub async fn connection_request(
    svc: &Services,
    user_id: &str,
    requester_id: &str,
) -> TriggerOutcome {
    let template = NewUserNotification::connection_request(requester_id);
    svc.guarded(
        REQUEST_TRIGGER,
        &[user_id, requester_id],
        write_one(svc, user_id, template),
    )
    .await
}

/// `users/{user_id}/Connections/{connection_id}`. Only the requester's copy
/// of an accepted connection, where `userId == connection_id`, notifies
/// `connection_id` that `user_id` accepted.
pub async fn connection_established(
    svc: &Services,
    user_id: &str,
    connection_id: &str,
    raw: Fields,
) -> TriggerOutcome {
    svc.guarded(
        ACCEPTED_TRIGGER,
        &[user_id, connection_id],
        accepted(svc, user_id, connection_id, raw),
    )
    .await
}

async fn accepted(
    svc: &Services,
    user_id: &str,
    connection_id: &str,
    raw: Fields,
) -> Result<TriggerOutcome, TriggerError> {
    let doc = ConnectionDocument::parse(&raw);
    if !doc.is_accepted() {
        return Ok(TriggerOutcome::skipped("connection not accepted"));
    }
    if doc.user_id.as_deref() != Some(connection_id) {
        return Ok(TriggerOutcome::skipped(
            "accepter document, no notification needed",
        ));
    }

    let template = NewUserNotification::connection_accepted(user_id);
    write_one(svc, connection_id, template).await
}

async fn write_one(
    svc: &Services,
    recipient: &str,
    template: NewUserNotification,
) -> Result<TriggerOutcome, TriggerError> {
    let records = fan_out(svc.store.as_ref(), &[recipient.to_string()], &template).await?;
    Ok(TriggerOutcome::Completed(Report {
        records,
        ..Default::default()
    }))
}
