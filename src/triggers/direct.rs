//! `users/{userId}/notifications/{notificationId}`: render the record and
//! push it straight to the owner's device.

use tracing::{info, warn};

use super::{Report, Services, TriggerError, TriggerOutcome};
use crate::fanout::reconcile::is_terminal;
use crate::fanout::FailureRecord;
use crate::metrics;
use crate::models::documents::{text, Fields, UserNotificationDocument};
use crate::push::payload::PayloadContext;
use crate::push::{token_suffix, PushError, PushPayload};

pub const TRIGGER: &str = "direct";

pub async fn handle(
    svc: &Services,
    user_id: &str,
    notification_id: &str,
    raw: Fields,
) -> TriggerOutcome {
    svc.guarded(
        TRIGGER,
        &[user_id, notification_id],
        process(svc, user_id, notification_id, raw),
    )
    .await
}

async fn process(
    svc: &Services,
    user_id: &str,
    notification_id: &str,
    raw: Fields,
) -> Result<TriggerOutcome, TriggerError> {
    let doc = UserNotificationDocument::parse(raw);

    let Some(user) = svc.store.get_user(user_id).await? else {
        return Ok(TriggerOutcome::skipped("user not found"));
    };
    let Some(token) = user.usable_token() else {
        return Ok(TriggerOutcome::skipped("user has no device token"));
    };

    let sender = svc.display_name(doc.from_user_id.as_deref()).await;
    let ctx = PayloadContext::from_fields(&doc.fields).with_actor(&sender);
    let payload = PushPayload::build(&doc.kind, &ctx)
        .with_data("fromUserId", doc.from_user_id.clone().unwrap_or_default())
        .with_data("postId", text(&doc.fields, "postId").unwrap_or_default())
        .with_data("notificationId", notification_id);

    match svc.push.send(token, &payload).await {
        Ok(message_id) => {
            metrics::record_direct_send(true);
            info!(
                user_id,
                kind = %doc.kind,
                token = token_suffix(token),
                "direct push sent"
            );
            Ok(TriggerOutcome::Completed(Report {
                recipients: 1,
                successful: 1,
                message_id: Some(message_id),
                ..Default::default()
            }))
        }
        Err(PushError::Rejected { code, message }) => {
            metrics::record_direct_send(false);
            warn!(user_id, code = %code, token = token_suffix(token), "direct push rejected");

            let retired = if is_terminal(&code) {
                svc.reconcile_logged(&[FailureRecord {
                    token: token.to_string(),
                    code,
                    message,
                }])
                .await
            } else {
                0
            };
            Ok(TriggerOutcome::Completed(Report {
                recipients: 1,
                failed: 1,
                retired_tokens: retired,
                ..Default::default()
            }))
        }
        Err(e) => {
            metrics::record_direct_send(false);
            Err(e.into())
        }
    }
}
