//! `notifications/{id}`: push to every user with a token, write the
//! delivery status back, then copy the document into the notification list
//! of every `role=user` user.

use tracing::{error, info};

use super::{Report, Services, TriggerError, TriggerOutcome};
use crate::fanout::{fan_out, resolve, Audience, DispatchSummary};
use crate::models::documents::{BroadcastDocument, Fields};
use crate::models::notification::{DeliveryStatus, NewUserNotification};
use crate::push::PushPayload;
use crate::store::UserFilter;

pub const TRIGGER: &str = "broadcast";

const RECORD_ROLE: &str = "user";

/// Document keys not copied into per-user records.
const RESERVED_KEYS: [&str; 6] = ["id", "userId", "type", "fromUserId", "isRead", "createdAt"];

enum Delivery {
    NotSent(&'static str),
    Sent {
        total_tokens: usize,
        summary: DispatchSummary,
        retired: usize,
    },
}

impl Delivery {
    fn status(&self) -> DeliveryStatus {
        match self {
            Delivery::NotSent(reason) => DeliveryStatus::NotSent {
                reason: reason.to_string(),
            },
            Delivery::Sent {
                total_tokens,
                summary,
                ..
            } => DeliveryStatus::Sent {
                recipients_count: summary.successful as u64,
                failed_count: summary.failed as u64,
                total_tokens: *total_tokens as u64,
            },
        }
    }
}

pub async fn handle(svc: &Services, id: &str, raw: Fields) -> TriggerOutcome {
    svc.guarded(TRIGGER, &[id], process(svc, id, raw)).await
}

async fn process(svc: &Services, id: &str, raw: Fields) -> Result<TriggerOutcome, TriggerError> {
    let doc = BroadcastDocument::parse(raw);
    info!(notification_id = id, title = %doc.title, kind = %doc.kind, "processing broadcast");

    let delivery = deliver(svc, id, &doc).await;
    let status = match &delivery {
        Ok(d) => d.status(),
        Err(e) => DeliveryStatus::Failed {
            error: e.to_string(),
        },
    };
    if let Err(e) = svc.store.record_delivery_status(id, &status).await {
        error!(notification_id = id, error = %e, "failed to write delivery status");
    }

    let records = match create_records(svc, id, &doc).await {
        Ok(n) => n,
        Err(e) => {
            error!(notification_id = id, error = %e, "failed to create per-user records");
            0
        }
    };

    Ok(match delivery? {
        Delivery::NotSent(reason) => TriggerOutcome::skipped(reason),
        Delivery::Sent {
            total_tokens,
            summary,
            retired,
        } => TriggerOutcome::Completed(Report {
            recipients: total_tokens,
            successful: summary.successful,
            failed: summary.failed,
            batches: summary.batches,
            records,
            retired_tokens: retired,
            ..Default::default()
        }),
    })
}

async fn deliver(
    svc: &Services,
    id: &str,
    doc: &BroadcastDocument,
) -> Result<Delivery, TriggerError> {
    let resolution = resolve(svc.store.as_ref(), &Audience::AllWithToken, None).await?;
    if resolution.matched == 0 {
        return Ok(Delivery::NotSent("No users with FCM tokens found"));
    }
    if resolution.is_empty() {
        return Ok(Delivery::NotSent("No valid FCM tokens found"));
    }

    let tokens = resolution.tokens();
    info!(
        notification_id = id,
        tokens = tokens.len(),
        skipped = resolution.skipped,
        "collected broadcast tokens"
    );

    let payload = PushPayload::broadcast(&doc.title, &doc.message, &doc.kind)
        .with_data("notificationId", id)
        .with_data("eventName", doc.event_name.as_str())
        .with_data("eventCity", doc.event_city.as_str())
        .with_data("eventDate", doc.event_date.as_str())
        .with_data("eventTime", doc.event_time.as_str())
        .with_data("targetAudience", doc.target_audience.as_str());

    let summary = svc.dispatcher().dispatch(&tokens, &payload).await;
    let retired = svc.reconcile_logged(&summary.failures).await;

    info!(
        notification_id = id,
        total_tokens = tokens.len(),
        successful = summary.successful,
        failed = summary.failed,
        batches = summary.batches,
        "broadcast sent"
    );
    Ok(Delivery::Sent {
        total_tokens: tokens.len(),
        summary,
        retired,
    })
}

async fn create_records(
    svc: &Services,
    id: &str,
    doc: &BroadcastDocument,
) -> Result<usize, TriggerError> {
    let users = svc
        .store
        .query_users(&UserFilter::with_role(RECORD_ROLE))
        .await?;
    if users.is_empty() {
        return Ok(0);
    }
    let user_ids: Vec<String> = users.into_iter().map(|u| u.id).collect();

    let mut template = NewUserNotification::new(doc.kind.as_str(), doc.created_by.clone());
    for (key, value) in &doc.raw {
        if !RESERVED_KEYS.contains(&key.as_str()) {
            template.fields.insert(key.clone(), value.clone());
        }
    }
    let template = template.with_field("notificationId", id);

    Ok(fan_out(svc.store.as_ref(), &user_ids, &template).await?)
}
