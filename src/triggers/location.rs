//! `tips/{id}` and `events/{id}`: notify opted-in users in the content's
//! city, excluding its creator, and record a notification for each.

use tracing::info;

use super::{Report, Services, TriggerError, TriggerOutcome};
use crate::fanout::{fan_out, resolve, Audience};
use crate::models::documents::{EventDocument, Fields, TipDocument};
use crate::models::notification::{NewUserNotification, NotificationKind};
use crate::models::user::PREF_TIPS_AND_EVENTS;
use crate::push::payload::PayloadContext;
use crate::push::PushPayload;

pub const TIP_TRIGGER: &str = "tip";
pub const EVENT_TRIGGER: &str = "event";

pub async fn handle_tip(svc: &Services, tip_id: &str, raw: Fields) -> TriggerOutcome {
    svc.guarded(TIP_TRIGGER, &[tip_id], process_tip(svc, tip_id, raw))
        .await
}

pub async fn handle_event(svc: &Services, event_id: &str, raw: Fields) -> TriggerOutcome {
    svc.guarded(EVENT_TRIGGER, &[event_id], process_event(svc, event_id, raw))
        .await
}

async fn process_tip(
    svc: &Services,
    tip_id: &str,
    raw: Fields,
) -> Result<TriggerOutcome, TriggerError> {
    let tip = TipDocument::parse(&raw);
    let Some((latitude, longitude)) = tip.coordinates() else {
        return Ok(TriggerOutcome::skipped("tip has no location coordinates"));
    };

    let city = match tip.city.clone() {
        Some(city) => city,
        None => {
            info!(tip_id, "no city on tip, reverse geocoding");
            match svc.geocoder.city_for(latitude, longitude).await? {
                Some(city) => city,
                None => return Ok(TriggerOutcome::skipped("could not determine city for tip")),
            }
        }
    };

    let creator = svc.display_name(tip.created_by.as_deref()).await;
    let category = tip.category.clone().unwrap_or_default();

    let mut ctx = PayloadContext::default().with_actor(&creator);
    if let Some(c) = &tip.category {
        ctx.category = c.clone();
    }
    ctx.city = city.clone();
    ctx.tip_title = tip.title.clone();

    let payload = PushPayload::build(NotificationKind::NewTip.as_str(), &ctx)
        .with_data("tipId", tip_id)
        .with_data("city", city.as_str())
        .with_data("category", category.as_str())
        .with_data("createdBy", tip.created_by.clone().unwrap_or_default());

    let template = NewUserNotification::new(NotificationKind::NewTip.as_str(), tip.created_by.clone())
        .with_field("tipId", tip_id)
        .with_field("city", city.as_str())
        .with_field("category", category.as_str())
        .with_field("tipTitle", tip.title.as_str())
        .with_field("creatorName", creator.as_str());

    notify_city(svc, &city, tip.created_by.as_deref(), &payload, &template).await
}

async fn process_event(
    svc: &Services,
    event_id: &str,
    raw: Fields,
) -> Result<TriggerOutcome, TriggerError> {
    let event = EventDocument::parse(&raw);
    let Some(city) = event.city.clone() else {
        return Ok(TriggerOutcome::skipped("event has no city"));
    };

    let creator = svc.display_name(event.created_by.as_deref()).await;
    let event_type = event.event_type.clone().unwrap_or_default();

    let mut ctx = PayloadContext::default().with_actor(&creator);
    if let Some(t) = &event.event_type {
        ctx.event_type = t.clone();
    }
    ctx.city = city.clone();
    ctx.event_name = event.event_name.clone();
    ctx.date = event.date.clone();

    let payload = PushPayload::build(NotificationKind::NewEvent.as_str(), &ctx)
        .with_data("eventId", event_id)
        .with_data("city", city.as_str())
        .with_data("eventType", event_type.as_str())
        .with_data("eventName", event.event_name.as_str())
        .with_data("date", event.date.as_str())
        .with_data("time", event.time.as_str())
        .with_data("venue", event.venue.as_str())
        .with_data("createdBy", event.created_by.clone().unwrap_or_default());

    let template =
        NewUserNotification::new(NotificationKind::NewEvent.as_str(), event.created_by.clone())
            .with_field("eventId", event_id)
            .with_field("city", city.as_str())
            .with_field("eventType", event_type.as_str())
            .with_field("eventName", event.event_name.as_str())
            .with_field("eventDate", event.date.as_str())
            .with_field("eventTime", event.time.as_str())
            .with_field("eventVenue", event.venue.as_str())
            .with_field("creatorName", creator.as_str());

    notify_city(svc, &city, event.created_by.as_deref(), &payload, &template).await
}

async fn notify_city(
    svc: &Services,
    city: &str,
    creator: Option<&str>,
    payload: &PushPayload,
    template: &NewUserNotification,
) -> Result<TriggerOutcome, TriggerError> {
    let audience = Audience::city_opt_in(city, PREF_TIPS_AND_EVENTS);
    let resolution = resolve(svc.store.as_ref(), &audience, creator).await?;
    if resolution.is_empty() {
        return Ok(TriggerOutcome::skipped(format!(
            "no eligible recipients in {}",
            city
        )));
    }

    let summary = svc.dispatcher().dispatch(&resolution.tokens(), payload).await;
    let retired = svc.reconcile_logged(&summary.failures).await;
    let records = fan_out(svc.store.as_ref(), &resolution.user_ids(), template).await?;

    Ok(TriggerOutcome::Completed(Report {
        city: Some(city.to_string()),
        recipients: resolution.recipients.len(),
        successful: summary.successful,
        failed: summary.failed,
        batches: summary.batches,
        records,
        retired_tokens: retired,
        message_id: None,
    }))
}
