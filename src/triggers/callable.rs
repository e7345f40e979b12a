//! Authenticated "send a test broadcast" entry point.
//!
//! Creates a broadcast document, then processes it in a spawned task the
//! same way the `notifications/{id}` trigger would.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{broadcast, Services};
use crate::models::documents::Fields;
use crate::store::StoreError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestNotificationRequest {
    pub title: Option<String>,
    pub message: Option<String>,
    pub event_name: Option<String>,
    pub event_city: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestNotificationResponse {
    pub success: bool,
    pub message: String,
    pub notification_id: String,
}

/// The broadcast document for a test request made by `uid` at `now`.
pub fn test_document(req: &TestNotificationRequest, uid: &str, now: DateTime<Utc>) -> Fields {
    let or = |v: &Option<String>, default: &str| {
        Value::String(v.clone().unwrap_or_else(|| default.to_string()))
    };

    let mut doc = Fields::new();
    doc.insert("title".into(), or(&req.title, "Test Notification"));
    doc.insert(
        "message".into(),
        or(&req.message, "This is a test notification from admin panel"),
    );
    doc.insert("eventName".into(), or(&req.event_name, "Test Event"));
    doc.insert("eventCity".into(), or(&req.event_city, "Test City"));
    doc.insert("eventDate".into(), now.format("%Y-%m-%d").to_string().into());
    doc.insert("eventTime".into(), now.format("%H:%M:%S").to_string().into());
    doc.insert("type".into(), "test".into());
    doc.insert("targetAudience".into(), "all".into());
    doc.insert("isRead".into(), false.into());
    doc.insert("createdAt".into(), now.to_rfc3339().into());
    doc.insert("createdBy".into(), uid.into());
    doc
}

/// Store the test broadcast and hand it to the broadcast handler.
pub async fn create_test_notification(
    svc: Arc<Services>,
    uid: &str,
    req: &TestNotificationRequest,
) -> Result<TestNotificationResponse, StoreError> {
    let doc = test_document(req, uid, Utc::now());
    let id = svc.store.create_broadcast(doc.clone()).await?;

    let task_id = id.clone();
    tokio::spawn(async move {
        broadcast::handle(&svc, &task_id, doc).await;
    });

    Ok(TestNotificationResponse {
        success: true,
        message: "Test notification created and will be sent to all users".to_string(),
        notification_id: id,
    })
}
