use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Notification type tags understood by the payload builder.
///
/// Stored records keep the raw tag string; unknown tags render as
/// [`NotificationKind::Generic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    ConnectionRequest,
    ConnectionAccepted,
    Follow,
    FollowBack,
    Like,
    Comment,
    NewTip,
    NewEvent,
    Generic,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 9] = [
        NotificationKind::ConnectionRequest,
        NotificationKind::ConnectionAccepted,
        NotificationKind::Follow,
        NotificationKind::FollowBack,
        NotificationKind::Like,
        NotificationKind::Comment,
        NotificationKind::NewTip,
        NotificationKind::NewEvent,
        NotificationKind::Generic,
    ];

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "connection_request" => Self::ConnectionRequest,
            "connection_accepted" => Self::ConnectionAccepted,
            "follow" => Self::Follow,
            "follow_back" => Self::FollowBack,
            "like" => Self::Like,
            "comment" => Self::Comment,
            "new_tip" => Self::NewTip,
            "new_event" => Self::NewEvent,
            _ => Self::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionRequest => "connection_request",
            Self::ConnectionAccepted => "connection_accepted",
            Self::Follow => "follow",
            Self::FollowBack => "follow_back",
            Self::Like => "like",
            Self::Comment => "comment",
            Self::NewTip => "new_tip",
            Self::NewEvent => "new_event",
            Self::Generic => "generic",
        }
    }
}

/// Template for a per-user notification record. The store assigns the id
/// and the creation timestamp; `isRead` always starts false.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUserNotification {
    pub kind: String,
    pub from_user_id: Option<String>,
    pub fields: Map<String, Value>,
}

impl NewUserNotification {
    pub fn new(kind: impl Into<String>, from_user_id: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            from_user_id,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn connection_request(requester_id: &str) -> Self {
        Self::new(
            NotificationKind::ConnectionRequest.as_str(),
            Some(requester_id.to_string()),
        )
        .with_field("status", "pending")
    }

    pub fn connection_accepted(accepter_id: &str) -> Self {
        Self::new(
            NotificationKind::ConnectionAccepted.as_str(),
            Some(accepter_id.to_string()),
        )
        .with_field("status", "accepted")
    }
}

/// A per-user notification record as stored under `users/{id}/notifications`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserNotification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub from_user_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Terminal delivery status written back to a broadcast document.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryStatus {
    /// Batches were dispatched. `sentAt` is stamped by the store.
    Sent {
        recipients_count: u64,
        failed_count: u64,
        total_tokens: u64,
    },
    /// Nothing to deliver (no users, no usable tokens).
    NotSent { reason: String },
    /// Processing failed. `errorAt` is stamped by the store.
    Failed { error: String },
}

/// A broadcast document together with its delivery status columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRecord {
    pub id: String,
    pub document: Map<String, Value>,
    pub notification_sent: Option<bool>,
    pub sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub recipients_count: Option<i64>,
    pub failed_count: Option<i64>,
    pub total_tokens: Option<i64>,
    pub error: Option<String>,
    pub error_at: Option<DateTime<Utc>>,
}

impl BroadcastRecord {
    pub fn new(id: impl Into<String>, document: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            document,
            notification_sent: None,
            sent_at: None,
            processed_at: None,
            recipients_count: None,
            failed_count: None,
            total_tokens: None,
            error: None,
            error_at: None,
        }
    }

    /// Apply a delivery status the way the store persists it.
    pub fn apply_status(&mut self, status: &DeliveryStatus, now: DateTime<Utc>) {
        self.processed_at = Some(now);
        match status {
            DeliveryStatus::Sent {
                recipients_count,
                failed_count,
                total_tokens,
            } => {
                self.notification_sent = Some(true);
                self.sent_at = Some(now);
                self.recipients_count = Some(*recipients_count as i64);
                self.failed_count = Some(*failed_count as i64);
                self.total_tokens = Some(*total_tokens as i64);
            }
            DeliveryStatus::NotSent { reason } => {
                self.notification_sent = Some(false);
                self.error = Some(reason.clone());
            }
            DeliveryStatus::Failed { error } => {
                self.notification_sent = Some(false);
                self.error = Some(error.clone());
                self.error_at = Some(now);
            }
        }
    }
}
