//! Typed views over the documents that fire triggers.
//!
//! Trigger bodies arrive as free-form JSON objects. Each view is parsed once
//! at handler entry, applying the field defaults listed on the struct. Absent
//! and `null` fields take the default; fields of the wrong JSON type are
//! treated as absent.

use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

/// String value of `key`, if present and a JSON string.
pub fn text<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// Non-blank string value of `key`, trimmed.
pub fn non_blank<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    text(fields, key).map(str::trim).filter(|s| !s.is_empty())
}

fn text_or(fields: &Fields, key: &str, default: &str) -> String {
    text(fields, key).unwrap_or(default).to_string()
}

/// Numeric value of `key`; numeric strings are accepted.
pub fn number(fields: &Fields, key: &str) -> Option<f64> {
    let n = match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// `notifications/{id}` broadcast document.
///
/// | field | default |
/// |---|---|
/// | `title` | `New Notification` |
/// | `message` | `You have a new notification` |
/// | `eventName`, `eventCity`, `eventDate`, `eventTime` | empty |
/// | `type` | `general` |
/// | `targetAudience` | `all` |
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastDocument {
    pub title: String,
    pub message: String,
    pub event_name: String,
    pub event_city: String,
    pub event_date: String,
    pub event_time: String,
    pub kind: String,
    pub target_audience: String,
    pub created_by: Option<String>,
    /// The full document, copied into per-user records on fan-out.
    pub raw: Fields,
}

impl BroadcastDocument {
    pub fn parse(raw: Fields) -> Self {
        Self {
            title: text_or(&raw, "title", "New Notification"),
            message: text_or(&raw, "message", "You have a new notification"),
            event_name: text_or(&raw, "eventName", ""),
            event_city: text_or(&raw, "eventCity", ""),
            event_date: text_or(&raw, "eventDate", ""),
            event_time: text_or(&raw, "eventTime", ""),
            kind: text_or(&raw, "type", "general"),
            target_audience: text_or(&raw, "targetAudience", "all"),
            created_by: non_blank(&raw, "createdBy").map(String::from),
            raw,
        }
    }
}

/// `tips/{id}` document. When the document nests its content in a non-empty
/// `userTips` array, the first element is used.
///
/// | field | default |
/// |---|---|
/// | `latitude`, `longitude` | none (tip is skipped) |
/// | `tipCity`, then `city` | none (reverse geocoded) |
/// | `title` | empty |
/// | `category` | none (`Travel` in titles) |
/// | `createdBy` | none |
#[derive(Debug, Clone, PartialEq)]
pub struct TipDocument {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub title: String,
    pub category: Option<String>,
    pub created_by: Option<String>,
}

impl TipDocument {
    pub fn parse(raw: &Fields) -> Self {
        let tip = match raw.get("userTips") {
            Some(Value::Array(items)) => items
                .first()
                .and_then(Value::as_object)
                .unwrap_or(raw),
            _ => raw,
        };

        Self {
            latitude: number(tip, "latitude"),
            longitude: number(tip, "longitude"),
            city: non_blank(tip, "tipCity")
                .or_else(|| non_blank(tip, "city"))
                .map(String::from),
            title: text_or(tip, "title", ""),
            category: non_blank(tip, "category").map(String::from),
            created_by: non_blank(tip, "createdBy").map(String::from),
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// `events/{id}` document.
///
/// | field | default |
/// |---|---|
/// | `city` | none (event is skipped) |
/// | `eventName`, `date`, `time`, `venue` | empty |
/// | `eventType` | none (`Local` in titles) |
/// | `createdBy` | none |
#[derive(Debug, Clone, PartialEq)]
pub struct EventDocument {
    pub city: Option<String>,
    pub event_name: String,
    pub event_type: Option<String>,
    pub date: String,
    pub time: String,
    pub venue: String,
    pub created_by: Option<String>,
}

impl EventDocument {
    pub fn parse(raw: &Fields) -> Self {
        Self {
            city: non_blank(raw, "city").map(String::from),
            event_name: text_or(raw, "eventName", ""),
            event_type: non_blank(raw, "eventType").map(String::from),
            date: text_or(raw, "date", ""),
            time: text_or(raw, "time", ""),
            venue: text_or(raw, "venue", ""),
            created_by: non_blank(raw, "createdBy").map(String::from),
        }
    }
}

/// `users/{userId}/Connections/{connectionId}` document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDocument {
    pub status: Option<String>,
    pub user_id: Option<String>,
}

impl ConnectionDocument {
    pub fn parse(raw: &Fields) -> Self {
        Self {
            status: text(raw, "status").map(String::from),
            user_id: text(raw, "userId").map(String::from),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status.as_deref() == Some("accepted")
    }
}

/// `users/{userId}/notifications/{id}` document as delivered to the push
/// trigger. `type` defaults to empty, which renders with the default row.
#[derive(Debug, Clone, PartialEq)]
pub struct UserNotificationDocument {
    pub kind: String,
    pub from_user_id: Option<String>,
    pub fields: Fields,
}

impl UserNotificationDocument {
    pub fn parse(raw: Fields) -> Self {
        Self {
            kind: text_or(&raw, "type", ""),
            from_user_id: non_blank(&raw, "fromUserId").map(String::from),
            fields: raw,
        }
    }
}
