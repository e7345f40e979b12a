//! Provider-agnostic push payloads.
//!
//! Rendering is table-driven: every [`NotificationKind`] has one row in
//! [`KIND_TABLE`] holding its title and body templates and its delivery
//! hints. Adding a type means adding a row. Templates reference context
//! slots as `{actor}`, `{commentText}`, `{category}`, `{city}`,
//! `{tipTitle}`, `{eventType}`, `{eventName}` and `{date}`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::documents::{non_blank, text, Fields};
use crate::models::notification::NotificationKind;

pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

const COLOR_RED: &str = "#FF6B6B";
const COLOR_GREEN: &str = "#4CAF50";

/// Platform rendering hints carried alongside title/body. Every push is
/// delivered at high priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderHints {
    pub channel_id: String,
    pub icon: String,
    pub color: String,
    pub sound: String,
    pub badge: u32,
}

impl RenderHints {
    fn new(channel_id: &str, color: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            icon: "ic_launcher".to_string(),
            color: color.to_string(),
            sound: "default".to_string(),
            badge: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Actor,
    CommentText,
    Category,
    City,
    TipTitle,
    EventType,
    EventName,
    Date,
}

impl Slot {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "actor" => Slot::Actor,
            "commentText" => Slot::CommentText,
            "category" => Slot::Category,
            "city" => Slot::City,
            "tipTitle" => Slot::TipTitle,
            "eventType" => Slot::EventType,
            "eventName" => Slot::EventName,
            "date" => Slot::Date,
            _ => return None,
        })
    }
}

struct KindRow {
    kind: NotificationKind,
    title: &'static str,
    body: &'static str,
    /// Body used instead when the slot is empty.
    fallback: Option<(Slot, &'static str)>,
    channel: &'static str,
    color: &'static str,
}

static KIND_TABLE: [KindRow; 9] = [
    KindRow {
        kind: NotificationKind::ConnectionRequest,
        title: "New Connection Request",
        body: "{actor} wants to connect with you",
        fallback: None,
        channel: "connection_requests",
        color: COLOR_RED,
    },
    KindRow {
        kind: NotificationKind::ConnectionAccepted,
        title: "Connection Accepted",
        body: "{actor} accepted your connection request",
        fallback: None,
        channel: "connection_updates",
        color: COLOR_GREEN,
    },
    KindRow {
        kind: NotificationKind::Follow,
        title: "New Follower",
        body: "{actor} started following you",
        fallback: None,
        channel: "follow_notifications",
        color: COLOR_GREEN,
    },
    KindRow {
        kind: NotificationKind::FollowBack,
        title: "Followed You Back",
        body: "{actor} followed you back",
        fallback: None,
        channel: "follow_notifications",
        color: COLOR_GREEN,
    },
    KindRow {
        kind: NotificationKind::Like,
        title: "New Like",
        body: "{actor} liked your post",
        fallback: None,
        channel: "post_interactions",
        color: COLOR_RED,
    },
    KindRow {
        kind: NotificationKind::Comment,
        title: "New Comment",
        body: "{actor}: \"{commentText}\"",
        fallback: Some((Slot::CommentText, "{actor} commented on your post")),
        channel: "post_interactions",
        color: COLOR_GREEN,
    },
    KindRow {
        kind: NotificationKind::NewTip,
        title: "New {category} Tip in {city}",
        body: "{actor} shared a tip: \"{tipTitle}\"",
        fallback: None,
        channel: "tips_notifications",
        color: COLOR_GREEN,
    },
    KindRow {
        kind: NotificationKind::NewEvent,
        title: "New {eventType} Event in {city}",
        body: "{actor} created: \"{eventName}\" on {date}",
        fallback: None,
        channel: "events_notifications",
        color: COLOR_RED,
    },
    KindRow {
        kind: NotificationKind::Generic,
        title: "New Notification",
        body: "You have a new notification from {actor}",
        fallback: None,
        channel: "general",
        color: COLOR_RED,
    },
];

fn row_for(kind: NotificationKind) -> &'static KindRow {
    KIND_TABLE
        .iter()
        .find(|s| s.kind == kind)
        .unwrap_or(&KIND_TABLE[KIND_TABLE.len() - 1])
}

/// Contextual values substituted into templates.
///
/// | slot | source field | default |
/// |---|---|---|
/// | actor | `actorName` | `Someone` |
/// | commentText | `commentText` | empty |
/// | category | `category` | `Travel` |
/// | city | `city` | empty |
/// | tipTitle | `tipTitle`, then `title` | empty |
/// | eventType | `eventType` | `Local` |
/// | eventName | `eventName` | empty |
/// | date | `date`, then `eventDate` | empty |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadContext {
    pub actor: String,
    pub comment_text: String,
    pub category: String,
    pub city: String,
    pub tip_title: String,
    pub event_type: String,
    pub event_name: String,
    pub date: String,
}

impl Default for PayloadContext {
    fn default() -> Self {
        Self {
            actor: "Someone".to_string(),
            comment_text: String::new(),
            category: "Travel".to_string(),
            city: String::new(),
            tip_title: String::new(),
            event_type: "Local".to_string(),
            event_name: String::new(),
            date: String::new(),
        }
    }
}

impl PayloadContext {
    pub fn from_fields(fields: &Fields) -> Self {
        let defaults = Self::default();
        let or = |value: Option<&str>, default: String| value.map(String::from).unwrap_or(default);

        Self {
            actor: or(non_blank(fields, "actorName"), defaults.actor),
            comment_text: or(text(fields, "commentText"), defaults.comment_text),
            category: or(non_blank(fields, "category"), defaults.category),
            city: or(text(fields, "city"), defaults.city),
            tip_title: or(
                text(fields, "tipTitle").or_else(|| text(fields, "title")),
                defaults.tip_title,
            ),
            event_type: or(non_blank(fields, "eventType"), defaults.event_type),
            event_name: or(text(fields, "eventName"), defaults.event_name),
            date: or(
                text(fields, "date").or_else(|| text(fields, "eventDate")),
                defaults.date,
            ),
        }
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        if !actor.trim().is_empty() {
            self.actor = actor.to_string();
        }
        self
    }

    fn slot(&self, slot: Slot) -> &str {
        match slot {
            Slot::Actor => &self.actor,
            Slot::CommentText => &self.comment_text,
            Slot::Category => &self.category,
            Slot::City => &self.city,
            Slot::TipTitle => &self.tip_title,
            Slot::EventType => &self.event_type,
            Slot::EventName => &self.event_name,
            Slot::Date => &self.date,
        }
    }

    /// Single pass over the template; substituted values are never
    /// re-expanded. Unknown placeholders are kept verbatim.
    fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len() + 32);
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    match Slot::from_name(name) {
                        Some(slot) => out.push_str(self.slot(slot)),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// A built push message, independent of the delivery provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    pub hints: RenderHints,
}

impl PushPayload {
    /// Render the row for `tag`. Unknown tags use the default row; `data.type`
    /// always echoes `tag` as given.
    pub fn build(tag: &str, ctx: &PayloadContext) -> Self {
        let row = row_for(NotificationKind::from_tag(tag));

        let body_template = match row.fallback {
            Some((slot, fallback)) if ctx.slot(slot).trim().is_empty() => fallback,
            _ => row.body,
        };

        Self::new(
            ctx.render(row.title),
            ctx.render(body_template),
            tag,
            RenderHints::new(row.channel, row.color),
        )
    }

    /// All-users broadcast with an explicit title and message.
    pub fn broadcast(title: &str, message: &str, tag: &str) -> Self {
        Self::new(
            title.to_string(),
            message.to_string(),
            tag,
            RenderHints::new("chat_channel", COLOR_RED),
        )
    }

    fn new(title: String, body: String, tag: &str, hints: RenderHints) -> Self {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), tag.to_string());
        data.insert("clickAction".to_string(), CLICK_ACTION.to_string());
        Self {
            title,
            body,
            data,
            hints,
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(actor: &str) -> PayloadContext {
        PayloadContext::default().with_actor(actor)
    }

    #[test]
    fn test_relationship_rows() {
        let cases = [
            ("connection_request", "New Connection Request", "Ana wants to connect with you", "connection_requests"),
            ("connection_accepted", "Connection Accepted", "Ana accepted your connection request", "connection_updates"),
            ("follow", "New Follower", "Ana started following you", "follow_notifications"),
            ("follow_back", "Followed You Back", "Ana followed you back", "follow_notifications"),
            ("like", "New Like", "Ana liked your post", "post_interactions"),
        ];
        for (tag, title, body, channel) in cases {
            let p = PushPayload::build(tag, &ctx("Ana"));
            assert_eq!(p.title, title, "{}", tag);
            assert_eq!(p.body, body, "{}", tag);
            assert_eq!(p.hints.channel_id, channel, "{}", tag);
            assert_eq!(p.data["type"], tag);
            assert_eq!(p.data["clickAction"], CLICK_ACTION);
        }
    }

    #[test]
    fn test_comment_with_and_without_text() {
        let mut c = ctx("Ana");
        c.comment_text = "Nice shot".into();
        let p = PushPayload::build("comment", &c);
        assert_eq!(p.body, "Ana: \"Nice shot\"");

        c.comment_text = "   ".into();
        let p = PushPayload::build("comment", &c);
        assert_eq!(p.body, "Ana commented on your post");
        assert_eq!(p.hints.channel_id, "post_interactions");
    }

    #[test]
    fn test_unknown_tag_uses_default_row() {
        let p = PushPayload::build("birthday", &PayloadContext::default());
        assert_eq!(p.title, "New Notification");
        assert_eq!(p.body, "You have a new notification from Someone");
        assert_eq!(p.hints.channel_id, "general");
        assert_eq!(p.data["type"], "birthday");
    }

    #[test]
    fn test_tip_and_event_rows() {
        let fields = json!({
            "category": "Food",
            "city": "Lisbon",
            "title": "Try the pastel de nata",
        });
        let c = PayloadContext::from_fields(fields.as_object().unwrap()).with_actor("Rui");
        let p = PushPayload::build("new_tip", &c);
        assert_eq!(p.title, "New Food Tip in Lisbon");
        assert_eq!(p.body, "Rui shared a tip: \"Try the pastel de nata\"");
        assert_eq!(p.hints.channel_id, "tips_notifications");

        let fields = json!({ "city": "Lisbon", "eventName": "Fado Night", "date": "2025-06-01" });
        let c = PayloadContext::from_fields(fields.as_object().unwrap()).with_actor("Rui");
        let p = PushPayload::build("new_event", &c);
        assert_eq!(p.title, "New Local Event in Lisbon");
        assert_eq!(p.body, "Rui created: \"Fado Night\" on 2025-06-01");
        assert_eq!(p.hints.channel_id, "events_notifications");
    }

    #[test]
    fn test_tip_category_defaults_to_travel() {
        let fields = json!({ "city": "Porto", "category": "" });
        let c = PayloadContext::from_fields(fields.as_object().unwrap());
        assert_eq!(PushPayload::build("new_tip", &c).title, "New Travel Tip in Porto");
    }

    #[test]
    fn test_substituted_values_are_not_reexpanded() {
        let mut c = ctx("{city}");
        c.city = "Lisbon".into();
        let p = PushPayload::build("like", &c);
        assert_eq!(p.body, "{city} liked your post");
    }

    #[test]
    fn test_build_is_deterministic() {
        let fields = json!({ "actorName": "Ana", "commentText": "hi" });
        let c = PayloadContext::from_fields(fields.as_object().unwrap());
        for kind in NotificationKind::ALL {
            assert_eq!(PushPayload::build(kind.as_str(), &c), PushPayload::build(kind.as_str(), &c));
        }
    }

    #[test]
    fn test_broadcast_hints() {
        let p = PushPayload::broadcast("Hello", "World", "general").with_data("notificationId", "n1");
        assert_eq!(p.hints.channel_id, "chat_channel");
        assert_eq!(p.hints.color, "#FF6B6B");
        assert_eq!(p.data["notificationId"], "n1");
        assert_eq!(p.data["type"], "general");
    }
}
