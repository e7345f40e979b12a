use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Preference flag that opts a user into tip and event notifications.
pub const PREF_TIPS_AND_EVENTS: &str = "newTipsAndEvents";

/// A user document as read from the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Device registration token. Non-string values are treated as absent.
    #[serde(default, deserialize_with = "lenient_token")]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub current_city: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, rename = "appSettings", deserialize_with = "lenient_flags")]
    pub preferences: BTreeMap<String, bool>,
    #[serde(default)]
    pub token_invalidated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_token_error: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn preference(&self, flag: &str) -> bool {
        self.preferences.get(flag).copied().unwrap_or(false)
    }

    /// The token trimmed of whitespace, or `None` when absent or blank.
    pub fn usable_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn display_name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(fallback)
    }
}

fn lenient_token<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_flags<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(flags_from_value(value.as_ref()))
}

/// Keep only the boolean entries of an `appSettings` object.
pub fn flags_from_value(value: Option<&serde_json::Value>) -> BTreeMap<String, bool> {
    match value {
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_bool().map(|b| (k.clone(), b)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_string_token_is_dropped() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "fcmToken": 12345,
        }))
        .unwrap();
        assert_eq!(user.fcm_token, None);
    }

    #[test]
    fn test_non_bool_preferences_are_ignored() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "appSettings": { "newTipsAndEvents": true, "theme": "dark", "digest": false },
        }))
        .unwrap();
        assert!(user.preference(PREF_TIPS_AND_EVENTS));
        assert!(!user.preference("digest"));
        assert!(!user.preference("theme"));
        assert_eq!(user.preferences.len(), 2);
    }

    #[test]
    fn test_usable_token_trims_and_rejects_blank() {
        let mut user = User::new("u1");
        user.fcm_token = Some("  tok-1 \n".into());
        assert_eq!(user.usable_token(), Some("tok-1"));

        user.fcm_token = Some("   ".into());
        assert_eq!(user.usable_token(), None);
    }

    #[test]
    fn test_display_name_fallback() {
        let mut user = User::new("u1");
        assert_eq!(user.display_name_or("User"), "User");
        user.full_name = Some("Ana".into());
        assert_eq!(user.display_name_or("User"), "Ana");
    }
}
