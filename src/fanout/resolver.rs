use std::collections::HashSet;

use crate::models::user::User;
use crate::store::{DocumentStore, StoreError, UserFilter};

const DEFAULT_DISPLAY_NAME: &str = "User";

/// Who a notification targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every user with a non-null token.
    AllWithToken,
    /// Users whose `currentCity` equals `city` and whose `preference` flag is true.
    CityOptIn { city: String, preference: String },
}

impl Audience {
    pub fn city_opt_in(city: &str, preference: &str) -> Self {
        Audience::CityOptIn {
            city: city.to_string(),
            preference: preference.to_string(),
        }
    }

    fn filter(&self) -> UserFilter {
        match self {
            Audience::AllWithToken => UserFilter::with_token(),
            Audience::CityOptIn { city, preference } => {
                UserFilter::in_city(city).preference(preference)
            }
        }
    }

    /// Client-side re-check of the store predicate.
    fn admits(&self, user: &User) -> bool {
        match self {
            Audience::AllWithToken => true,
            Audience::CityOptIn { city, preference } => {
                user.current_city.as_deref() == Some(city.as_str()) && user.preference(preference)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: String,
    /// Trimmed, never empty.
    pub token: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Users returned by the store query.
    pub matched: usize,
    pub recipients: Vec<Recipient>,
    /// Eligible users dropped for lacking a usable token.
    pub skipped: usize,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.recipients.iter().map(|r| r.token.clone()).collect()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.recipients.iter().map(|r| r.user_id.clone()).collect()
    }
}

/// Resolve `audience` into deliverable recipients, never including `exclude`.
///
/// The store can only filter on `fcmToken != null`, so blank tokens are
/// dropped here.
pub async fn resolve(
    store: &dyn DocumentStore,
    audience: &Audience,
    exclude: Option<&str>,
) -> Result<Resolution, StoreError> {
    let users = store.query_users(&audience.filter()).await?;

    let mut resolution = Resolution {
        matched: users.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for user in &users {
        if exclude == Some(user.id.as_str()) || !audience.admits(user) {
            continue;
        }
        if !seen.insert(user.id.as_str()) {
            continue;
        }
        match user.usable_token() {
            Some(token) => resolution.recipients.push(Recipient {
                user_id: user.id.clone(),
                token: token.to_string(),
                display_name: user.display_name_or(DEFAULT_DISPLAY_NAME).to_string(),
            }),
            None => resolution.skipped += 1,
        }
    }

    tracing::debug!(
        matched = resolution.matched,
        recipients = resolution.recipients.len(),
        skipped = resolution.skipped,
        "resolved recipients"
    );
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::PREF_TIPS_AND_EVENTS;
    use crate::store::memory::MemoryStore;

    fn user(id: &str, token: Option<&str>, city: Option<&str>, opted_in: bool) -> User {
        let mut u = User::new(id);
        u.fcm_token = token.map(String::from);
        u.current_city = city.map(String::from);
        u.preferences.insert(PREF_TIPS_AND_EVENTS.into(), opted_in);
        u
    }

    #[tokio::test]
    async fn test_all_with_token_drops_blank_tokens() {
        let store = MemoryStore::new();
        store.insert_user(user("a", Some("  tok-a  "), None, false));
        store.insert_user(user("b", Some("   "), None, false));
        store.insert_user(user("c", None, None, false));

        let res = resolve(&store, &Audience::AllWithToken, None).await.unwrap();
        assert_eq!(res.matched, 2);
        assert_eq!(res.skipped, 1);
        assert_eq!(res.tokens(), vec!["tok-a".to_string()]);
        assert_eq!(res.recipients[0].display_name, "User");
    }

    #[tokio::test]
    async fn test_excluded_actor_never_resolved() {
        let store = MemoryStore::new();
        for id in ["creator", "x", "y"] {
            store.insert_user(user(id, Some(&format!("tok-{}", id)), Some("Lisbon"), true));
        }

        let audience = Audience::city_opt_in("Lisbon", PREF_TIPS_AND_EVENTS);
        let res = resolve(&store, &audience, Some("creator")).await.unwrap();
        assert_eq!(res.user_ids(), vec!["x".to_string(), "y".to_string()]);

        let res = resolve(&store, &Audience::AllWithToken, Some("creator")).await.unwrap();
        assert!(!res.user_ids().contains(&"creator".to_string()));
    }

    #[tokio::test]
    async fn test_city_opt_in_requires_flag() {
        let store = MemoryStore::new();
        let mut named = user("in", Some("t1"), Some("Lisbon"), true);
        named.full_name = Some("Ines".into());
        store.insert_user(named);
        store.insert_user(user("out", Some("t2"), Some("Lisbon"), false));
        store.insert_user(user("far", Some("t3"), Some("Porto"), true));

        let audience = Audience::city_opt_in("Lisbon", PREF_TIPS_AND_EVENTS);
        let res = resolve(&store, &audience, None).await.unwrap();
        assert_eq!(res.recipients.len(), 1);
        assert_eq!(res.recipients[0].display_name, "Ines");
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let store = MemoryStore::new();
        store.fail_queries(true);
        let err = resolve(&store, &Audience::AllWithToken, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
