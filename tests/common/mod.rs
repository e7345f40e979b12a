//! Shared fixtures: a recording push provider, a fixed geocoder and a
//! `Services` builder over the in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notifyd::dedup::TriggerDedup;
use notifyd::fanout::DispatchSettings;
use notifyd::geocode::{GeocodeError, ReverseGeocoder};
use notifyd::models::user::{User, PREF_TIPS_AND_EVENTS};
use notifyd::push::{BatchResponse, PushError, PushPayload, PushProvider, SendOutcome};
use notifyd::store::memory::MemoryStore;
use notifyd::triggers::Services;
use notifyd::AppState;

pub const TRIGGER_KEY: &str = "test-trigger-key-0123456789";
pub const CALLABLE_SECRET: &str = "test-callable-secret";

/// Records every send. Tokens listed in `fail_with` are rejected with the
/// given code; `transport_down` fails whole calls.
#[derive(Default)]
pub struct RecordingPush {
    batches: Mutex<Vec<Vec<String>>>,
    singles: Mutex<Vec<(String, PushPayload)>>,
    payloads: Mutex<Vec<PushPayload>>,
    fail_with: Mutex<HashMap<String, String>>,
    transport_down: AtomicBool,
}

impl RecordingPush {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject(&self, token: &str, code: &str) {
        self.fail_with
            .lock()
            .unwrap()
            .insert(token.to_string(), code.to_string());
    }

    pub fn set_transport_down(&self, down: bool) {
        self.transport_down.store(down, Ordering::SeqCst);
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn multicast_tokens(&self) -> Vec<String> {
        self.batches.lock().unwrap().concat()
    }

    pub fn multicast_payloads(&self) -> Vec<PushPayload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn singles(&self) -> Vec<(String, PushPayload)> {
        self.singles.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushProvider for RecordingPush {
    async fn send(&self, token: &str, payload: &PushPayload) -> Result<String, PushError> {
        if self.transport_down.load(Ordering::SeqCst) {
            return Err(PushError::Transport("connection refused".into()));
        }
        self.singles
            .lock()
            .unwrap()
            .push((token.to_string(), payload.clone()));
        match self.fail_with.lock().unwrap().get(token) {
            Some(code) => Err(PushError::Rejected {
                code: code.clone(),
                message: "rejected by fake".into(),
            }),
            None => Ok(format!("projects/test/messages/{}", token)),
        }
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        payload: &PushPayload,
    ) -> Result<BatchResponse, PushError> {
        self.batches.lock().unwrap().push(tokens.to_vec());
        self.payloads.lock().unwrap().push(payload.clone());
        if self.transport_down.load(Ordering::SeqCst) {
            return Err(PushError::Transport("connection refused".into()));
        }
        let fail_with = self.fail_with.lock().unwrap();
        let responses = tokens
            .iter()
            .map(|t| match fail_with.get(t) {
                Some(code) => SendOutcome::Failed {
                    code: code.clone(),
                    message: "rejected by fake".into(),
                },
                None => SendOutcome::Sent {
                    message_id: format!("m-{}", t),
                },
            })
            .collect();
        Ok(BatchResponse { responses })
    }
}

/// Always answers with the same city.
pub struct FixedGeocoder(pub Option<String>);

#[async_trait]
impl ReverseGeocoder for FixedGeocoder {
    async fn city_for(&self, _lat: f64, _lng: f64) -> Result<Option<String>, GeocodeError> {
        Ok(self.0.clone())
    }
}

pub fn services(store: Arc<MemoryStore>, push: Arc<RecordingPush>) -> Arc<Services> {
    services_with_geocoder(store, push, Arc::new(FixedGeocoder(None)))
}

pub fn services_with_geocoder(
    store: Arc<MemoryStore>,
    push: Arc<dyn PushProvider>,
    geocoder: Arc<dyn ReverseGeocoder>,
) -> Arc<Services> {
    Arc::new(Services {
        store,
        push,
        geocoder,
        dedup: TriggerDedup::local_only(),
        dispatch: DispatchSettings::new(500, Duration::ZERO),
    })
}

pub fn app_state(services: Arc<Services>) -> Arc<AppState> {
    Arc::new(AppState {
        services,
        trigger_key: TRIGGER_KEY.to_string(),
        callable_secret: CALLABLE_SECRET.to_string(),
    })
}

pub fn user(id: &str, token: Option<&str>) -> User {
    let mut u = User::new(id);
    u.fcm_token = token.map(String::from);
    u
}

/// A user in `city` with tip/event notifications switched to `opted_in`.
pub fn resident(id: &str, city: &str, token: &str, opted_in: bool) -> User {
    let mut u = user(id, Some(token));
    u.current_city = Some(city.to_string());
    u.preferences
        .insert(PREF_TIPS_AND_EVENTS.to_string(), opted_in);
    u
}
