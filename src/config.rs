use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fanout::DispatchSettings;
use crate::geocode;

pub const PLACEHOLDER_TRIGGER_KEY: &str = "CHANGE_ME_TRIGGER_KEY";
pub const PLACEHOLDER_CALLABLE_SECRET: &str = "CHANGE_ME_CALLABLE_SECRET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushBackend {
    Fcm,
    Log,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("NOTIFYD_STORE must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

impl FromStr for PushBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcm" => Ok(PushBackend::Fcm),
            "log" => Ok(PushBackend::Log),
            other => anyhow::bail!("NOTIFYD_PUSH must be 'fcm' or 'log', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub production: bool,
    pub store: StoreBackend,
    pub database_url: String,
    /// JSON array of user documents loaded into the memory store.
    pub memory_seed: Option<PathBuf>,
    /// Enables the shared Redis tier of trigger de-duplication.
    pub redis_url: Option<String>,
    pub push: PushBackend,
    pub fcm_project_id: Option<String>,
    pub fcm_endpoint: String,
    /// Static bearer token. When unset, Application Default Credentials are used.
    pub fcm_access_token: Option<String>,
    pub geocoding_api_key: Option<String>,
    pub geocoding_endpoint: String,
    pub trigger_key: String,
    pub callable_secret: String,
    /// Tokens per multicast batch, clamped to 1..=500. Default: 500.
    pub batch_size: usize,
    /// Pause between multicast batches. Default: 100 ms.
    pub batch_delay_ms: u64,
}

impl Config {
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings::new(self.batch_size, Duration::from_millis(self.batch_delay_ms))
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env_mode = std::env::var("NOTIFYD_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();
    let production = env_mode == "production";

    let store = match env_opt("NOTIFYD_STORE") {
        Some(v) => v.parse()?,
        None => StoreBackend::Postgres,
    };
    let push = match env_opt("NOTIFYD_PUSH") {
        Some(v) => v.parse()?,
        None => PushBackend::Fcm,
    };

    let trigger_key =
        env_opt("NOTIFYD_TRIGGER_KEY").unwrap_or_else(|| PLACEHOLDER_TRIGGER_KEY.into());
    let callable_secret =
        env_opt("NOTIFYD_CALLABLE_SECRET").unwrap_or_else(|| PLACEHOLDER_CALLABLE_SECRET.into());
    let fcm_project_id = env_opt("FCM_PROJECT_ID");

    if trigger_key == PLACEHOLDER_TRIGGER_KEY || callable_secret == PLACEHOLDER_CALLABLE_SECRET {
        if production {
            anyhow::bail!(
                "NOTIFYD_TRIGGER_KEY / NOTIFYD_CALLABLE_SECRET are still insecure placeholders. \
                 Set real secrets before running in production."
            );
        }
        eprintln!("⚠️  NOTIFYD_TRIGGER_KEY or NOTIFYD_CALLABLE_SECRET is not set, using insecure placeholders.");
    }
    if production && push == PushBackend::Fcm && fcm_project_id.is_none() {
        anyhow::bail!("FCM_PROJECT_ID must be set when NOTIFYD_PUSH=fcm in production");
    }

    Ok(Config {
        port: std::env::var("NOTIFYD_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        production,
        store,
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/notifyd".into()),
        memory_seed: env_opt("NOTIFYD_MEMORY_SEED").map(PathBuf::from),
        redis_url: env_opt("REDIS_URL"),
        push,
        fcm_project_id,
        fcm_endpoint: env_opt("FCM_ENDPOINT")
            .unwrap_or_else(|| "https://fcm.googleapis.com".into()),
        fcm_access_token: env_opt("FCM_ACCESS_TOKEN"),
        geocoding_api_key: env_opt("GEOCODING_API_KEY"),
        geocoding_endpoint: env_opt("GEOCODING_ENDPOINT")
            .unwrap_or_else(|| geocode::DEFAULT_ENDPOINT.into()),
        trigger_key,
        callable_secret,
        batch_size: std::env::var("NOTIFYD_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500),
        batch_delay_ms: std::env::var("NOTIFYD_BATCH_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100),
    })
}
