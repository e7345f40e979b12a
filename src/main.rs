use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use chrono::Utc;
use clap::Parser;
use tower::ServiceBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notifyd::config::{self, Config, PushBackend, StoreBackend};
use notifyd::dedup::TriggerDedup;
use notifyd::geocode::{GoogleGeocoder, ReverseGeocoder};
use notifyd::models::documents::Fields;
use notifyd::push::fcm::{AccessTokenSource, FcmClient, GcpTokenSource, StaticToken};
use notifyd::push::log::LogProvider;
use notifyd::push::PushProvider;
use notifyd::store::memory::MemoryStore;
use notifyd::store::postgres::PgStore;
use notifyd::store::DocumentStore;
use notifyd::triggers::{broadcast, Services};
use notifyd::{api, cli, metrics, AppState};

const DEDUP_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export is opt-in via OTEL_EXPORTER_OTLP_ENDPOINT
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "notifyd"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notifyd=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Broadcast { command }) => {
            let services = build_services(&cfg).await?;
            handle_broadcast_command(command, &services).await
        }
        Some(cli::Commands::Geocode { lat, lng }) => {
            let geocoder = GoogleGeocoder::new(&cfg.geocoding_endpoint, cfg.geocoding_api_key.clone())?;
            match geocoder.city_for(lat, lng).await? {
                Some(city) => println!("{}", city),
                None => println!("No city found for ({}, {})", lat, lng),
            }
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Create the process-wide store, push, geocoding and de-dup clients.
async fn build_services(cfg: &Config) -> anyhow::Result<Arc<Services>> {
    let store: Arc<dyn DocumentStore> = match cfg.store {
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Arc::new(db)
        }
        StoreBackend::Memory => match &cfg.memory_seed {
            Some(path) => Arc::new(MemoryStore::from_seed(path).await?),
            None => {
                tracing::warn!("Using an empty in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        },
    };

    let push: Arc<dyn PushProvider> = match cfg.push {
        PushBackend::Fcm => {
            let project_id = cfg
                .fcm_project_id
                .as_deref()
                .context("FCM_PROJECT_ID must be set when NOTIFYD_PUSH=fcm")?;
            let auth: Arc<dyn AccessTokenSource> = match &cfg.fcm_access_token {
                Some(token) => Arc::new(StaticToken::new(token.clone())),
                None => Arc::new(GcpTokenSource::discover().await?),
            };
            tracing::info!(project_id, "FCM push provider configured");
            Arc::new(FcmClient::new(&cfg.fcm_endpoint, project_id, auth)?)
        }
        PushBackend::Log => {
            tracing::warn!("NOTIFYD_PUSH=log: messages are logged, not delivered");
            Arc::new(LogProvider)
        }
    };

    let geocoder: Arc<dyn ReverseGeocoder> = Arc::new(GoogleGeocoder::new(
        &cfg.geocoding_endpoint,
        cfg.geocoding_api_key.clone(),
    )?);

    let dedup = match &cfg.redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis...");
            let client = redis::Client::open(url.as_str())?;
            let conn = redis::aio::ConnectionManager::new(client).await?;
            TriggerDedup::with_redis(conn)
        }
        None => TriggerDedup::local_only(),
    };

    Ok(Arc::new(Services {
        store,
        push,
        geocoder,
        dedup,
        dispatch: cfg.dispatch_settings(),
    }))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    metrics::init();
    let services = build_services(&cfg).await?;

    let state = Arc::new(AppState {
        services: services.clone(),
        trigger_key: cfg.trigger_key.clone(),
        callable_secret: cfg.callable_secret.clone(),
    });

    let app = api::router(state)
        // trigger documents are small
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(request_id_middleware))
                .layer(axum::middleware::from_fn(security_headers_middleware)),
        );

    spawn_dedup_sweeper(services.dedup.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("notifyd listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_dedup_sweeper(dedup: TriggerDedup) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DEDUP_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = dedup.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, remaining = dedup.local_len(), "dedup sweep");
            }
        }
    });
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_broadcast_command(
    cmd: cli::BroadcastCommands,
    services: &Arc<Services>,
) -> anyhow::Result<()> {
    match cmd {
        cli::BroadcastCommands::Send {
            title,
            message,
            event_name,
            event_city,
            created_by,
        } => {
            let mut doc = Fields::new();
            doc.insert("title".into(), title.into());
            doc.insert("message".into(), message.into());
            if let Some(name) = event_name {
                doc.insert("eventName".into(), name.into());
            }
            if let Some(city) = event_city {
                doc.insert("eventCity".into(), city.into());
            }
            doc.insert("type".into(), "general".into());
            doc.insert("targetAudience".into(), "all".into());
            doc.insert("isRead".into(), false.into());
            doc.insert("createdAt".into(), Utc::now().to_rfc3339().into());
            doc.insert("createdBy".into(), created_by.into());

            let id = services.store.create_broadcast(doc.clone()).await?;
            println!("Broadcast created: {}", id);

            let outcome = broadcast::handle(services, &id, doc).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        cli::BroadcastCommands::Status { id } => {
            let record = services
                .store
                .get_broadcast(&id)
                .await?
                .with_context(|| format!("Broadcast not found: {}", id))?;

            let fmt_time = |t: Option<chrono::DateTime<Utc>>| {
                t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into())
            };
            println!("Broadcast {}", record.id);
            println!("  Sent:        {:?}", record.notification_sent);
            println!("  Recipients:  {:?}", record.recipients_count);
            println!("  Failed:      {:?}", record.failed_count);
            println!("  Tokens:      {:?}", record.total_tokens);
            println!("  Sent at:     {}", fmt_time(record.sent_at));
            println!("  Processed:   {}", fmt_time(record.processed_at));
            if let Some(err) = record.error {
                println!("  Error:       {}", err);
            }
        }
    }
    Ok(())
}
