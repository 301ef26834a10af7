mod alert_layer;
mod auth;
mod handlers;
mod models;
mod notify;
mod telegram;
mod throttle;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use salon_engine::{db, EngineConfig, EventSink, Scheduler, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use throttle::{Guard, Throttle, Tier};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub scheduler: Scheduler,
    pub bot_token: String,
    pub admin_tg_id: i64,
    pub started_at: Instant,
}

/// Throttle counter cleanup interval.
const THROTTLE_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars (read before tracing so the alert layer can use them) ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:salon.db?mode=rwc".into());
    let bot_token = std::env::var("BOT_TOKEN").context("BOT_TOKEN must be set")?;
    let admin_tg_id: i64 = std::env::var("ADMIN_TG_ID")
        .context("ADMIN_TG_ID must be set")?
        .parse()
        .context("ADMIN_TG_ID must be a number")?;

    // ── Tracing: console + Telegram alerts ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if !bot_token.is_empty() {
        let alerts = alert_layer::AlertLayer::new(telegram::TelegramClient::new(&bot_token), admin_tg_id);
        registry.with(alerts).init();
    } else {
        registry.init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let webapp_url = std::env::var("WEBAPP_URL").ok();
    let config = EngineConfig::from_env();

    // ── Database ──
    let pool = db::create_pool(&database_url, 5).await?;
    db::run_migrations(&pool).await?;

    // ── Engine + event delivery ──
    let (events, event_rx) = EventSink::channel();
    let clock = Arc::new(SystemClock::new(config.utc_offset_hours));
    let scheduler = Scheduler::new(pool, clock, config.clone(), events);

    let notifier = notify::Notifier::new(
        telegram::TelegramClient::new(&bot_token),
        admin_tg_id,
        config.payment_window.num_minutes(),
    );
    tokio::spawn(notifier.run(event_rx));

    // ── Background task: expire unpaid holds ──
    tokio::spawn(scheduler.sweeper().run(scheduler.clock(), config.sweep_interval));

    // ── Background task: drop idle throttle counters ──
    let throttle = Throttle::new();
    let purge_throttle = throttle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(THROTTLE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            purge_throttle.purge(Instant::now());
        }
    });

    let state = Arc::new(AppState {
        scheduler,
        bot_token,
        admin_tg_id,
        started_at: Instant::now(),
    });

    let app = router(state, &throttle).layer(cors(webapp_url.as_deref())?);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Salon server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// CORS: whitelist WEBAPP_URL (plus the Vite dev server) when set, otherwise allow any.
fn cors(webapp_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let layer = match webapp_url {
        Some(url) => {
            let origins = vec![
                url.parse::<HeaderValue>().context("WEBAPP_URL must be a valid origin")?,
                HeaderValue::from_static("http://localhost:5173"),
            ];
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        None => CorsLayer::new().allow_origin(Any),
    };
    Ok(layer.allow_methods(Any).allow_headers(Any))
}

/// Route groups, each behind its own throttle tier (health is unthrottled).
fn router(state: Arc<AppState>, throttle: &Throttle) -> Router {
    let guard = |tier| from_fn_with_state(Guard::new(throttle, tier), throttle::throttle);

    let read_routes = Router::new()
        .route("/api/dates", get(handlers::client::available_dates))
        .route("/api/slots", get(handlers::client::available_slots))
        .layer(guard(Tier::Read));

    let booking_routes = Router::new()
        .route("/api/appointments", post(handlers::client::create_appointment))
        .layer(guard(Tier::Booking));

    let client_routes = Router::new()
        .route("/api/appointments/my", get(handlers::client::my_appointments))
        .route(
            "/api/appointments/{id}/cancellation",
            get(handlers::client::cancellation_outcome),
        )
        .route(
            "/api/appointments/{id}/cancel",
            post(handlers::client::cancel_appointment),
        )
        .layer(guard(Tier::Client));

    let admin_routes = Router::new()
        .route("/api/admin/appointments", get(handlers::admin::list_appointments))
        .route(
            "/api/admin/appointments/{id}/confirm",
            post(handlers::admin::confirm_appointment),
        )
        .route(
            "/api/admin/appointments/{id}/cancel",
            post(handlers::admin::cancel_appointment),
        )
        .route(
            "/api/admin/blackouts",
            get(handlers::admin::list_blackouts).post(handlers::admin::create_blackout),
        )
        .route("/api/admin/blackouts/{id}", delete(handlers::admin::delete_blackout))
        .layer(guard(Tier::Admin));

    Router::new()
        .route("/api/health", get(handlers::health::health))
        .merge(read_routes)
        .merge(booking_routes)
        .merge(client_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
