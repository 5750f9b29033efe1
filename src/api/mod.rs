pub mod dto;
pub mod errors;
pub mod handlers;
pub mod ws;

use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use chrono::NaiveDateTime;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{
    aggregation::Aggregator,
    capture::{CaptureController, ReadingSource},
    db::ReadingStore,
    gate::{local_now, CapturePolicy, SampleGate},
    notifier::BroadcastNotifier,
};

/// Source of "now" for readings posted to the ingest endpoint.
pub type Clock = fn() -> NaiveDateTime;

/// Shared handler state. Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReadingStore>,
    pub aggregator: Arc<Aggregator>,
    pub gate: Arc<SampleGate>,
    pub capture: CaptureController,
    pub events: BroadcastNotifier,
    pub store_timeout: Duration,
    pub clock: Clock,
}

impl AppState {
    /// Wire the gate, aggregator and capture controller around one store.
    pub fn new(
        store: Arc<dyn ReadingStore>,
        events: BroadcastNotifier,
        policy: CapturePolicy,
        source: ReadingSource,
        store_timeout: Duration,
    ) -> Self {
        let gate = Arc::new(SampleGate::new(
            store.clone(),
            Arc::new(events.clone()),
            policy,
            store_timeout,
        ));
        Self {
            aggregator: Arc::new(Aggregator::new(store.clone(), store_timeout)),
            capture: CaptureController::new(gate.clone(), source),
            gate,
            store,
            events,
            store_timeout,
            clock: local_now,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/collecte/donnees", get(handlers::list_readings))
        .route("/collecte/donnees/daily-average", get(handlers::daily_average))
        .route("/collecte/donnees/weekly-average", get(handlers::weekly_average))
        .route("/collecte/donnees/monthly-average", get(handlers::monthly_average))
        .route("/collecte/donnees/daily/{date}", get(handlers::day_profile))
        .route("/collecte/donnees/latest-data", get(handlers::latest_data))
        .route("/collecte/donnees/week/{date}", get(handlers::week_readings))
        .route("/collecte/donnees/week/{date}/profile", get(handlers::week_profile))
        .route("/collecte/donnees/weekdays", get(handlers::weekday_readings))
        .route("/collecte/donnees/weekdays/average", get(handlers::weekday_average))
        .route("/collecte/donnees/monthly/{year}/{month}", get(handlers::month_average))
        .route(
            "/collecte/donnees/monthly/{year}/{month}/week/{week}",
            get(handlers::month_week_average),
        )
        .route("/collecte/donnees/yearly/{year}", get(handlers::year_average))
        .route("/collecte/donnees/last-day", get(handlers::last_day))
        .route("/collecte/donnees/ingest", post(handlers::ingest))
        .route(
            "/collecte/donnees/capture",
            get(handlers::capture_status).post(handlers::start_capture),
        )
        .route("/collecte/donnees/control-fan", post(handlers::control_fan))
        .route("/collecte/donnees/stream", get(ws::stream_readings))
        .route("/collecte/donnees/{id}", get(handlers::get_reading))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
