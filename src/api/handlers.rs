use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use utoipa::OpenApi;
use uuid::Uuid;

use super::{
    dto::{
        to_dtos, CaptureStartResponse, DaySnapshotDto, FanRequest, FanResponse, IngestResponse,
        PageParams, RangeParams, ReadingDto, ReadingPageDto, WeekReadingsDto, WeekdayPageParams,
        WeekdayParams,
    },
    errors::AppError,
    AppState,
};
use crate::{
    aggregation::{
        params::{parse_date, parse_month, parse_range, parse_week_of_month, parse_year},
        DailyAverage, DayProfile, MonthlyAverage, PeriodAverage, ProfileDay, TimeOfDayAverage,
        WeekProfile, WeekdayAverage, WeekdaySet, WeeklyAverage,
    },
    capture::{CaptureStart, CaptureStatus},
    db::{models::PageRequest, store::with_timeout},
    device::FanCommand,
    error::ValidationError,
    gate::{GateOutcome, SkipReason},
};

fn weekdays(raw: Option<&str>) -> Result<WeekdaySet, ValidationError> {
    raw.map_or_else(|| Ok(WeekdaySet::weekend()), str::parse)
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// List readings, newest first.
#[utoipa::path(
    get,
    path = "/collecte/donnees",
    params(PageParams),
    responses(
        (status = 200, description = "One page of readings with the overall count", body = ReadingPageDto),
        (status = 500, description = "Internal server error"),
        (status = 503, description = "Reading store timed out"),
    ),
    tag = "readings"
)]
pub async fn list_readings(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<ReadingPageDto>, AppError> {
    let request = PageRequest::new(params.limit, params.offset);
    let page = with_timeout(state.store_timeout, state.store.find_page(request)).await?;
    Ok(Json(ReadingPageDto::new(page, request)))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/{id}",
    params(("id" = Uuid, Path, description = "Reading ID")),
    responses(
        (status = 200, description = "The reading", body = ReadingDto),
        (status = 400, description = "Malformed ID"),
        (status = 404, description = "No such reading"),
    ),
    tag = "readings"
)]
pub async fn get_reading(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReadingDto>, AppError> {
    let id: Uuid = id
        .parse()
        .map_err(|_| ValidationError::parameter("id", id.as_str(), "not a UUID"))?;
    let reading = with_timeout(state.store_timeout, state.store.find_by_id(id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("reading {id}")))?;
    Ok(Json(reading.into()))
}

/// Feed one raw device reading through the Sample Gate.
///
/// Stored only when the server clock sits on an uncaptured capture instant.
#[utoipa::path(
    post,
    path = "/collecte/donnees/ingest",
    request_body(content = String, description = "Raw device JSON", content_type = "application/json"),
    responses(
        (status = 201, description = "Reading stored", body = IngestResponse),
        (status = 200, description = "Reading not captured", body = IngestResponse),
        (status = 400, description = "Invalid raw reading"),
        (status = 409, description = "Capture window already stored"),
        (status = 500, description = "Internal server error"),
        (status = 503, description = "Reading store timed out"),
    ),
    tag = "capture"
)]
pub async fn ingest(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    match state.gate.offer_line(&body, (state.clock)()).await {
        GateOutcome::Stored(reading) => Ok((
            StatusCode::CREATED,
            Json(IngestResponse {
                status: "stored".to_owned(),
                reason: None,
                reading: Some(reading.into()),
            }),
        )),
        GateOutcome::Skipped(reason) => {
            let reason = match reason {
                SkipReason::NotAnInstant => "not a capture instant".to_owned(),
                SkipReason::AlreadyCaptured(key) => {
                    format!("{} {} already captured", key.date, key.instant.format("%H:%M"))
                }
            };
            Ok((
                StatusCode::OK,
                Json(IngestResponse {
                    status: "skipped".to_owned(),
                    reason: Some(reason),
                    reading: None,
                }),
            ))
        }
        GateOutcome::Rejected(e) => Err(e.into()),
        GateOutcome::Failed(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/collecte/donnees/daily-average",
    params(RangeParams),
    responses(
        (status = 200, description = "Average per day, ascending", body = Vec<DailyAverage>),
        (status = 400, description = "Invalid date range"),
    ),
    tag = "aggregates"
)]
pub async fn daily_average(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<DailyAverage>>, AppError> {
    let range = parse_range(params.from.as_deref(), params.to.as_deref())?;
    Ok(Json(state.aggregator.daily_averages(range).await?))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/weekly-average",
    params(RangeParams),
    responses(
        (status = 200, description = "Average per ISO week, ascending by (year, week)", body = Vec<WeeklyAverage>),
        (status = 400, description = "Invalid date range"),
    ),
    tag = "aggregates"
)]
pub async fn weekly_average(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<WeeklyAverage>>, AppError> {
    let range = parse_range(params.from.as_deref(), params.to.as_deref())?;
    Ok(Json(state.aggregator.weekly_averages(range).await?))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/monthly-average",
    params(RangeParams),
    responses(
        (status = 200, description = "Average per month, ascending", body = Vec<MonthlyAverage>),
        (status = 400, description = "Invalid date range"),
    ),
    tag = "aggregates"
)]
pub async fn monthly_average(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<MonthlyAverage>>, AppError> {
    let range = parse_range(params.from.as_deref(), params.to.as_deref())?;
    Ok(Json(state.aggregator.monthly_averages(range).await?))
}

/// Average per capture instant over one day.
#[utoipa::path(
    get,
    path = "/collecte/donnees/daily/{date}",
    params(("date" = String, Path, description = "YYYY-MM-DD")),
    responses(
        (status = 200, description = "Average per time of day, ascending", body = DayProfile),
        (status = 400, description = "Invalid date"),
    ),
    tag = "aggregates"
)]
pub async fn day_profile(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<DayProfile>, AppError> {
    let date = parse_date("date", &date)?;
    Ok(Json(state.aggregator.day_profile(date).await?))
}

// ---------------------------------------------------------------------------
// Weeks
// ---------------------------------------------------------------------------

/// Raw readings of the Monday–Sunday week containing `date`.
#[utoipa::path(
    get,
    path = "/collecte/donnees/week/{date}",
    params(("date" = String, Path, description = "Any day of the week, YYYY-MM-DD")),
    responses(
        (status = 200, description = "Readings of the ISO week", body = WeekReadingsDto),
        (status = 400, description = "Invalid date"),
    ),
    tag = "aggregates"
)]
pub async fn week_readings(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<WeekReadingsDto>, AppError> {
    let anchor = parse_date("date", &date)?;
    Ok(Json(state.aggregator.week_of(anchor).await?.into()))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/week/{date}/profile",
    params(("date" = String, Path, description = "Any day of the week, YYYY-MM-DD")),
    responses(
        (status = 200, description = "Seven daily averages, Monday first", body = WeekProfile),
        (status = 400, description = "Invalid date"),
    ),
    tag = "aggregates"
)]
pub async fn week_profile(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<WeekProfile>, AppError> {
    let anchor = parse_date("date", &date)?;
    Ok(Json(state.aggregator.week_profile(anchor).await?))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/weekdays",
    params(WeekdayPageParams),
    responses(
        (status = 200, description = "One page of readings taken on the given days of the week, oldest first", body = ReadingPageDto),
        (status = 400, description = "Invalid days or date range"),
    ),
    tag = "aggregates"
)]
pub async fn weekday_readings(
    State(state): State<AppState>,
    Query(params): Query<WeekdayPageParams>,
) -> Result<Json<ReadingPageDto>, AppError> {
    let days = weekdays(params.days.as_deref())?;
    let range = parse_range(params.from.as_deref(), params.to.as_deref())?;
    let request = PageRequest::new(params.limit, params.offset);
    let page = state.aggregator.weekday_readings(&days, range, request).await?;
    Ok(Json(ReadingPageDto::new(page, request)))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/weekdays/average",
    params(WeekdayParams),
    responses(
        (status = 200, description = "Average per ISO day of week (1 = Monday)", body = Vec<WeekdayAverage>),
        (status = 400, description = "Invalid days or date range"),
    ),
    tag = "aggregates"
)]
pub async fn weekday_average(
    State(state): State<AppState>,
    Query(params): Query<WeekdayParams>,
) -> Result<Json<Vec<WeekdayAverage>>, AppError> {
    let days = weekdays(params.days.as_deref())?;
    let range = parse_range(params.from.as_deref(), params.to.as_deref())?;
    Ok(Json(state.aggregator.weekday_averages(&days, range).await?))
}

// ---------------------------------------------------------------------------
// Single periods
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/collecte/donnees/monthly/{year}/{month}",
    params(
        ("year"  = i32, Path, description = "Calendar year"),
        ("month" = u32, Path, description = "1-12"),
    ),
    responses(
        (status = 200, description = "Average over the month", body = PeriodAverage),
        (status = 400, description = "Invalid year or month"),
        (status = 404, description = "No data for this month"),
    ),
    tag = "aggregates"
)]
pub async fn month_average(
    State(state): State<AppState>,
    Path((year, month)): Path<(String, String)>,
) -> Result<Json<PeriodAverage>, AppError> {
    let year = parse_year(&year)?;
    let month = parse_month(&month)?;
    Ok(Json(state.aggregator.month_average(year, month).await?))
}

/// Week `week` of a month spans its days `7(week-1)+1` to `7*week`.
#[utoipa::path(
    get,
    path = "/collecte/donnees/monthly/{year}/{month}/week/{week}",
    params(
        ("year"  = i32, Path, description = "Calendar year"),
        ("month" = u32, Path, description = "1-12"),
        ("week"  = u32, Path, description = "1-5"),
    ),
    responses(
        (status = 200, description = "Average over the week of the month", body = PeriodAverage),
        (status = 400, description = "Invalid year, month or week"),
        (status = 404, description = "No data for this week"),
    ),
    tag = "aggregates"
)]
pub async fn month_week_average(
    State(state): State<AppState>,
    Path((year, month, week)): Path<(String, String, String)>,
) -> Result<Json<PeriodAverage>, AppError> {
    let year = parse_year(&year)?;
    let month = parse_month(&month)?;
    let week = parse_week_of_month(&week)?;
    Ok(Json(
        state.aggregator.month_week_average(year, month, week).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/yearly/{year}",
    params(("year" = i32, Path, description = "Calendar year")),
    responses(
        (status = 200, description = "Average over the year", body = PeriodAverage),
        (status = 400, description = "Invalid year"),
        (status = 404, description = "No data for this year"),
    ),
    tag = "aggregates"
)]
pub async fn year_average(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> Result<Json<PeriodAverage>, AppError> {
    let year = parse_year(&year)?;
    Ok(Json(state.aggregator.year_average(year).await?))
}

/// Readings of the most recent day with data, at the capture instants.
#[utoipa::path(
    get,
    path = "/collecte/donnees/last-day",
    responses(
        (status = 200, description = "Latest day snapshot", body = DaySnapshotDto),
        (status = 404, description = "No readings stored yet"),
    ),
    tag = "aggregates"
)]
pub async fn last_day(State(state): State<AppState>) -> Result<Json<DaySnapshotDto>, AppError> {
    let instants = state.gate.policy().instants();
    Ok(Json(state.aggregator.latest_day(&instants).await?.into()))
}

/// Newest reading of every capture instant, whatever day it was taken.
#[utoipa::path(
    get,
    path = "/collecte/donnees/latest-data",
    responses(
        (status = 200, description = "One reading per captured instant, earliest instant first", body = Vec<ReadingDto>),
    ),
    tag = "aggregates"
)]
pub async fn latest_data(State(state): State<AppState>) -> Result<Json<Vec<ReadingDto>>, AppError> {
    let instants = state.gate.policy().instants();
    let rows = state.aggregator.latest_per_instant(&instants).await?;
    Ok(Json(to_dtos(rows)))
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/collecte/donnees/capture",
    responses(
        (status = 202, description = "Capture started", body = CaptureStartResponse),
        (status = 200, description = "Capture already running", body = CaptureStartResponse),
        (status = 500, description = "Reading source could not be opened"),
    ),
    tag = "capture"
)]
pub async fn start_capture(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CaptureStartResponse>), AppError> {
    let (status, label) = match state.capture.start().await? {
        CaptureStart::Started => (StatusCode::ACCEPTED, "started"),
        CaptureStart::AlreadyRunning => (StatusCode::OK, "already_running"),
    };
    Ok((
        status,
        Json(CaptureStartResponse {
            status: label.to_owned(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/collecte/donnees/capture",
    responses(
        (status = 200, description = "Capture listener state", body = CaptureStatus),
    ),
    tag = "capture"
)]
pub async fn capture_status(State(state): State<AppState>) -> Json<CaptureStatus> {
    Json(state.capture.status().await)
}

/// Switch the fan on the serial device.
#[utoipa::path(
    post,
    path = "/collecte/donnees/control-fan",
    request_body = FanRequest,
    responses(
        (status = 200, description = "Command written to the device", body = FanResponse),
        (status = 400, description = "Action is not ON or OFF"),
        (status = 503, description = "No serial device connected"),
    ),
    tag = "capture"
)]
pub async fn control_fan(
    State(state): State<AppState>,
    Json(request): Json<FanRequest>,
) -> Result<Json<FanResponse>, AppError> {
    let command: FanCommand = request.action.as_deref().unwrap_or_default().parse()?;
    state.capture.set_fan(command).await?;
    Ok(Json(FanResponse {
        fan: command,
        message: format!("fan switched {command}"),
    }))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_readings,
        get_reading,
        ingest,
        daily_average,
        weekly_average,
        monthly_average,
        day_profile,
        week_readings,
        week_profile,
        weekday_readings,
        weekday_average,
        month_average,
        month_week_average,
        year_average,
        last_day,
        latest_data,
        start_capture,
        capture_status,
        control_fan,
        health
    ),
    components(schemas(
        ReadingDto,
        ReadingPageDto,
        IngestResponse,
        WeekReadingsDto,
        DaySnapshotDto,
        CaptureStartResponse,
        CaptureStatus,
        FanRequest,
        FanResponse,
        FanCommand,
        DailyAverage,
        DayProfile,
        TimeOfDayAverage,
        WeeklyAverage,
        MonthlyAverage,
        WeekdayAverage,
        WeekProfile,
        ProfileDay,
        PeriodAverage
    )),
    tags(
        (name = "readings",   description = "Stored readings"),
        (name = "aggregates", description = "Daily, weekly and monthly statistics"),
        (name = "capture",    description = "Sample Gate, Reading Source and device control"),
        (name = "system",     description = "System endpoints"),
    ),
    info(
        title = "Climate Monitor API",
        version = "0.1.0",
        description = "Temperature and humidity capture and aggregation"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
