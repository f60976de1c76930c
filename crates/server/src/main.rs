// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

#![deny(
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    clippy::style,
    clippy::correctness,
    clippy::all
)]
#![allow(clippy::multiple_crate_versions)]

mod admin;
mod live;
mod rate_limit;

use admin::AdminGate;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State as AxumState};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::Parser;
use live::{LiveEvent, TallyBroadcaster};
use paceline_api::{
    AdminSecret, ApiError, CalendarManager, CodeIssuer, DEFAULT_SESSION_CODE_ALPHABET,
    DEFAULT_SESSION_CODE_LEN, ExportService, RegistrationEngine, month_bounds, qr_svg_base64,
};
use paceline_domain::{DEFAULT_MAX_RUNNER_ID_LEN, SessionCode};
use paceline_persistence::{DEFAULT_POOL_SIZE, Persistence, PersistenceError};
use rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Paceline Server - attendance registration for a running club.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Data store connection string. If not provided, uses an in-memory
    /// database.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Symmetric key for signing QR tokens. Required.
    #[arg(long, env = "SIGNING_KEY")]
    signing_key: String,

    /// Shared secret for admin endpoints. Required.
    #[arg(long, env = "ADMIN_SECRET")]
    admin_secret: String,

    /// CORS allowlist, comma-separated origins.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Registration token-bucket refill rate, in tokens per second.
    /// The default refills ten tokens per minute.
    #[arg(long, env = "RATE_LIMIT_RPS", default_value_t = 10.0 / 60.0)]
    rate_limit_rps: f64,

    /// Registration token-bucket burst capacity.
    #[arg(long, env = "RATE_LIMIT_BURST", default_value_t = 20)]
    rate_limit_burst: u32,

    /// QR token expiry, in hours.
    #[arg(long, env = "QR_TTL_HOURS", default_value_t = 24)]
    qr_ttl_hours: i64,

    /// Alphabet session codes are drawn from.
    #[arg(long, env = "SESSION_CODE_ALPHABET", default_value = DEFAULT_SESSION_CODE_ALPHABET)]
    session_code_alphabet: String,

    /// Session code length.
    #[arg(long, env = "SESSION_CODE_LEN", default_value_t = DEFAULT_SESSION_CODE_LEN)]
    session_code_len: usize,

    /// IANA time zone governing the interpretation of "today".
    #[arg(long, env = "TIME_ZONE", default_value = "UTC")]
    time_zone: String,
}

/// Application state shared across handlers.
///
/// Everything here is initialised once at startup: the store's connection
/// pool, the signing key inside the issuer, and the live event broadcaster.
/// No other shared mutable state exists.
#[derive(Clone)]
struct AppState {
    /// The persistence layer owning all durable state.
    store: Persistence,
    /// Calendar materialisation and "today" resolution.
    calendar: CalendarManager,
    /// The registration hot path.
    engine: RegistrationEngine,
    /// Session code issuance and QR token signing.
    issuer: Arc<CodeIssuer>,
    /// Admin credential gate.
    admin: Arc<AdminSecret>,
    /// Live tally broadcaster for WebSocket subscribers.
    live_events: Arc<TallyBroadcaster>,
    /// Registration token bucket.
    rate_limiter: Arc<RateLimiter>,
}

// ============================================================================
// Request / response DTOs
// ============================================================================

/// API request to set `has_run` for a date.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct ConfigureRequest {
    /// The date to configure (YYYY-MM-DD).
    date: String,
    /// Whether this date has a run.
    has_run: bool,
}

/// API response for a calendar configuration change.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigureResponse {
    /// Success indicator.
    success: bool,
    /// The configured date (YYYY-MM-DD).
    date: String,
    /// Whether the date now has a run.
    has_run: bool,
    /// The run's session code, present when the date has an active run.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_code: Option<String>,
}

/// Query parameters for the monthly calendar overview.
#[derive(Debug, Deserialize)]
struct CalendarQuery {
    /// The month to list (YYYY-MM).
    month: String,
}

/// One day in the monthly overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalendarDayPayload {
    /// The date (YYYY-MM-DD).
    date: String,
    /// Whether the date is marked as a run day.
    has_run: bool,
    /// The run's tally, when an active run exists.
    attendance_count: Option<i64>,
    /// The run's session code, when an active run exists.
    session_code: Option<String>,
}

/// API response for the monthly overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalendarResponse {
    /// The days carrying calendar configuration in the month.
    data: Vec<CalendarDayPayload>,
}

/// API response for today's calendar status.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalendarTodayResponse {
    /// Whether today is a run day.
    has_run: bool,
    /// Today's session code, when a run is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_code: Option<String>,
    /// Today's tally; zero when there is no run.
    attendance_count: i64,
}

/// API request to register attendance.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct RegisterRequest {
    /// A session code or signed QR token.
    session_id: String,
    /// The runner's self-asserted identifier.
    runner_name: String,
    /// Client-side timestamp; recorded in logs only. Registration time is
    /// always server time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// API response for a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegisterResponse {
    /// Success indicator.
    success: bool,
    /// The post-commit tally for the run.
    current_count: i64,
    /// The runner identifier as registered (after trimming).
    runner_name: String,
    /// Human-facing confirmation message.
    message: String,
}

/// API response for today's attendance count.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttendanceTodayResponse {
    /// Today's tally; zero when there is no run.
    count: i64,
    /// Whether today is a run day.
    has_run_today: bool,
    /// Today's session code, when a run is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// Query parameters for the attendance history page.
#[derive(Debug, Deserialize)]
struct HistoryQuery {
    /// Start of the date window (YYYY-MM-DD), inclusive.
    start_date: Option<String>,
    /// End of the date window (YYYY-MM-DD), inclusive.
    end_date: Option<String>,
    /// Page number (1-based). Values below 1 are clamped to 1.
    page: Option<i64>,
    /// Page size. Values outside 1..=1000 fall back to 50.
    page_size: Option<i64>,
}

/// One row of the attendance history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryEntry {
    /// Attendance identifier.
    id: i64,
    /// The runner identifier as registered.
    runner_name: String,
    /// Registration timestamp (ISO 8601, UTC).
    registered_at: String,
    /// The run's date (YYYY-MM-DD).
    run_date: String,
    /// The run's session code.
    session_id: String,
}

/// API response for the attendance history page.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryResponse {
    /// The requested page of rows.
    data: Vec<HistoryEntry>,
    /// Total rows matching the window.
    total_count: i64,
    /// The served page number.
    page: i64,
    /// The served page size.
    page_size: i64,
    /// Total number of pages.
    total_pages: i64,
}

/// Query parameters for the CSV export.
#[derive(Debug, Deserialize)]
struct ExportQuery {
    /// Start of the date window (YYYY-MM-DD), inclusive.
    start_date: Option<String>,
    /// End of the date window (YYYY-MM-DD), inclusive.
    end_date: Option<String>,
}

/// API response carrying a QR image.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QrResponse {
    /// Base64-encoded SVG document.
    qr_code: String,
    /// The session code the image encodes a token for.
    session_id: String,
}

/// API response for QR token validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QrValidateResponse {
    /// Whether the token verified and is unexpired.
    valid: bool,
    /// The recovered session code, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// API response for the liveness endpoint.
#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    /// Always "ok" while the process serves requests.
    status: &'static str,
}

/// Error response shape shared by every endpoint.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Always false.
    success: bool,
    /// The error kind identifier.
    error: &'static str,
    /// Human-readable description.
    message: String,
    /// The unchanged tally, present on `AlreadyRegistered`.
    #[serde(skip_serializing_if = "Option::is_none")]
    current_count: Option<i64>,
    /// Correlation id for internal errors, also written to the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

/// HTTP error wrapper that maps [`ApiError`] kinds onto statuses.
struct HttpError(ApiError);

impl From<ApiError> for HttpError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<PersistenceError> for HttpError {
    fn from(err: PersistenceError) -> Self {
        Self(ApiError::from(err))
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status: StatusCode = match &self.0 {
            ApiError::Malformed { .. } | ApiError::Invalid { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadSession => StatusCode::NOT_FOUND,
            ApiError::AlreadyRegistered { .. } => StatusCode::CONFLICT,
            ApiError::SessionClosed => StatusCode::GONE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Retryable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let current_count: Option<i64> = match &self.0 {
            ApiError::AlreadyRegistered { current_count } => Some(*current_count),
            _ => None,
        };

        let correlation_id: Option<String> = if matches!(&self.0, ApiError::Internal { .. }) {
            let id: String = uuid::Uuid::new_v4().to_string();
            error!(correlation_id = %id, error = %self.0, "Internal error");
            Some(id)
        } else {
            None
        };

        let body: Json<ErrorBody> = Json(ErrorBody {
            success: false,
            error: self.0.kind(),
            message: self.0.to_string(),
            current_count,
            correlation_id,
        });
        (status, body).into_response()
    }
}

fn malformed(err: &JsonRejection) -> HttpError {
    HttpError(ApiError::Malformed {
        message: err.to_string(),
    })
}

/// Parses a `YYYY-MM-DD` request parameter.
fn parse_date(raw: &str) -> Result<NaiveDate, HttpError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        HttpError(ApiError::Malformed {
            message: format!("'{raw}' is not a valid date (expected YYYY-MM-DD): {e}"),
        })
    })
}

/// Lower bound used when a history window has no explicit start.
fn history_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Upper bound used when a history window has no explicit end.
fn history_ceiling() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or_default()
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for POST `/api/calendar/configure`.
///
/// Admin-gated. Marks a date as a run day (materialising a run with a fresh
/// session code, or reactivating the date's existing run) or unmarks it
/// (deactivating the run and broadcasting a close to subscribers).
async fn handle_configure(
    AxumState(state): AxumState<AppState>,
    _gate: AdminGate,
    payload: Result<Json<ConfigureRequest>, JsonRejection>,
) -> Result<Json<ConfigureResponse>, HttpError> {
    let Json(req) = payload.map_err(|e| malformed(&e))?;
    let date: NaiveDate = parse_date(&req.date)?;

    info!(date = %req.date, has_run = req.has_run, "Handling configure request");

    let run = state
        .calendar
        .configure(&state.store, &state.issuer, date, req.has_run)?;

    if !req.has_run
        && let Some(run) = &run
    {
        state
            .live_events
            .broadcast(&LiveEvent::SessionClosed { run_id: run.id });
    }

    Ok(Json(ConfigureResponse {
        success: true,
        date: date.format("%Y-%m-%d").to_string(),
        has_run: req.has_run,
        session_code: run
            .filter(|r| r.is_active)
            .map(|r| r.session_code.value().to_string()),
    }))
}

/// Handler for GET `/api/calendar`.
///
/// Monthly overview: every configured day in the month, joined with its
/// run's session code and tally.
async fn handle_calendar(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<CalendarResponse>, HttpError> {
    let (year_s, month_s) = query.month.split_once('-').ok_or_else(|| {
        HttpError(ApiError::Malformed {
            message: format!("'{}' is not a valid month (expected YYYY-MM)", query.month),
        })
    })?;
    let year: i32 = year_s.parse().map_err(|_| {
        HttpError(ApiError::Malformed {
            message: format!("'{year_s}' is not a valid year"),
        })
    })?;
    let month: u32 = month_s.parse().map_err(|_| {
        HttpError(ApiError::Malformed {
            message: format!("'{month_s}' is not a valid month number"),
        })
    })?;

    let (start, end) = month_bounds(year, month)?;
    let days = state.calendar.days(&state.store, start, end)?;

    Ok(Json(CalendarResponse {
        data: days
            .into_iter()
            .map(|d| CalendarDayPayload {
                date: d.day.date.format("%Y-%m-%d").to_string(),
                has_run: d.day.has_run,
                attendance_count: d.attendance_count,
                session_code: d.session_code,
            })
            .collect(),
    }))
}

/// Handler for GET `/api/calendar/today`.
async fn handle_calendar_today(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<CalendarTodayResponse>, HttpError> {
    let status = state.calendar.today(&state.store)?;
    Ok(Json(CalendarTodayResponse {
        has_run: status.has_run,
        session_code: status
            .run
            .as_ref()
            .map(|r| r.session_code.value().to_string()),
        attendance_count: status.count,
    }))
}

/// Handler for POST `/api/register`.
///
/// The hot path. Rate limited per remote address before this handler runs.
/// The tally update is broadcast strictly after the store transaction has
/// committed; a publish failure degrades freshness, never correctness.
async fn handle_register(
    AxumState(state): AxumState<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, HttpError> {
    let Json(req) = payload.map_err(|e| malformed(&e))?;

    info!(
        session_id = %req.session_id,
        runner_name = %req.runner_name,
        client_ts = ?req.timestamp,
        "Handling register request"
    );

    let registered = state
        .engine
        .register(&state.store, &state.issuer, &req.session_id, &req.runner_name)?;

    state.live_events.broadcast(&LiveEvent::TallyUpdate {
        run_id: registered.run_id,
        count: registered.count,
    });
    state.live_events.broadcast(&LiveEvent::RegistrationSuccess {
        run_id: registered.run_id,
        count: registered.count,
        runner_name: registered.runner.value().to_string(),
    });

    Ok(Json(RegisterResponse {
        success: true,
        current_count: registered.count,
        runner_name: registered.runner.value().to_string(),
        message: registered.message,
    }))
}

/// Handler for GET `/api/attendance/today`.
async fn handle_attendance_today(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<AttendanceTodayResponse>, HttpError> {
    let status = state.calendar.today(&state.store)?;
    Ok(Json(AttendanceTodayResponse {
        count: status.count,
        has_run_today: status.has_run,
        session_id: status
            .run
            .as_ref()
            .map(|r| r.session_code.value().to_string()),
    }))
}

/// Handler for GET `/api/attendance/history`.
async fn handle_history(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, HttpError> {
    let start: NaiveDate = query
        .start_date
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(history_floor);
    let end: NaiveDate = query
        .end_date
        .as_deref()
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(history_ceiling);

    let page: i64 = query.page.unwrap_or(1).max(1);
    let page_size: i64 = match query.page_size {
        Some(size) if (1..=1000).contains(&size) => size,
        _ => 50,
    };
    let offset: i64 = (page - 1) * page_size;

    let (rows, total_count) = state.store.history(start, end, page_size, offset)?;
    let total_pages: i64 = if total_count == 0 {
        0
    } else {
        (total_count + page_size - 1) / page_size
    };

    Ok(Json(HistoryResponse {
        data: rows
            .into_iter()
            .map(|r| HistoryEntry {
                id: r.id,
                runner_name: r.runner_id,
                registered_at: r.registered_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                run_date: r.run_date.format("%Y-%m-%d").to_string(),
                session_id: r.session_code,
            })
            .collect(),
        total_count,
        page,
        page_size,
        total_pages,
    }))
}

/// Adapts the export's blocking CSV writer to a channel of body chunks.
///
/// `blocking_send` provides backpressure: when the client reads slowly the
/// export thread waits instead of buffering the whole file.
struct ChannelWriter {
    tx: tokio::sync::mpsc::Sender<Vec<u8>>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx.blocking_send(buf.to_vec()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "export consumer dropped")
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Streams CSV chunks out of the export channel as a response body.
struct CsvChunkStream {
    rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
}

impl futures::Stream for CsvChunkStream {
    type Item = Result<Vec<u8>, std::io::Error>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}

/// Handler for GET `/api/attendance/export`.
///
/// Streams the CSV out of the store in bounded batches; memory stays flat
/// regardless of the requested window.
async fn handle_export(
    AxumState(state): AxumState<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, HttpError> {
    let start_opt: Option<NaiveDate> = query.start_date.as_deref().map(parse_date).transpose()?;
    let end_opt: Option<NaiveDate> = query.end_date.as_deref().map(parse_date).transpose()?;
    let start: NaiveDate = start_opt.unwrap_or_else(history_floor);
    let end: NaiveDate = end_opt.unwrap_or_else(history_ceiling);

    let filename: String =
        ExportService::export_filename(start_opt, end_opt, state.calendar.today_date());

    let (tx, rx) = tokio::sync::mpsc::channel::<Vec<u8>>(8);
    let store: Persistence = state.store.clone();
    tokio::task::spawn_blocking(move || {
        let writer: ChannelWriter = ChannelWriter { tx };
        if let Err(e) = ExportService::export_csv(&store, start, end, writer) {
            // The response is already streaming; the client sees a
            // truncated body and the failure lands in the log.
            error!(error = %e, "CSV export failed mid-stream");
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(CsvChunkStream { rx }))
        .map_err(|e| {
            HttpError(ApiError::Internal {
                message: format!("failed to build export response: {e}"),
            })
        })
}

/// Handler for GET `/api/qr/{session_code}`.
///
/// Mints a fresh signed token for the run and renders it as a QR image.
async fn handle_qr(
    AxumState(state): AxumState<AppState>,
    Path(session_code): Path<String>,
) -> Result<Json<QrResponse>, HttpError> {
    let code: SessionCode = session_code
        .parse()
        .map_err(|_| HttpError(ApiError::BadSession))?;
    let run = state
        .store
        .run_by_code(&code)?
        .filter(|r| r.is_active)
        .ok_or(HttpError(ApiError::BadSession))?;

    let token: String = state.issuer.mint_qr_token(&run.session_code);
    let qr_code: String = qr_svg_base64(&token)?;

    Ok(Json(QrResponse {
        qr_code,
        session_id: run.session_code.value().to_string(),
    }))
}

/// Handler for GET `/api/qr/validate/{token}`.
///
/// Resolves a scanned token back to its session code. Invalid and expired
/// tokens answer `valid: false` with status 200; the scanner treats both
/// the same way.
async fn handle_qr_validate(
    AxumState(state): AxumState<AppState>,
    Path(token): Path<String>,
) -> Json<QrValidateResponse> {
    match state.issuer.verify_qr_token(&token) {
        Ok(code) => Json(QrValidateResponse {
            valid: true,
            session_id: Some(code.value().to_string()),
        }),
        Err(reason) => {
            info!(%reason, "Rejected QR token");
            Json(QrValidateResponse {
                valid: false,
                session_id: None,
            })
        }
    }
}

/// Handler for GET `/health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ============================================================================
// Router & startup
// ============================================================================

/// Builds the CORS layer from the configured origin allowlist.
///
/// With an empty allowlist no cross-origin requests are admitted.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Builds the application router with all endpoints.
fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        // Admin surface
        .route("/api/calendar/configure", post(handle_configure))
        // Public read endpoints
        .route("/api/calendar", get(handle_calendar))
        .route("/api/calendar/today", get(handle_calendar_today))
        .route("/api/attendance/today", get(handle_attendance_today))
        .route("/api/attendance/history", get(handle_history))
        .route("/api/attendance/export", get(handle_export))
        .route("/api/qr/{session_code}", get(handle_qr))
        .route("/api/qr/validate/{token}", get(handle_qr_validate))
        // Registration, behind the token bucket
        .route(
            "/api/register",
            post(handle_register).layer(axum::middleware::from_fn_with_state(
                state.clone(),
                rate_limit::registration_rate_limit,
            )),
        )
        // Subscriber transport
        .route("/events", get(live::live_events_handler))
        .route("/health", get(handle_health))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Initializing Paceline Server");

    let tz: Tz = args
        .time_zone
        .parse()
        .map_err(|e| format!("invalid TIME_ZONE '{}': {e}", args.time_zone))?;

    let store: Persistence = if let Some(url) = &args.database_url {
        info!(database_url = %url, "Using configured database");
        Persistence::from_database_url(url, DEFAULT_POOL_SIZE)?
    } else {
        info!("Using in-memory database");
        Persistence::new_in_memory()?
    };

    let issuer: CodeIssuer = CodeIssuer::new(
        &args.signing_key,
        &args.session_code_alphabet,
        args.session_code_len,
        chrono::Duration::hours(args.qr_ttl_hours),
    )?;

    let state: AppState = AppState {
        store,
        calendar: CalendarManager::new(tz),
        engine: RegistrationEngine::new(tz, DEFAULT_MAX_RUNNER_ID_LEN),
        issuer: Arc::new(issuer),
        admin: Arc::new(AdminSecret::new(&args.admin_secret)),
        live_events: Arc::new(TallyBroadcaster::new()),
        rate_limiter: Arc::new(RateLimiter::new(args.rate_limit_rps, args.rate_limit_burst)),
    };

    let app: Router = build_router(state, &args.allowed_origins);

    let addr: SocketAddr = args.listen_addr.parse()?;
    info!(%addr, time_zone = %tz, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const TEST_ADMIN_SECRET: &str = "test-admin-secret";

    fn create_test_app_state() -> AppState {
        // Effectively unlimited bucket so only the dedicated test exercises it.
        create_test_app_state_with_limiter(RateLimiter::new(1_000.0, 1_000))
    }

    fn create_test_app_state_with_limiter(limiter: RateLimiter) -> AppState {
        let store: Persistence = Persistence::new_in_memory().expect("in-memory store");
        let issuer: CodeIssuer = CodeIssuer::new(
            "test-signing-key",
            DEFAULT_SESSION_CODE_ALPHABET,
            DEFAULT_SESSION_CODE_LEN,
            chrono::Duration::hours(24),
        )
        .expect("issuer");
        AppState {
            store,
            calendar: CalendarManager::new(Tz::UTC),
            engine: RegistrationEngine::new(Tz::UTC, DEFAULT_MAX_RUNNER_ID_LEN),
            issuer: Arc::new(issuer),
            admin: Arc::new(AdminSecret::new(TEST_ADMIN_SECRET)),
            live_events: Arc::new(TallyBroadcaster::new()),
            rate_limiter: Arc::new(limiter),
        }
    }

    fn test_router(state: &AppState) -> Router {
        build_router(state.clone(), &[])
    }

    /// Today's date in the test time zone (UTC), as sent on the wire.
    fn today_string() -> String {
        chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn post_json_admin(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-admin-secret", TEST_ADMIN_SECRET)
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status: StatusCode = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, String, Option<String>) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status: StatusCode = response.status();
        let content_type: Option<String> = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, String::from_utf8(bytes.to_vec()).expect("utf8"), content_type)
    }

    /// Marks today as a run day through the API and returns its session code.
    async fn configure_today(app: &Router) -> String {
        let (status, body) = send(
            app,
            post_json_admin(
                "/api/calendar/configure",
                &json!({"date": today_string(), "has_run": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["session_code"]
            .as_str()
            .expect("session code in response")
            .to_string()
    }

    async fn register(app: &Router, session_id: &str, runner_name: &str) -> (StatusCode, Value) {
        send(
            app,
            post_json(
                "/api/register",
                &json!({"session_id": session_id, "runner_name": runner_name}),
            ),
        )
        .await
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_router(&create_test_app_state());
        let (status, body) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn configure_without_credential_is_unauthorized() {
        let app = test_router(&create_test_app_state());
        let (status, body) = send(
            &app,
            post_json(
                "/api/calendar/configure",
                &json!({"date": today_string(), "has_run": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn configure_with_wrong_credential_is_unauthorized() {
        let app = test_router(&create_test_app_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/calendar/configure")
            .header("content-type", "application/json")
            .header("x-admin-secret", "not-the-secret")
            .body(Body::from(
                json!({"date": today_string(), "has_run": true}).to_string(),
            ))
            .expect("request");
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn configure_accepts_bearer_credential() {
        let app = test_router(&create_test_app_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/calendar/configure")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {TEST_ADMIN_SECRET}"))
            .body(Body::from(
                json!({"date": today_string(), "has_run": true}).to_string(),
            ))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn configure_issues_a_code_and_is_idempotent() {
        let app = test_router(&create_test_app_state());
        let first: String = configure_today(&app).await;
        assert_eq!(first.len(), DEFAULT_SESSION_CODE_LEN);
        assert!(first.chars().all(|c| DEFAULT_SESSION_CODE_ALPHABET.contains(c)));

        let second: String = configure_today(&app).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn register_happy_path_and_todays_count() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;

        let (status, body) = register(&app, &code, "12345678").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["current_count"], 1);
        assert_eq!(body["runner_name"], "12345678");

        let (status, body) = send(&app, get_request("/api/attendance/today")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["has_run_today"], true);
        assert_eq!(body["session_id"], code.as_str());
    }

    #[tokio::test]
    async fn duplicate_registration_is_conflict_with_unchanged_count() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;

        register(&app, &code, "12345678").await;
        let (status, body) = register(&app, &code, "12345678").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "AlreadyRegistered");
        assert_eq!(body["current_count"], 1);

        let (_, today) = send(&app, get_request("/api/attendance/today")).await;
        assert_eq!(today["count"], 1);
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let app = test_router(&create_test_app_state());
        let (status, body) = register(&app, "ZZZZZ", "alice").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "BadSession");
    }

    #[tokio::test]
    async fn closed_session_is_gone() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;

        let (status, _) = send(
            &app,
            post_json_admin(
                "/api/calendar/configure",
                &json!({"date": today_string(), "has_run": false}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = register(&app, &code, "alice").await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["error"], "SessionClosed");
    }

    #[tokio::test]
    async fn invalid_runner_names_are_bad_requests() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;

        let (status, body) = register(&app, &code, "   ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid");

        let long: String = "x".repeat(65);
        let (status, body) = register(&app, &code, &long).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid");

        let (_, today) = send(&app, get_request("/api/attendance/today")).await;
        assert_eq!(today["count"], 0);
    }

    #[tokio::test]
    async fn malformed_body_is_a_distinct_error_kind() {
        let app = test_router(&create_test_app_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/register")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Malformed");
    }

    #[tokio::test]
    async fn calendar_month_overview_joins_counts() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;
        register(&app, &code, "alice").await;

        let today: String = today_string();
        let month: &str = &today[..7];
        let (status, body) = send(&app, get_request(&format!("/api/calendar?month={month}"))).await;
        assert_eq!(status, StatusCode::OK);

        let data = body["data"].as_array().expect("data array");
        let entry = data
            .iter()
            .find(|d| d["date"] == today.as_str())
            .expect("today's entry");
        assert_eq!(entry["has_run"], true);
        assert_eq!(entry["attendance_count"], 1);
        assert_eq!(entry["session_code"], code.as_str());
    }

    #[tokio::test]
    async fn calendar_month_rejects_bad_month() {
        let app = test_router(&create_test_app_state());
        let (status, body) = send(&app, get_request("/api/calendar?month=2025-13")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Malformed");
    }

    #[tokio::test]
    async fn history_paginates_and_clamps() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;
        register(&app, &code, "alice").await;
        register(&app, &code, "bob").await;

        let (status, body) = send(
            &app,
            get_request("/api/attendance/history?page=2&page_size=1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 2);
        assert_eq!(body["total_pages"], 2);
        assert_eq!(body["page"], 2);
        assert_eq!(body["data"].as_array().expect("data").len(), 1);

        // page 0 behaves as page 1; oversized page_size falls back to 50.
        let (status, body) = send(
            &app,
            get_request("/api/attendance/history?page=0&page_size=5000"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 1);
        assert_eq!(body["page_size"], 50);
        assert_eq!(body["data"].as_array().expect("data").len(), 2);
    }

    #[tokio::test]
    async fn export_streams_csv_with_header() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;
        register(&app, &code, "alice").await;

        let (status, csv, content_type) =
            send_raw(&app, get_request("/api/attendance/export")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.expect("content type").starts_with("text/csv"));
        assert!(csv.starts_with("id,run_date,runner_id,registered_at,session_code\r\n"));
        assert!(csv.contains("alice"));
        assert!(csv.contains(&code));
    }

    #[tokio::test]
    async fn export_of_an_empty_range_is_header_only() {
        let app = test_router(&create_test_app_state());
        let code: String = configure_today(&app).await;
        register(&app, &code, "alice").await;

        let (status, csv, _) = send_raw(
            &app,
            get_request("/api/attendance/export?start_date=2001-01-01&end_date=2001-01-31"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(csv, "id,run_date,runner_id,registered_at,session_code\r\n");
    }

    #[tokio::test]
    async fn qr_image_is_served_for_known_codes_only() {
        let state = create_test_app_state();
        let app = test_router(&state);
        let code: String = configure_today(&app).await;

        let (status, body) = send(&app, get_request(&format!("/api/qr/{code}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], code.as_str());
        assert!(!body["qr_code"].as_str().expect("image").is_empty());

        let (status, _) = send(&app, get_request("/api/qr/ZZZZZ")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn qr_validate_accepts_minted_and_rejects_tampered_tokens() {
        let state = create_test_app_state();
        let app = test_router(&state);
        let code: String = configure_today(&app).await;

        let token: String =
            state.issuer.mint_qr_token(&SessionCode::from_trusted(code.clone()));
        let (status, body) = send(&app, get_request(&format!("/api/qr/validate/{token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["session_id"], code.as_str());

        let mut tampered: String = token;
        let last: char = tampered.pop().expect("token is non-empty");
        tampered.push(if last == 'x' { 'y' } else { 'x' });
        let (status, body) =
            send(&app, get_request(&format!("/api/qr/validate/{tampered}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
    }

    #[tokio::test]
    async fn a_minted_token_registers_like_its_code() {
        let state = create_test_app_state();
        let app = test_router(&state);
        let code: String = configure_today(&app).await;

        let token: String =
            state.issuer.mint_qr_token(&SessionCode::from_trusted(code));
        let (status, body) = register(&app, &token, "alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_count"], 1);
    }

    #[tokio::test]
    async fn registration_is_rate_limited_per_address() {
        let state = create_test_app_state_with_limiter(RateLimiter::new(0.0, 2));
        let app = test_router(&state);

        let request = |ip: &str| {
            Request::builder()
                .method("POST")
                .uri("/api/register")
                .header("content-type", "application/json")
                .header("x-forwarded-for", ip)
                .body(Body::from(
                    json!({"session_id": "ZZZZZ", "runner_name": "alice"}).to_string(),
                ))
                .expect("request")
        };

        let (first, _) = send(&app, request("9.9.9.9")).await;
        let (second, _) = send(&app, request("9.9.9.9")).await;
        let (third, body) = send(&app, request("9.9.9.9")).await;
        assert_ne!(first, StatusCode::TOO_MANY_REQUESTS);
        assert_ne!(second, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "RateLimited");

        // A different client address still has its full burst.
        let (other, _) = send(&app, request("8.8.8.8")).await;
        assert_ne!(other, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn subscribers_observe_every_tally_in_commit_order() {
        let state = create_test_app_state();
        let app = test_router(&state);
        let code: String = configure_today(&app).await;

        let mut rx = state.live_events.subscribe();

        for runner in ["alice", "bob", "carol"] {
            let (status, _) = register(&app, &code, runner).await;
            assert_eq!(status, StatusCode::OK);
        }

        let mut tallies: Vec<i64> = Vec::new();
        let mut successes: Vec<(i64, String)> = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                LiveEvent::TallyUpdate { count, .. } => tallies.push(count),
                LiveEvent::RegistrationSuccess {
                    count, runner_name, ..
                } => successes.push((count, runner_name)),
                _ => {}
            }
        }

        // Counts 1, 2, 3 in that order; none repeated, none skipped.
        assert_eq!(tallies, vec![1, 2, 3]);
        assert_eq!(
            successes,
            vec![
                (1, String::from("alice")),
                (2, String::from("bob")),
                (3, String::from("carol"))
            ]
        );
    }

    #[tokio::test]
    async fn configure_off_broadcasts_session_closed() {
        let state = create_test_app_state();
        let app = test_router(&state);
        configure_today(&app).await;

        let mut rx = state.live_events.subscribe();
        let (status, _) = send(
            &app,
            post_json_admin(
                "/api/calendar/configure",
                &json!({"date": today_string(), "has_run": false}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut saw_close: bool = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, LiveEvent::SessionClosed { .. }) {
                saw_close = true;
            }
        }
        assert!(saw_close);
    }
}
