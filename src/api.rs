use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::app::{App, CardInput};
use crate::dates::{today_utc, DueStatus};
use crate::db::StoreError;
use crate::error::AppError;
use crate::models::{NewUser, SessionInput};
use crate::srs::{self, Quality, Rating};

#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<App>,
}

pub fn app_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/users", post(register))
        .route("/api/users/:user_id/data", get(get_data).patch(patch_data))
        .route("/api/users/:user_id/sessions", post(add_session))
        .route("/api/users/:user_id/sessions/:session_id", put(update_session).delete(delete_session))
        .route("/api/users/:user_id/decks", get(list_decks).post(add_deck))
        .route("/api/users/:user_id/decks/:deck_id", put(rename_deck).delete(delete_deck))
        .route("/api/users/:user_id/decks/:deck_id/flashcards", post(add_flashcard))
        .route("/api/users/:user_id/decks/:deck_id/due", get(due_flashcards))
        .route("/api/users/:user_id/flashcards/:card_id", put(edit_flashcard).delete(delete_flashcard))
        .route("/api/users/:user_id/flashcards/:card_id/review", post(review_flashcard))
        .route("/api/users/:user_id/reviews", get(get_reviews))
        .route("/api/users/:user_id/reviews/calendar", get(get_review_calendar))
        .route("/api/users/:user_id/dashboard", get(get_dashboard))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct ApiError(AppError);

impl<E: Into<AppError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::NotFound { .. } | AppError::Store(StoreError::UserNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::VersionConflict { .. } | StoreError::UserExists(_)) => StatusCode::CONFLICT,
            AppError::Store(StoreError::InvalidPatch(_)) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Srs(_) | AppError::Session(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Store(StoreError::Sqlx(_) | StoreError::Json(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("request failed: {}", self.0);
        } else {
            log::warn!("request rejected ({}): {}", status, self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Lets a client pin "today" so its views agree with its own calendar.
#[derive(Debug, Deserialize)]
struct DayQuery {
    today: Option<NaiveDate>,
    subject: Option<String>,
}

impl DayQuery {
    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(today_utc)
    }
}

fn etag(version: i64) -> String {
    format!("\"{}\"", version)
}

fn if_match(headers: &HeaderMap) -> ApiResult<Option<i64>> {
    let Some(raw) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .map(|s| s.trim().trim_start_matches("W/").trim_matches('"'))
        .and_then(|s| s.parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| ApiError(AppError::InvalidInput("If-Match must be a document version".into())))
}

async fn register(
    State(state): State<ApiState>,
    Json(user): Json<NewUser>,
) -> ApiResult<impl IntoResponse> {
    let user_id = state.app.register(user, today_utc()).await?;
    Ok((StatusCode::CREATED, Json(json!({ "userId": user_id }))))
}

async fn get_data(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let stored = state.app.db.load(&user_id).await?;
    Ok(([(header::ETAG, etag(stored.version))], Json(stored.data)))
}

async fn patch_data(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let expected = if_match(&headers)?;
    let version = state.app.patch_document(&user_id, patch, expected).await?;
    Ok(([(header::ETAG, etag(version))], Json(json!({ "version": version }))))
}

async fn add_session(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(input): Json<SessionInput>,
) -> ApiResult<impl IntoResponse> {
    let recorded = state.app.add_session(&user_id, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

async fn update_session(
    State(state): State<ApiState>,
    Path((user_id, session_id)): Path<(String, String)>,
    Json(input): Json<SessionInput>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.update_session(&user_id, &session_id, input).await?))
}

async fn delete_session(
    State(state): State<ApiState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.app.delete_session(&user_id, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct DeckRequest {
    name: String,
}

async fn list_decks(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<DayQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.deck_summaries(&user_id, query.today()).await?))
}

async fn add_deck(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(req): Json<DeckRequest>,
) -> ApiResult<impl IntoResponse> {
    let deck = state.app.add_deck(&user_id, req.name).await?;
    Ok((StatusCode::CREATED, Json(deck)))
}

async fn rename_deck(
    State(state): State<ApiState>,
    Path((user_id, deck_id)): Path<(String, String)>,
    Json(req): Json<DeckRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.rename_deck(&user_id, &deck_id, req.name).await?))
}

async fn delete_deck(
    State(state): State<ApiState>,
    Path((user_id, deck_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let removed = state.app.delete_deck(&user_id, &deck_id).await?;
    Ok(Json(json!({ "removedFlashcards": removed })))
}

async fn add_flashcard(
    State(state): State<ApiState>,
    Path((user_id, deck_id)): Path<(String, String)>,
    Query(query): Query<DayQuery>,
    Json(input): Json<CardInput>,
) -> ApiResult<impl IntoResponse> {
    let card = state.app.add_flashcard(&user_id, &deck_id, input, query.today()).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn due_flashcards(
    State(state): State<ApiState>,
    Path((user_id, deck_id)): Path<(String, String)>,
    Query(query): Query<DayQuery>,
) -> ApiResult<impl IntoResponse> {
    let today = query.today();
    let cards = state.app.due_flashcards(&user_id, &deck_id, today).await?;
    let mut listed = Vec::with_capacity(cards.len());
    for card in &cards {
        let preview: Vec<Value> = Rating::ALL
            .iter()
            .zip(srs::preview_intervals(card, today)?)
            .map(|(rating, days)| {
                json!({ "rating": rating, "label": rating.label(), "interval": days })
            })
            .collect();
        listed.push(json!({ "card": card, "preview": preview }));
    }
    Ok(Json(listed))
}

async fn edit_flashcard(
    State(state): State<ApiState>,
    Path((user_id, card_id)): Path<(String, String)>,
    Json(input): Json<CardInput>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.app.edit_flashcard(&user_id, &card_id, input).await?))
}

async fn delete_flashcard(
    State(state): State<ApiState>,
    Path((user_id, card_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.app.delete_flashcard(&user_id, &card_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Either a raw SM-2 quality or one of the four buttons.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    quality: Option<u8>,
    rating: Option<Rating>,
}

impl ReviewRequest {
    fn quality(&self) -> ApiResult<Quality> {
        match (self.quality, self.rating) {
            (Some(q), None) => Ok(Quality::new(q)?),
            (None, Some(rating)) => Ok(rating.quality()),
            _ => Err(ApiError(AppError::InvalidInput(
                "send exactly one of quality or rating".into(),
            ))),
        }
    }
}

async fn review_flashcard(
    State(state): State<ApiState>,
    Path((user_id, card_id)): Path<(String, String)>,
    Query(query): Query<DayQuery>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let quality = req.quality()?;
    Ok(Json(state.app.review_flashcard(&user_id, &card_id, quality, query.today()).await?))
}

async fn get_reviews(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<DayQuery>,
) -> ApiResult<impl IntoResponse> {
    let today = query.today();
    let plan = state.app.review_plan(&user_id, today).await?;

    let describe = |reminder: &crate::reviews::ReviewReminder| {
        let status = reminder.status(today);
        json!({
            "reminder": reminder,
            "label": status.label(),
            "urgent": status.is_urgent(),
            "stepLabel": reminder.step_label(),
            "tip": reminder.tip(),
        })
    };
    let due: Vec<Value> = plan.due.iter().map(describe).collect();
    let upcoming: Vec<Value> = plan.upcoming.iter().map(describe).collect();

    // Reminder ids per review day.
    let mut calendar: BTreeMap<NaiveDate, Vec<&str>> = BTreeMap::new();
    for reminder in plan.due.iter().chain(plan.upcoming.iter()) {
        calendar.entry(reminder.review_date).or_default().push(reminder.id.as_str());
    }

    Ok(Json(json!({
        "today": today,
        "dueReviews": due,
        "upcomingReviews": upcoming,
        "calendar": calendar,
    })))
}

#[derive(Debug, Deserialize)]
struct CalendarQuery {
    date: Option<NaiveDate>,
}

/// The whole reminder calendar, or a single day of it with `?date=`.
async fn get_review_calendar(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<CalendarQuery>,
) -> ApiResult<Json<Value>> {
    match query.date {
        Some(date) => {
            let reminders = state.app.reminders_on(&user_id, date).await?;
            Ok(Json(json!({ "date": date, "reminders": reminders })))
        }
        None => {
            let calendar = state.app.review_calendar(&user_id).await?;
            Ok(Json(json!({ "calendar": calendar })))
        }
    }
}

async fn get_dashboard(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<DayQuery>,
) -> ApiResult<impl IntoResponse> {
    let today = query.today();
    let dashboard = state.app.dashboard(&user_id, query.subject.as_deref(), today).await?;

    let labels: Vec<Value> = dashboard
        .due_reviews
        .iter()
        .chain(dashboard.upcoming_reviews.iter())
        .map(|r| {
            let status = DueStatus::classify(r.review_date, today);
            json!({ "sessionId": r.session.id, "label": status.label(), "urgent": status.is_urgent() })
        })
        .collect();

    Ok(Json(json!({ "today": today, "dashboard": dashboard, "labels": labels })))
}
