//! HTTP request handlers.

use crate::catalog::{BookInfo, BookSummary};
use crate::db::{
    self, AdminUserRow, CollectionEntry, FavoriteEntry, PublicProfile, ReadBook, Review,
    ReviewWithAuthor, UserSummary,
};
use crate::error::{AppError, Result};
use crate::reviews::ReviewDraft;
use crate::server::AppState;
use crate::stats::{self, UserStats};
use crate::users::{ProfileUpdate, avatar_content_type};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, de};
use tokio_util::io::ReaderStream;

/// JSON body whose rejections are reported as [`AppError::InvalidInput`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string counterpart of [`ApiJson`].
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Path counterpart of [`ApiJson`].
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// Read a finish date given as `YYYY-MM-DD` or as an RFC 3339 timestamp.
fn deserialize_finish_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|ts| ts.date_naive()))
        .map(Some)
        .map_err(|_| de::Error::custom(format!("invalid date: {}", raw)))
}

/// Plain message body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user: db::User,
}

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

/// Register response.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    user: db::User,
    message: String,
}

/// Auth register.
pub async fn auth_register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let user = state
        .auth
        .register(&req.username, &req.email, &req.password)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            message: "Account created. Check your email to verify your address.".to_string(),
        }),
    ))
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.email, &req.password)?;
    Ok(Json(LoginResponse { token, user }))
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::OK)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

/// Confirm an email address.
pub async fn auth_verify_email(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
) -> Result<Json<MessageResponse>> {
    let user = state.auth.verify_email(&token)?;
    Ok(Json(MessageResponse {
        message: format!("Email verified for {}", user.username),
    }))
}

// ============================================================================
// FAVORITES API
// ============================================================================

/// Add favorite request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFavoriteRequest {
    #[serde(alias = "book_id")]
    book_id: String,
}

/// Move favorite request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFavoriteRequest {
    #[serde(alias = "new_position")]
    new_position: i64,
}

/// Current user's favorites.
pub async fn favorites_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FavoriteEntry>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.favorites.list(&user.id)?))
}

/// Another user's favorites.
pub async fn favorites_list_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(user_id): ApiPath<String>,
) -> Result<Json<Vec<FavoriteEntry>>> {
    get_authenticated_user(&state, &headers).await?;
    state.users.get(&user_id)?;
    Ok(Json(state.favorites.list(&user_id)?))
}

/// Append a favorite.
pub async fn favorites_add(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AddFavoriteRequest>,
) -> Result<(StatusCode, Json<FavoriteEntry>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let entry = state.favorites.add(&user.id, &req.book_id)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Move a favorite to a new position.
pub async fn favorites_move(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(book_id): ApiPath<String>,
    ApiJson(req): ApiJson<MoveFavoriteRequest>,
) -> Result<Json<FavoriteEntry>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let entry = state
        .favorites
        .move_to(&user.id, &book_id, req.new_position)?;
    Ok(Json(entry))
}

/// Remove a favorite.
pub async fn favorites_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(book_id): ApiPath<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.favorites.remove(&user.id, &book_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// COLLECTIONS API
// ============================================================================

/// Add to collection request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCollectionRequest {
    #[serde(alias = "book_id")]
    book_id: String,
    #[serde(default = "default_status")]
    status: String,
    #[serde(
        default,
        alias = "finish_date",
        deserialize_with = "deserialize_finish_date"
    )]
    finish_date: Option<NaiveDate>,
}

fn default_status() -> String {
    db::STATUS_READ.to_string()
}

/// Read books of the current user.
pub async fn collections_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReadBook>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.collection.read_books(&user.id)?))
}

/// Add a book to the collection.
pub async fn collections_add(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AddCollectionRequest>,
) -> Result<(StatusCode, Json<CollectionEntry>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let entry = state
        .collection
        .add(&user.id, &req.book_id, &req.status, req.finish_date)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Remove a book and its review from the collection.
pub async fn collections_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(book_id): ApiPath<String>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.collection.remove(&user.id, &book_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// REVIEWS API
// ============================================================================

/// Create review request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    #[serde(alias = "book_id")]
    book_id: String,
    rating: f64,
    comment: Option<String>,
    #[serde(
        default,
        alias = "finish_date",
        deserialize_with = "deserialize_finish_date"
    )]
    finish_date: Option<NaiveDate>,
}

/// Update review request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReviewRequest {
    rating: f64,
    comment: Option<String>,
    #[serde(
        default,
        alias = "finish_date",
        deserialize_with = "deserialize_finish_date"
    )]
    finish_date: Option<NaiveDate>,
}

/// Create a review.
pub async fn reviews_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>)> {
    let user = get_authenticated_user(&state, &headers).await?;
    let draft = ReviewDraft {
        rating: req.rating,
        comment: req.comment,
        finish_date: req.finish_date,
    };
    let review = state.reviews.create(&user.id, &req.book_id, &draft)?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// Reviews of a book.
pub async fn reviews_for_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(book_id): ApiPath<String>,
) -> Result<Json<Vec<ReviewWithAuthor>>> {
    get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.reviews.for_book(&book_id)?))
}

/// Reviews of the current user.
pub async fn reviews_mine(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReviewWithAuthor>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.reviews.by_user(&user.id)?))
}

/// Edit an own review.
pub async fn reviews_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateReviewRequest>,
) -> Result<Json<Review>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let draft = ReviewDraft {
        rating: req.rating,
        comment: req.comment,
        finish_date: req.finish_date,
    };
    Ok(Json(state.reviews.update(&user.id, id, &draft)?))
}

/// Delete an own review.
pub async fn reviews_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    let user = get_authenticated_user(&state, &headers).await?;
    state.reviews.delete(&user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// USERS API
// ============================================================================

/// Profile update request.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    username: Option<String>,
    bio: Option<String>,
}

/// User search parameters.
#[derive(Debug, Deserialize)]
pub struct UserSearchParams {
    q: Option<String>,
}

/// Suggestion parameters.
#[derive(Debug, Deserialize)]
pub struct SuggestedParams {
    limit: Option<usize>,
}

/// Current user's account.
pub async fn users_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

/// Update username and bio.
pub async fn users_update_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let update = ProfileUpdate {
        username: req.username,
        bio: req.bio,
    };
    Ok(Json(state.users.update_profile(&user.id, &update)?))
}

/// Upload an avatar (raw image body).
pub async fn users_upload_avatar(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<db::User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.users.upload_avatar(&user.id, &body).await?))
}

/// Public profile.
pub async fn users_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<PublicProfile>> {
    get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.users.profile(&id)?))
}

/// Search other users.
pub async fn users_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<UserSearchParams>,
) -> Result<Json<Vec<UserSummary>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.users.search(&user.id, params.q.as_deref())?))
}

/// Suggested users to follow.
pub async fn users_suggested(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<SuggestedParams>,
) -> Result<Json<Vec<UserSummary>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.users.suggested(&user.id, params.limit)?))
}

/// Serve a stored avatar.
pub async fn avatar_file(
    State(state): State<AppState>,
    ApiPath(file): ApiPath<String>,
) -> Result<Response<Body>> {
    let path = state.users.avatar_path(&file)?;

    let file_handle = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!("Avatar not found: {}", file)));
        }
        Err(e) => return Err(e.into()),
    };
    let stream = ReaderStream::new(file_handle);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, avatar_content_type(&file))
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ============================================================================
// STATS API
// ============================================================================

/// Statistics of the current user.
pub async fn stats_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<UserStats>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(stats::user_stats(&state.db, &user.id, state.reading_goal())?))
}

/// Statistics of another user.
pub async fn stats_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<UserStats>> {
    get_authenticated_user(&state, &headers).await?;
    state.users.get(&id)?;
    Ok(Json(stats::user_stats(&state.db, &id, state.reading_goal())?))
}

/// Review history of the current user.
pub async fn stats_reviews_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReviewWithAuthor>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.reviews.history(&user.id)?))
}

/// Review history of another user.
pub async fn stats_reviews_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Vec<ReviewWithAuthor>>> {
    get_authenticated_user(&state, &headers).await?;
    state.users.get(&id)?;
    Ok(Json(state.reviews.history(&id)?))
}

/// Collection history of the current user.
pub async fn stats_collections_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<CollectionEntry>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.collection.history(&user.id)?))
}

/// Collection history of another user.
pub async fn stats_collections_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Vec<CollectionEntry>>> {
    get_authenticated_user(&state, &headers).await?;
    state.users.get(&id)?;
    Ok(Json(state.collection.history(&id)?))
}

// ============================================================================
// BOOKS API
// ============================================================================

/// Book search parameters.
#[derive(Debug, Deserialize)]
pub struct BookSearchParams {
    q: Option<String>,
    #[serde(alias = "maxResults")]
    max_results: Option<u32>,
}

/// Search the catalog.
pub async fn books_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<BookSearchParams>,
) -> Result<Json<Vec<BookInfo>>> {
    get_authenticated_user(&state, &headers).await?;
    let query = params.q.unwrap_or_default();
    Ok(Json(state.catalog.search(&query, params.max_results).await?))
}

/// Look up a book.
pub async fn books_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<BookInfo>> {
    get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.catalog.lookup(&id).await?))
}

// ============================================================================
// ADMIN API
// ============================================================================

/// Review with catalog details for moderation.
#[derive(Debug, Serialize)]
pub struct AdminReview {
    #[serde(flatten)]
    review: ReviewWithAuthor,
    book: BookSummary,
}

/// All users with activity counts.
pub async fn admin_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AdminUserRow>>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.db.admin_list_users()?))
}

/// Delete a user and everything they own.
pub async fn admin_delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<String>,
) -> Result<StatusCode> {
    let admin = require_admin(&state, &headers).await?;
    if admin.id == id {
        return Err(AppError::InvalidInput(
            "Admins cannot delete their own account".to_string(),
        ));
    }

    let user = state.users.delete(&id).await?;

    tracing::info!(admin = %admin.username, user = %user.username, "User deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

/// All reviews with book details.
pub async fn admin_reviews(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AdminReview>>> {
    require_admin(&state, &headers).await?;

    let reviews = state.reviews.all()?;
    let mut rows = Vec::with_capacity(reviews.len());
    for review in reviews {
        let book = state
            .catalog
            .summary_or_placeholder(&review.review.book_id)
            .await;
        rows.push(AdminReview { review, book });
    }

    Ok(Json(rows))
}

/// Delete any review.
pub async fn admin_delete_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    require_admin(&state, &headers).await?;
    state.reviews.moderate_delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Get authenticated user from token.
async fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))
}

/// Get the authenticated user and require the admin role.
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<db::User> {
    let user = get_authenticated_user(state, headers).await?;
    if !state.auth.is_admin(&user) {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(user)
}
