use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::HeaderMap,
    response::{AppendHeaders, IntoResponse},
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{
        ChangePasswordRequest, LoginPayload, LoginRequest, ProfileImage, RefreshRequest,
        RegisterInput, UpdateAccountRequest,
    },
    model::PublicUser,
    services,
};
use crate::{
    auth::{
        cookies::{cleared_cookies, read_cookie, session_cookies, REFRESH_COOKIE},
        AuthUser, TokenPair,
    },
    error::{AppError, AppResult},
    response::ApiResponse,
    state::AppState,
    uploads::stage_multipart,
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const REFRESH_HEADER: &str = "x-refresh-token";

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/refresh-token", post(refresh_token))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/users/logout", post(logout))
        .route("/users/current-user", get(current_user))
        .route(
            "/users/account-details",
            patch(update_account).put(update_account),
        )
        .route(
            "/users/change-password",
            post(change_password).put(change_password),
        )
        .route("/users/avatar", patch(update_avatar).put(update_avatar))
        .route(
            "/users/cover-image",
            patch(update_cover_image).put(update_cover_image),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rej| AppError::validation(rej.body_text()))
}

#[instrument(skip_all)]
pub async fn register(
    State(st): State<AppState>,
    mp: Multipart,
) -> AppResult<ApiResponse<PublicUser>> {
    let mut form = stage_multipart(
        mp,
        &st.config.upload_dir,
        &[ProfileImage::Avatar.field(), ProfileImage::Cover.field()],
    )
    .await?;
    let input = RegisterInput {
        username: form.text("username"),
        email: form.text("email"),
        full_name: form.text("fullName"),
        password: form.text("password"),
        avatar: form.take_file(ProfileImage::Avatar.field()),
        cover_image: form.take_file(ProfileImage::Cover.field()),
    };
    let user = services::register(&st, input).await?;
    Ok(ApiResponse::created(user, "User registered successfully"))
}

#[instrument(skip_all)]
pub async fn login(
    State(st): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let req = json_body(payload)?;
    let (user, pair) = services::login(&st, req).await?;
    let cookies = session_cookies(st.tokens.keys(), &pair, st.config.cookie_secure)?;
    let body = LoginPayload {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    };
    Ok((
        AppendHeaders(cookies),
        ApiResponse::ok(body, "User logged in successfully"),
    ))
}

/// Rotates the caller's refresh token.
///
/// The token is taken from the `refreshToken` cookie first, then the
/// `x-refresh-token` header, then the JSON body. A stale cookie therefore
/// shadows a fresh token sent any other way, and the call fails with
/// `ExpiredOrRevoked`; browser clients keep the cookie current from the
/// `Set-Cookie` headers of login and refresh.
#[instrument(skip_all)]
pub async fn refresh_token(
    State(st): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<impl IntoResponse> {
    let presented = read_cookie(&headers, REFRESH_COOKIE)
        .or_else(|| headers.get(REFRESH_HEADER).and_then(|v| v.to_str().ok()))
        .map(str::to_string)
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));

    let pair: TokenPair = services::refresh(&st, presented).await?;
    let cookies = session_cookies(st.tokens.keys(), &pair, st.config.cookie_secure)?;
    Ok((
        AppendHeaders(cookies),
        ApiResponse::ok(pair, "Access token refreshed"),
    ))
}

#[instrument(skip(st))]
pub async fn logout(
    State(st): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<impl IntoResponse> {
    services::logout(&st, user_id).await?;
    Ok((
        AppendHeaders(cleared_cookies(st.config.cookie_secure)),
        ApiResponse::ok(serde_json::json!({}), "User logged out"),
    ))
}

#[instrument(skip(st))]
pub async fn current_user(
    State(st): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = services::current_user(&st, user_id).await?;
    Ok(ApiResponse::ok(user, "Current user fetched successfully"))
}

#[instrument(skip(st, payload))]
pub async fn change_password(
    State(st): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    services::change_password(&st, user_id, json_body(payload)?).await?;
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Password changed successfully",
    ))
}

#[instrument(skip(st, payload))]
pub async fn update_account(
    State(st): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = services::update_account(&st, user_id, json_body(payload)?).await?;
    Ok(ApiResponse::ok(user, "Account details updated successfully"))
}

async fn update_image(
    st: AppState,
    user_id: uuid::Uuid,
    kind: ProfileImage,
    mp: Multipart,
) -> AppResult<PublicUser> {
    let mut form = stage_multipart(mp, &st.config.upload_dir, &[kind.field()]).await?;
    services::update_image(&st, user_id, kind, form.take_file(kind.field())).await
}

#[instrument(skip(st, mp))]
pub async fn update_avatar(
    State(st): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = update_image(st, user_id, ProfileImage::Avatar, mp).await?;
    Ok(ApiResponse::ok(user, "Avatar image updated successfully"))
}

#[instrument(skip(st, mp))]
pub async fn update_cover_image(
    State(st): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = update_image(st, user_id, ProfileImage::Cover, mp).await?;
    Ok(ApiResponse::ok(user, "Cover image updated successfully"))
}
