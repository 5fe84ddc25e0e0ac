use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    routing::{get, patch, post},
    Json, Router,
};
use tower_cookies::{Cookie, Cookies};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, Empty, LoginRequest, LoginResponse, PublicUser,
            RefreshRequest, RegisterForm, UpdateAccountRequest,
        },
        extractors::CurrentUser,
        services,
        tokens::TokenPair,
    },
    error::ApiResult,
    media::{MediaKind, UploadFile},
    response::ApiResponse,
    state::AppState,
};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
        .route("/change-password", post(change_password))
        .route("/account", patch(update_account))
        .route("/avatar", patch(update_avatar))
        .route("/cover-image", patch(update_cover_image))
        .route("/me", get(get_me))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

fn session_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .path("/")
        .build()
}

fn set_session(cookies: &Cookies, tokens: &TokenPair) {
    cookies.add(session_cookie(ACCESS_COOKIE, tokens.access_token.clone()));
    cookies.add(session_cookie(REFRESH_COOKIE, tokens.refresh_token.clone()));
}

/// Always emits removal cookies, whether or not the request carried them.
fn clear_session(cookies: &Cookies) {
    for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
        let mut cookie = session_cookie(name, String::new());
        cookie.make_removal();
        cookies.add(cookie);
    }
}

async fn read_file(field: Field<'_>) -> ApiResult<Option<UploadFile>> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await?;
    // Browsers send an empty part for an untouched file input.
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadFile {
        file_name,
        content_type,
        body,
    }))
}

/// First non-empty file under `name`; other fields are ignored.
async fn read_single_file(mut mp: Multipart, name: &str) -> ApiResult<Option<UploadFile>> {
    while let Some(field) = mp.next_field().await? {
        if field.name() == Some(name) {
            if let Some(file) = read_file(field).await? {
                return Ok(Some(file));
            }
        }
    }
    Ok(None)
}

async fn read_register_form(mut mp: Multipart) -> ApiResult<RegisterForm> {
    let mut form = RegisterForm::default();
    while let Some(field) = mp.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "fullname" => form.fullname = Some(field.text().await?),
            "email" => form.email = Some(field.text().await?),
            "username" => form.username = Some(field.text().await?),
            "password" => form.password = Some(field.text().await?),
            "avatar" if form.avatar.is_none() => form.avatar = read_file(field).await?,
            "coverImage" if form.cover_image.is_none() => {
                form.cover_image = read_file(field).await?
            }
            _ => {}
        }
    }
    Ok(form)
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let form = read_register_form(mp?).await?;
    let user = services::register(&state, form).await?;
    Ok(ApiResponse::created(user, "User registered successfully"))
}

#[instrument(skip(state, cookies, payload))]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<LoginResponse>> {
    let Json(req) = payload?;
    let (user, tokens) = services::login(&state, req).await?;
    set_session(&cookies, &tokens);
    Ok(ApiResponse::ok(
        LoginResponse { user, tokens },
        "User logged in successfully",
    ))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    cookies: Cookies,
) -> ApiResult<ApiResponse<Empty>> {
    services::logout(&state, &user).await?;
    clear_session(&cookies);
    Ok(ApiResponse::ok(Empty {}, "User logged out successfully"))
}

#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    cookies: Cookies,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<ApiResponse<TokenPair>> {
    let incoming = cookies
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));

    let tokens = services::refresh(&state, incoming.as_deref()).await?;
    set_session(&cookies, &tokens);
    Ok(ApiResponse::ok(tokens, "Access token refreshed"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<Empty>> {
    let Json(req) = payload?;
    services::change_password(&state, &user, req).await?;
    Ok(ApiResponse::ok(Empty {}, "Password changed successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let Json(req) = payload?;
    let updated = services::update_account(&state, &user, req).await?;
    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mp: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let file = read_single_file(mp?, "avatar").await?;
    let updated = services::update_media(&state, &user, MediaKind::Avatar, file).await?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mp: Result<Multipart, MultipartRejection>,
) -> ApiResult<ApiResponse<PublicUser>> {
    let file = read_single_file(mp?, "coverImage").await?;
    let updated = services::update_media(&state, &user, MediaKind::CoverImage, file).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> ApiResult<ApiResponse<PublicUser>> {
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Current user fetched successfully",
    ))
}
