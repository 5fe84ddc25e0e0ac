use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use super::{
    dto::{ChangePasswordRequest, LoginRequest, PublicUser, RegisterForm, UpdateAccountRequest},
    password::{hash_password, verify_password},
    repo::RepoError,
    repo_types::{NewUser, User},
    tokens::{issue_token_pair, verify_refresh_token, TokenPair},
};
use crate::{
    error::{ApiError, ApiResult},
    media::{discard_media, upload_media, MediaKind, UploadFile, UploadedMedia},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed value, or `None` when absent or blank.
fn present(field: Option<String>) -> Option<String> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn register(st: &AppState, form: RegisterForm) -> ApiResult<PublicUser> {
    // Password is stored as typed; only the blank check trims it.
    let password = form.password.filter(|p| !p.trim().is_empty());
    let (Some(fullname), Some(email), Some(username), Some(password)) = (
        present(form.fullname),
        present(form.email),
        present(form.username),
        password,
    ) else {
        return Err(ApiError::bad_request("All fields are required"));
    };
    let email = email.to_lowercase();
    let username = username.to_lowercase();

    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    if st
        .users
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?
        .is_some()
    {
        warn!(%username, %email, "registration conflict");
        return Err(ApiError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let avatar_file = form
        .avatar
        .ok_or_else(|| ApiError::bad_request("Avatar file is required"))?;
    let password_hash = hash_password(&password)?;

    let avatar = upload_media(st, MediaKind::Avatar, avatar_file)
        .await
        .map_err(|e| {
            warn!(error = %e, "avatar upload failed");
            ApiError::bad_request("Avatar file could not be uploaded")
        })?;

    let cover = match form.cover_image {
        Some(file) => match upload_media(st, MediaKind::CoverImage, file).await {
            Ok(media) => Some(media),
            Err(e) => {
                warn!(error = %e, "cover image upload failed; continuing without it");
                None
            }
        },
        None => None,
    };

    let new = NewUser {
        username,
        email,
        fullname,
        avatar: avatar.url.clone(),
        cover_image: cover.as_ref().map(|c| c.url.clone()),
        password_hash,
    };
    let user = match st.users.create(new).await {
        Ok(user) => user,
        Err(e) => {
            discard_all(st, &avatar, cover.as_ref()).await;
            return Err(match e {
                RepoError::Duplicate => {
                    ApiError::Conflict("User with email or username already exists".into())
                }
                RepoError::Other(inner) => ApiError::Internal(inner),
            });
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user.into())
}

async fn discard_all(st: &AppState, avatar: &UploadedMedia, cover: Option<&UploadedMedia>) {
    discard_media(st, avatar).await;
    if let Some(cover) = cover {
        discard_media(st, cover).await;
    }
}

pub async fn login(st: &AppState, req: LoginRequest) -> ApiResult<(PublicUser, TokenPair)> {
    let username = present(req.username).map(|u| u.to_lowercase());
    let email = present(req.email).map(|e| e.to_lowercase());
    if username.is_none() && email.is_none() {
        return Err(ApiError::bad_request("Username or email is required"));
    }

    let user = st
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let tokens = issue_token_pair(st, user.id).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((user.into(), tokens))
}

pub async fn logout(st: &AppState, user: &User) -> ApiResult<()> {
    st.users.set_refresh_token(user.id, None).await?;
    info!(user_id = %user.id, "user logged out");
    Ok(())
}

/// Rotates the session. Every failure is reported as `Unauthorized`.
pub async fn refresh(st: &AppState, incoming: Option<&str>) -> ApiResult<TokenPair> {
    let claims = verify_refresh_token(st, incoming).await.map_err(|e| {
        warn!(error = ?e, "refresh rejected");
        ApiError::unauthorized(e.to_string())
    })?;

    let tokens = issue_token_pair(st, claims.sub).await.map_err(|e| {
        warn!(error = ?e, user_id = %claims.sub, "refresh could not issue tokens");
        ApiError::unauthorized("Error while refreshing access token")
    })?;

    info!(user_id = %claims.sub, "access token refreshed");
    Ok(tokens)
}

pub async fn change_password(
    st: &AppState,
    user: &User,
    req: ChangePasswordRequest,
) -> ApiResult<()> {
    if !verify_password(&req.old_password, &user.password_hash)? {
        warn!(user_id = %user.id, "change password with wrong old password");
        return Err(ApiError::unauthorized("Invalid old password"));
    }
    if req.new_password.trim().is_empty() {
        return Err(ApiError::bad_request("New password is required"));
    }

    let hash = hash_password(&req.new_password)?;
    if !st.users.set_password_hash(user.id, &hash).await? {
        return Err(ApiError::NotFound("User does not exist".into()));
    }
    info!(user_id = %user.id, "password changed");
    Ok(())
}

pub async fn update_account(
    st: &AppState,
    user: &User,
    req: UpdateAccountRequest,
) -> ApiResult<PublicUser> {
    let (Some(fullname), Some(email)) = (present(req.fullname), present(req.email)) else {
        return Err(ApiError::bad_request("All fields are required"));
    };
    let email = email.to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    let updated = st
        .users
        .update_details(user.id, &fullname, &email)
        .await
        .map_err(|e| match e {
            RepoError::Duplicate => ApiError::Conflict("Email is already in use".into()),
            RepoError::Other(inner) => ApiError::Internal(inner),
        })?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    info!(user_id = %user.id, "account details updated");
    Ok(updated.into())
}

/// Replaces the avatar or cover image. The upload is awaited and its URL
/// checked before anything is persisted.
pub async fn update_media(
    st: &AppState,
    user: &User,
    kind: MediaKind,
    file: Option<UploadFile>,
) -> ApiResult<PublicUser> {
    let label = match kind {
        MediaKind::Avatar => "Avatar",
        MediaKind::CoverImage => "Cover image",
    };
    let file = file.ok_or_else(|| ApiError::bad_request(format!("{} file is missing", label)))?;

    let media = upload_media(st, kind, file).await.map_err(|e| {
        warn!(error = %e, user_id = %user.id, ?kind, "media upload failed");
        ApiError::bad_request(format!("Error while uploading {}", label.to_lowercase()))
    })?;
    if media.url.is_empty() {
        return Err(ApiError::bad_request(format!(
            "Error while uploading {}",
            label.to_lowercase()
        )));
    }

    let updated = match kind {
        MediaKind::Avatar => st.users.set_avatar(user.id, &media.url).await,
        MediaKind::CoverImage => st.users.set_cover_image(user.id, &media.url).await,
    };
    match updated {
        Ok(Some(u)) => {
            info!(user_id = %user.id, ?kind, "media updated");
            Ok(u.into())
        }
        Ok(None) => {
            discard_media(st, &media).await;
            Err(ApiError::NotFound("User does not exist".into()))
        }
        Err(e) => {
            discard_media(st, &media).await;
            Err(ApiError::Internal(e))
        }
    }
}
