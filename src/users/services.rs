//! Account operations: registration, sessions and profile changes.
//!
//! Every operation validates its input before the first side effect. The ones
//! that touch media run inside an [`UploadScope`] so a failure after an upload
//! deletes what was uploaded, and staged local files never outlive the call.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{ChangePasswordRequest, LoginRequest, ProfileImage, RegisterInput, UpdateAccountRequest},
    model::{NewUser, PublicUser, User, UserPatch},
};
use crate::{
    auth::{password, TokenPair},
    error::{AppError, AppResult},
    state::AppState,
    uploads::{StagedFile, UploadScope},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(normalize).filter(|v| !v.is_empty())
}

async fn load_caller(st: &AppState, user_id: Uuid) -> AppResult<User> {
    st.users.find_by_id(user_id).await?.ok_or_else(|| {
        warn!(%user_id, "token subject no longer exists");
        AppError::unauthenticated("Invalid access token")
    })
}

#[instrument(skip_all, fields(username = %input.username))]
pub async fn register(st: &AppState, input: RegisterInput) -> AppResult<PublicUser> {
    let mut scope = UploadScope::new(st.uploads.clone());
    for file in input.avatar.iter().chain(input.cover_image.iter()) {
        scope.track(file);
    }
    let result = register_in_scope(st, input, &mut scope).await;
    scope.finish(result).await
}

async fn register_in_scope(
    st: &AppState,
    input: RegisterInput,
    scope: &mut UploadScope,
) -> AppResult<PublicUser> {
    let RegisterInput {
        username,
        email,
        full_name,
        password,
        avatar,
        cover_image,
    } = input;

    if [&username, &email, &full_name, &password]
        .iter()
        .any(|f| f.trim().is_empty())
    {
        warn!("registration with missing fields");
        return Err(AppError::validation("All fields are required"));
    }
    let username = normalize(&username);
    let email = normalize(&email);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    let avatar = avatar
        .as_ref()
        .ok_or_else(|| AppError::validation("Avatar image is required"))?;

    if st
        .users
        .find_by_username_or_email(Some(&username), Some(&email))
        .await?
        .is_some()
    {
        warn!(username = %username, email = %email, "username or email already registered");
        return Err(AppError::Conflict("Username or email already exists".into()));
    }

    let password_hash = password::hash(password).await.map_err(AppError::Internal)?;

    let avatar_obj = scope.upload(avatar, ProfileImage::Avatar.folder()).await?;
    let cover_obj = match cover_image.as_ref() {
        Some(file) => Some(scope.upload(file, ProfileImage::Cover.folder()).await?),
        None => None,
    };

    let created = st
        .users
        .create(NewUser {
            username,
            email,
            full_name: full_name.trim().to_string(),
            password_hash,
            avatar: avatar_obj.url,
            cover_image: cover_obj.map(|o| o.url),
        })
        .await?;

    let read_back = match st.users.find_by_id(created.id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(anyhow::anyhow!("created user {} not found on read-back", created.id)),
        Err(e) => Err(anyhow::Error::new(e)),
    };
    let user = match read_back {
        Ok(user) => user,
        Err(e) => {
            error!(error = %e, user_id = %created.id, "read-back after create failed");
            if let Err(del) = st.users.delete_by_id(created.id).await {
                error!(error = %del, user_id = %created.id, "could not remove half-registered user");
            }
            return Err(AppError::Persistence(e));
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(PublicUser::from(user))
}

#[instrument(skip_all)]
pub async fn login(st: &AppState, req: LoginRequest) -> AppResult<(PublicUser, TokenPair)> {
    let username = non_blank(req.username.as_deref());
    let email = non_blank(req.email.as_deref());
    if username.is_none() && email.is_none() {
        return Err(AppError::validation("Username or email is required"));
    }
    if req.password.is_empty() {
        return Err(AppError::validation("Password is required"));
    }

    let Some(user) = st
        .users
        .find_by_username_or_email(username.as_deref(), email.as_deref())
        .await?
    else {
        password::verify_dummy(req.password).await;
        warn!(?username, ?email, "login for unknown user");
        return Err(AppError::InvalidCredentials);
    };

    let ok = password::verify(req.password, user.password_hash.clone())
        .await
        .map_err(AppError::Internal)?;
    if !ok {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let pair = st.tokens.issue_pair(user.id).await?;
    info!(user_id = %user.id, "user logged in");
    // Re-read so the returned record carries the new updated_at.
    let user = st.users.find_by_id(user.id).await?.unwrap_or(user);
    Ok((PublicUser::from(user), pair))
}

#[instrument(skip(st))]
pub async fn logout(st: &AppState, user_id: Uuid) -> AppResult<()> {
    st.tokens.revoke(user_id).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

#[instrument(skip_all)]
pub async fn refresh(st: &AppState, presented: Option<String>) -> AppResult<TokenPair> {
    let token = presented
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::unauthenticated("Refresh token is required"))?;
    let (user, pair) = st.tokens.rotate(&token).await?;
    info!(user_id = %user.id, "access token refreshed");
    Ok(pair)
}

#[instrument(skip(st, req))]
pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> AppResult<()> {
    if req.current_password.is_empty() || req.new_password.is_empty() {
        return Err(AppError::validation("Current and new password are required"));
    }
    if req.current_password == req.new_password {
        return Err(AppError::validation(
            "New password must be different from the current password",
        ));
    }

    let user = load_caller(st, user_id).await?;
    let ok = password::verify(req.current_password, user.password_hash)
        .await
        .map_err(AppError::Internal)?;
    if !ok {
        warn!(%user_id, "change password with wrong current password");
        return Err(AppError::InvalidCredentials);
    }

    let password_hash = password::hash(req.new_password)
        .await
        .map_err(AppError::Internal)?;
    let patch = UserPatch {
        password_hash: Some(password_hash),
        ..UserPatch::default()
    };
    st.users
        .update_fields(user_id, patch)
        .await?
        .ok_or_else(|| AppError::unauthenticated("Invalid access token"))?;

    info!(%user_id, "password changed");
    Ok(())
}

#[instrument(skip(st))]
pub async fn current_user(st: &AppState, user_id: Uuid) -> AppResult<PublicUser> {
    load_caller(st, user_id).await.map(PublicUser::from)
}

#[instrument(skip(st, req))]
pub async fn update_account(
    st: &AppState,
    user_id: Uuid,
    req: UpdateAccountRequest,
) -> AppResult<PublicUser> {
    let username = normalize(&req.username);
    let email = normalize(&req.email);
    if username.is_empty() || email.is_empty() {
        return Err(AppError::validation("Username and email are required"));
    }
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }
    let full_name = req
        .full_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    if let Some(other) = st
        .users
        .find_taken_by_other(&username, &email, user_id)
        .await?
    {
        warn!(%user_id, other = %other.id, "account details clash with another user");
        return Err(AppError::Conflict("Username or email already exists".into()));
    }

    let patch = UserPatch {
        username: Some(username),
        email: Some(email),
        full_name,
        ..UserPatch::default()
    };
    let user = st
        .users
        .update_fields(user_id, patch)
        .await?
        .ok_or_else(|| AppError::unauthenticated("Invalid access token"))?;

    info!(%user_id, "account details updated");
    Ok(PublicUser::from(user))
}

/// Replaces the avatar or cover image. The previous remote object is removed
/// only after the new URL is stored.
#[instrument(skip(st, file))]
pub async fn update_image(
    st: &AppState,
    user_id: Uuid,
    kind: ProfileImage,
    file: Option<StagedFile>,
) -> AppResult<PublicUser> {
    let mut scope = UploadScope::new(st.uploads.clone());
    if let Some(f) = &file {
        scope.track(f);
    }
    let result = update_image_in_scope(st, user_id, kind, file.as_ref(), &mut scope).await;
    let (user, previous) = scope.finish(result).await?;

    if let Some(old) = previous.filter(|old| !old.is_empty()) {
        if let Err(e) = st.uploads.delete_by_url(&old).await {
            warn!(error = %e, url = %old, "could not delete previous image");
        }
    }
    info!(%user_id, ?kind, "profile image updated");
    Ok(user)
}

async fn update_image_in_scope(
    st: &AppState,
    user_id: Uuid,
    kind: ProfileImage,
    file: Option<&StagedFile>,
    scope: &mut UploadScope,
) -> AppResult<(PublicUser, Option<String>)> {
    let file = file.ok_or_else(|| AppError::validation(format!("{} file is missing", kind.field())))?;
    let current = load_caller(st, user_id).await?;

    let obj = scope.upload(file, kind.folder()).await?;
    let (patch, previous) = match kind {
        ProfileImage::Avatar => (
            UserPatch {
                avatar: Some(obj.url),
                ..UserPatch::default()
            },
            Some(current.avatar),
        ),
        ProfileImage::Cover => (
            UserPatch {
                cover_image: Some(obj.url),
                ..UserPatch::default()
            },
            current.cover_image,
        ),
    };

    let user = st
        .users
        .update_fields(user_id, patch)
        .await?
        .ok_or_else(|| AppError::unauthenticated("Invalid access token"))?;
    Ok((PublicUser::from(user), previous))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{storage::StorageClient, testing::Harness, users::repo::UserStore};

    fn alice_fields() -> RegisterInput {
        RegisterInput {
            username: "Alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice Liddell".into(),
            password: "Secr3t!".into(),
            avatar: None,
            cover_image: None,
        }
    }

    fn alice(h: &Harness) -> RegisterInput {
        RegisterInput {
            avatar: Some(h.dir.stage("avatar", "alice.png", b"avatar-bytes")),
            ..alice_fields()
        }
    }

    async fn registered(h: &Harness) -> PublicUser {
        register(&h.state, alice(h)).await.expect("register alice")
    }

    async fn logged_in(h: &Harness) -> (PublicUser, TokenPair) {
        registered(h).await;
        login(
            &h.state,
            LoginRequest {
                username: Some("alice".into()),
                email: None,
                password: "Secr3t!".into(),
            },
        )
        .await
        .expect("login alice")
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@"));
        assert!(!is_valid_email("no spaces@example.com"));
    }

    #[tokio::test]
    async fn register_creates_user_with_avatar_and_hashed_password() {
        let h = Harness::new();
        let user = registered(&h).await;

        assert_eq!(user.username, "alice");
        assert!(!user.avatar.is_empty());
        assert!(user.cover_image.is_none());
        assert_eq!(h.storage.object_count(), 1);
        assert_eq!(h.dir.file_count(), 0);

        let stored = h.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "Secr3t!");
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn register_with_cover_image_uploads_both() {
        let h = Harness::new();
        let mut input = alice(&h);
        input.cover_image = Some(h.dir.stage("coverImage", "cover.jpg", b"cover-bytes"));

        let user = register(&h.state, input).await.unwrap();

        assert!(user.cover_image.is_some());
        assert_eq!(h.storage.object_count(), 2);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts_and_leaves_nothing_behind() {
        let h = Harness::new();
        registered(&h).await;

        let mut dup = alice(&h);
        dup.email = "someone-else@example.com".into();
        let err = register(&h.state, dup).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.users.user_count(), 1);
        assert_eq!(h.storage.object_count(), 1);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_any_side_effect() {
        let h = Harness::new();
        let mut input = alice(&h);
        input.full_name = "   ".into();
        input.cover_image = Some(h.dir.stage("coverImage", "cover.jpg", b"c"));

        let err = register(&h.state, input).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.storage.object_count(), 0);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn missing_avatar_is_a_validation_error() {
        let h = Harness::new();
        let input = RegisterInput {
            cover_image: Some(h.dir.stage("coverImage", "cover.jpg", b"c")),
            ..alice_fields()
        };

        let err = register(&h.state, input).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(ref m) if m.contains("Avatar")));
        assert_eq!(h.storage.object_count(), 0);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn cover_upload_failure_rolls_back_avatar() {
        let h = Harness::new();
        h.storage.fail_puts_after(1);
        let mut input = alice(&h);
        input.cover_image = Some(h.dir.stage("coverImage", "cover.jpg", b"c"));

        let err = register(&h.state, input).await.unwrap_err();

        assert!(matches!(err, AppError::UploadFailed(_)));
        assert_eq!(h.storage.object_count(), 0);
        assert_eq!(h.users.user_count(), 0);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_rolls_back_uploads() {
        let h = Harness::new();
        h.users.fail_create.store(true, Ordering::SeqCst);
        let mut input = alice(&h);
        input.cover_image = Some(h.dir.stage("coverImage", "cover.jpg", b"c"));

        let err = register(&h.state, input).await.unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(h.storage.object_count(), 0);
        assert_eq!(h.storage.deleted_keys().len(), 2);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn failed_read_back_removes_record_and_media() {
        let h = Harness::new();
        h.users.hide_created.store(true, Ordering::SeqCst);

        let err = register(&h.state, alice(&h)).await.unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(h.users.user_count(), 0);
        assert_eq!(h.storage.object_count(), 0);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn login_with_email_or_username() {
        let h = Harness::new();
        registered(&h).await;

        let (user, pair) = login(
            &h.state,
            LoginRequest {
                username: None,
                email: Some(" ALICE@example.com ".into()),
                password: "Secr3t!".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(user.username, "alice");
        let stored = h.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let h = Harness::new();
        registered(&h).await;

        let wrong_password = login(
            &h.state,
            LoginRequest {
                username: Some("alice".into()),
                email: None,
                password: "nope".into(),
            },
        )
        .await
        .unwrap_err();
        let unknown_user = login(
            &h.state,
            LoginRequest {
                username: Some("mallory".into()),
                email: None,
                password: "nope".into(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(wrong_password, AppError::InvalidCredentials));
        assert!(matches!(unknown_user, AppError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn login_requires_identifier_and_password() {
        let h = Harness::new();
        let no_id = login(&h.state, LoginRequest { password: "x".into(), ..Default::default() }).await;
        let no_pw = login(
            &h.state,
            LoginRequest {
                username: Some("alice".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(no_id, Err(AppError::Validation(_))));
        assert!(matches!(no_pw, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_token_is_revoked() {
        let h = Harness::new();
        let (_, pair) = logged_in(&h).await;

        let next = refresh(&h.state, Some(pair.refresh_token.clone())).await.unwrap();
        let replay = refresh(&h.state, Some(pair.refresh_token)).await.unwrap_err();

        assert!(matches!(replay, AppError::ExpiredOrRevoked));
        refresh(&h.state, Some(next.refresh_token)).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_without_token_is_unauthenticated() {
        let h = Harness::new();
        let err = refresh(&h.state, Some("  ".into())).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let h = Harness::new();
        let (user, pair) = logged_in(&h).await;

        logout(&h.state, user.id).await.unwrap();

        let err = refresh(&h.state, Some(pair.refresh_token)).await.unwrap_err();
        assert!(matches!(err, AppError::ExpiredOrRevoked));
    }

    #[tokio::test]
    async fn change_password_to_same_value_is_rejected_without_writes() {
        let h = Harness::new();
        let user = registered(&h).await;
        let writes_before = h.users.update_calls.load(Ordering::SeqCst);

        let err = change_password(
            &h.state,
            user.id,
            ChangePasswordRequest {
                current_password: "Secr3t!".into(),
                new_password: "Secr3t!".into(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.users.update_calls.load(Ordering::SeqCst), writes_before);
    }

    #[tokio::test]
    async fn change_password_verifies_current_and_stores_new_hash() {
        let h = Harness::new();
        let user = registered(&h).await;

        let wrong = change_password(
            &h.state,
            user.id,
            ChangePasswordRequest {
                current_password: "guess".into(),
                new_password: "N3w-pass".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(wrong, AppError::InvalidCredentials));

        change_password(
            &h.state,
            user.id,
            ChangePasswordRequest {
                current_password: "Secr3t!".into(),
                new_password: "N3w-pass".into(),
            },
        )
        .await
        .unwrap();

        let stored = h.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "N3w-pass");
        assert!(password::verify("N3w-pass".into(), stored.password_hash).await.unwrap());
    }

    #[tokio::test]
    async fn current_user_for_deleted_account_is_unauthenticated() {
        let h = Harness::new();
        let user = registered(&h).await;
        assert_eq!(current_user(&h.state, user.id).await.unwrap().id, user.id);

        h.users.delete_by_id(user.id).await.unwrap();
        let err = current_user(&h.state, user.id).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn update_account_normalizes_and_checks_other_users() {
        let h = Harness::new();
        let user = registered(&h).await;
        let mut bob = alice(&h);
        bob.username = "bob".into();
        bob.email = "bob@example.com".into();
        register(&h.state, bob).await.unwrap();

        let updated = update_account(
            &h.state,
            user.id,
            UpdateAccountRequest {
                username: "  Alice2 ".into(),
                email: "ALICE@example.com".into(),
                full_name: Some("Alice L.".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.username, "alice2");
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.full_name, "Alice L.");

        let clash = update_account(
            &h.state,
            user.id,
            UpdateAccountRequest {
                username: "alice2".into(),
                email: "bob@example.com".into(),
                full_name: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(clash, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_avatar_replaces_and_deletes_previous_object() {
        let h = Harness::new();
        let user = registered(&h).await;
        let old_key = h.storage.key_from_url(&user.avatar).unwrap();

        let file = h.dir.stage("avatar", "new.png", b"new-avatar");
        let updated = update_image(&h.state, user.id, ProfileImage::Avatar, Some(file))
            .await
            .unwrap();

        assert_ne!(updated.avatar, user.avatar);
        assert!(!h.storage.contains(&old_key));
        assert_eq!(h.storage.object_count(), 1);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn update_cover_without_previous_image() {
        let h = Harness::new();
        let user = registered(&h).await;

        let file = h.dir.stage("coverImage", "cover.png", b"cover");
        let updated = update_image(&h.state, user.id, ProfileImage::Cover, Some(file))
            .await
            .unwrap();

        assert!(updated.cover_image.is_some());
        assert_eq!(updated.avatar, user.avatar);
        assert_eq!(h.storage.object_count(), 2);
        assert!(h.storage.deleted_keys().is_empty());
    }

    #[tokio::test]
    async fn failed_avatar_upload_keeps_previous_image() {
        let h = Harness::new();
        let user = registered(&h).await;
        h.storage.fail_puts_after(0);

        let file = h.dir.stage("avatar", "new.png", b"new-avatar");
        let err = update_image(&h.state, user.id, ProfileImage::Avatar, Some(file))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadFailed(_)));
        let stored = h.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.avatar, user.avatar);
        assert_eq!(h.storage.object_count(), 1);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn update_image_requires_a_file() {
        let h = Harness::new();
        let user = registered(&h).await;
        let err = update_image(&h.state, user.id, ProfileImage::Cover, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_caught_by_store_rolls_back_uploads() {
        let h = Harness::new();
        registered(&h).await;
        h.users.skip_lookups.store(true, Ordering::SeqCst);

        let mut dup = alice(&h);
        dup.email = "other@example.com".into();
        dup.cover_image = Some(h.dir.stage("coverImage", "cover.jpg", b"c"));
        let err = register(&h.state, dup).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.users.user_count(), 1);
        assert_eq!(h.storage.object_count(), 1);
        assert_eq!(h.storage.deleted_keys().len(), 2);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_registrations_have_one_winner() {
        let h = Harness::new();
        let first = alice(&h);
        let mut second = alice(&h);
        second.email = "alice2@example.com".into();

        let (a, b) = tokio::join!(register(&h.state, first), register(&h.state, second));

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::Conflict(_)))));
        assert_eq!(h.users.user_count(), 1);
        assert_eq!(h.storage.object_count(), 1);
        assert_eq!(h.dir.file_count(), 0);
    }

    #[tokio::test]
    async fn failed_avatar_persist_removes_new_object_and_keeps_old() {
        let h = Harness::new();
        let user = registered(&h).await;
        let old_key = h.storage.key_from_url(&user.avatar).unwrap();
        h.users.fail_update.store(true, Ordering::SeqCst);

        let file = h.dir.stage("avatar", "new.png", b"new-avatar");
        let err = update_image(&h.state, user.id, ProfileImage::Avatar, Some(file))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(h.storage.object_count(), 1);
        assert!(h.storage.contains(&old_key));
        let stored = h.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.avatar, user.avatar);
        assert_eq!(h.dir.file_count(), 0);
    }
}
