//! `/api/v1/auth`: registration, login, profile and identity endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::auth::{hash_password, verify_password, AuthUser, MaybeUser};
use crate::db::is_constraint_violation;
use crate::db::users::{NewUser, ProfileUpdate};
use crate::domain::{User, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::protocol::{LoginIn, MeOut, MeUser, MessageOut, ProfileUpdateIn, RegisterIn, TokenOut, UserProfile};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(profile).put(update_profile))
        .route("/users", get(list_users))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// A concurrent registration can win between the existence check and the insert.
fn registration_error(e: rusqlite::Error) -> ApiError {
    if is_constraint_violation(&e) {
        warn!(target: "auth", error = %e, "Registration lost a race on user_id");
        return ApiError::BadRequest("User ID already registered".into());
    }
    e.into()
}

fn token_for(state: &AppState, user: &User) -> ApiResult<TokenOut> {
    let access_token = state
        .jwt
        .issue(&user.user_id, user.role)
        .map_err(|e| ApiError::Internal(format!("Failed to issue token: {}", e)))?;
    Ok(TokenOut { access_token, token_type: "bearer", user: UserProfile::from(user) })
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn register(State(state): State<Arc<AppState>>, Json(body): Json<RegisterIn>) -> ApiResult<Json<TokenOut>> {
    let user_id = body.user_id.trim().to_string();
    let username = body.username.trim().to_string();
    if user_id.is_empty() || username.is_empty() {
        return Err(ApiError::BadRequest("user_id and username are required".into()));
    }
    if state.db.get_user(&user_id)?.is_some() {
        return Err(ApiError::BadRequest("User ID already registered".into()));
    }

    let mut role = body.role.as_deref().and_then(UserRole::parse).unwrap_or(UserRole::Child);
    if role == UserRole::Admin && state.db.admin_exists()? {
        warn!(target: "auth", %user_id, "Admin role requested but an admin already exists; registering as child");
        role = UserRole::Child;
    }

    let password_hash = match non_blank(body.password) {
        Some(pw) => Some(hash_password(&pw).map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))?),
        None => None,
    };

    let user = state.db.create_user(&NewUser {
        user_id,
        username,
        email: non_blank(body.email),
        password_hash,
        role,
        first_name: non_blank(body.first_name),
        last_name: non_blank(body.last_name),
    })
    .map_err(registration_error)?;
    info!(target: "auth", user_id = %user.user_id, role = user.role.as_str(), "User registered");
    Ok(Json(token_for(&state, &user)?))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn login(State(state): State<Arc<AppState>>, Json(body): Json<LoginIn>) -> ApiResult<Json<TokenOut>> {
    let rejected = || ApiError::Unauthorized("Incorrect user ID or password".into());
    let user = state
        .db
        .get_user(body.user_id.trim())?
        .filter(|u| u.is_active)
        .ok_or_else(rejected)?;

    let ok = match &user.password_hash {
        Some(hash) => verify_password(&body.password, hash),
        None => state.config.auth.allow_passwordless && body.password.is_empty(),
    };
    if !ok {
        warn!(target: "auth", user_id = %user.user_id, "Login rejected");
        return Err(rejected());
    }

    state.db.touch_last_login(&user.user_id)?;
    let user = state.db.get_user(&user.user_id)?.ok_or_else(rejected)?;
    info!(target: "auth", user_id = %user.user_id, "User logged in");
    Ok(Json(token_for(&state, &user)?))
}

#[instrument(level = "info", skip_all)]
pub async fn profile(AuthUser(user): AuthUser) -> Json<UserProfile> {
    Json(UserProfile::from(&user))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<ProfileUpdateIn>,
) -> ApiResult<Json<MessageOut>> {
    let update = ProfileUpdate {
        username: non_blank(body.username),
        email: non_blank(body.email),
        first_name: non_blank(body.first_name),
        last_name: non_blank(body.last_name),
        ui_language: non_blank(body.ui_language),
    };
    if !state.db.update_user_profile(&user.user_id, &update)? {
        return Err(ApiError::NotFound("User not found".into()));
    }
    Ok(Json(MessageOut::new("Profile updated successfully")))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn list_users(State(state): State<Arc<AppState>>, AuthUser(user): AuthUser) -> ApiResult<Json<Vec<UserProfile>>> {
    if !matches!(user.role, UserRole::Parent | UserRole::Admin) {
        return Err(ApiError::Forbidden("Insufficient permissions".into()));
    }
    let users = state.db.list_active_users()?;
    Ok(Json(users.iter().map(UserProfile::from).collect()))
}

pub async fn logout() -> Json<MessageOut> {
    Json(MessageOut::new("Successfully logged out"))
}

pub async fn me(MaybeUser(user): MaybeUser) -> Json<MeOut> {
    Json(MeOut {
        authenticated: user.is_some(),
        user: user.map(|u| MeUser { user_id: u.user_id, username: u.username, role: u.role }),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::registration_error;
    use crate::db::users::NewUser;
    use crate::domain::UserRole;
    use crate::error::ApiError;
    use crate::routes::build_router;
    use crate::routes::test_support::{register, send};
    use crate::state::AppState;

    #[test]
    fn duplicate_insert_maps_to_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(dir.path());
        let alice = NewUser {
            user_id: "alice".into(),
            username: "Alice".into(),
            email: None,
            password_hash: None,
            role: UserRole::Parent,
            first_name: None,
            last_name: None,
        };
        state.db.create_user(&alice).unwrap();

        let err = state.db.create_user(&alice).map_err(registration_error).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "User ID already registered"));

        let other = registration_error(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(other, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn register_login_profile_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(std::sync::Arc::new(AppState::for_tests(dir.path())));

        let token = register(&app, "alice", "parent").await;
        let (status, body) = send(&app, "GET", "/api/v1/auth/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "parent");
        assert!(body.get("password_hash").is_none());

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"user_id": "alice", "username": "again"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"user_id": "alice", "password": "wrong"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"user_id": "alice", "password": "secret-pass"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        assert!(body["user"]["last_login"].is_string());

        let (status, _) = send(
            &app,
            "PUT",
            "/api/v1/auth/profile",
            Some(&token),
            Some(json!({"username": "Alice B", "email": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, "GET", "/api/v1/auth/profile", Some(&token), None).await;
        assert_eq!(body["username"], "Alice B");
    }

    #[tokio::test]
    async fn second_admin_is_downgraded_and_roles_gate_user_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(std::sync::Arc::new(AppState::for_tests(dir.path())));

        let admin = register(&app, "root", "admin").await;
        let second = register(&app, "sneaky", "admin").await;
        let kid = register(&app, "kid", "astronaut").await;

        let (_, me) = send(&app, "GET", "/api/v1/auth/me", Some(&second), None).await;
        assert_eq!(me["user"]["role"], "child");
        let (_, me) = send(&app, "GET", "/api/v1/auth/me", Some(&kid), None).await;
        assert_eq!(me["user"]["role"], "child");

        let (status, users) = send(&app, "GET", "/api/v1/auth/users", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 3);
        let (status, _) = send(&app, "GET", "/api/v1/auth/users", Some(&kid), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_or_bad_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(std::sync::Arc::new(AppState::for_tests(dir.path())));

        let (status, body) = send(&app, "GET", "/api/v1/auth/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Not authenticated");

        let (status, body) = send(&app, "GET", "/api/v1/auth/profile", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Could not validate credentials");

        let (status, body) = send(&app, "GET", "/api/v1/auth/me", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], false);
        assert!(body["user"].is_null());
    }
}
