use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, verify_password},
    db::is_unique_violation,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData, Role, UserProfile, UserRow},
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/password", put(change_password))
}

/* -------------------------
   Request / response DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
    pub specialization: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: UserProfile,
    pub session: SessionInfo,
}

/* -------------------------
   Validation helpers
--------------------------*/

pub(crate) fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(ApiError::validation("a valid email is required"));
    }
    Ok(email)
}

fn validate_new_password(pw: &str) -> Result<(), ApiError> {
    if pw.trim().chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Trims an optional text field; blank becomes None.
pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) async fn load_user(state: &AppState, user_id: Uuid) -> Result<Option<UserRow>, ApiError> {
    sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, name, email, password_hash, role, phone, place, specialization
        FROM app_user
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)
}

async fn create_session<'e, E>(
    executor: E,
    user_id: Uuid,
    ttl_hours: i64,
) -> Result<(String, DateTime<Utc>), ApiError>
where
    E: sqlx::PgExecutor<'e>,
{
    let access_token = generate_access_token();
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let expires_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, expires_at)
        VALUES ($1, $2, $3)
        RETURNING expires_at
        "#,
    )
    .bind(user_id)
    .bind(hash_access_token(&access_token))
    .bind(expires_at)
    .fetch_one(executor)
    .await
    .map_err(ApiError::db)?;

    Ok((access_token, expires_at))
}

/* -------------------------
   Handlers
--------------------------*/

pub async fn signup(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<SignupRequest>, ApiError>,
) -> Result<(StatusCode, Json<ApiOk<SessionData>>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    let email = normalize_email(&req.email)?;
    validate_new_password(&req.password)?;

    let role = match req.role.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(r) => r.parse::<Role>().map_err(ApiError::validation)?,
        None => Role::Patient,
    };
    let specialization = clean_optional(req.specialization);
    if role == Role::Patient && specialization.is_some() {
        return Err(ApiError::validation("only doctors have a specialization"));
    }

    let password_hash = hash_password(&req.password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let existing: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM app_user
        WHERE lower(email) = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    if existing.is_some() {
        return Err(ApiError::BadRequest("USER_EXISTS", "User already exists".into()));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO app_user (name, email, password_hash, role, specialization)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING user_id, name, email, password_hash, role, phone, place, specialization
        "#,
    )
    .bind(name)
    .bind(&email)
    .bind(&password_hash)
    .bind(role)
    .bind(specialization)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e, "app_user_email_uq") {
            ApiError::BadRequest("USER_EXISTS", "User already exists".into())
        } else {
            ApiError::db(e)
        }
    })?;

    let (access_token, expires_at) = create_session(&mut *tx, user.user_id, state.session_ttl_hours).await?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(user_id = %user.user_id, role = %user.role, "user signed up");

    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: SessionData {
                access_token,
                expires_at,
                user: user.into(),
            },
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<Json<ApiOk<SessionData>>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, name, email, password_hash, role, phone, place, specialization
        FROM app_user
        WHERE lower(email) = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        tracing::warn!(user_id = %user.user_id, "login rejected: bad password");
        return Err(ApiError::invalid_credentials());
    }

    let (access_token, expires_at) = create_session(&state.db, user.user_id, state.session_ttl_hours).await?;

    Ok(Json(ApiOk {
        data: SessionData {
            access_token,
            expires_at,
            user: user.into(),
        },
    }))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let user = load_user(&state, auth.user_id)
        .await?
        .ok_or_else(ApiError::session_expired)?;

    let expires_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        SELECT expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk {
        data: MeData {
            user: user.into(),
            session: SessionInfo {
                session_token_id: auth.session_token_id,
                expires_at,
            },
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}

/// PUT /api/v1/auth/password
/// Other sessions are revoked together with the password change.
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Json(req), _): WithRejection<Json<ChangePasswordRequest>, ApiError>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    if req.current_password.is_empty() {
        return Err(ApiError::validation("current_password is required"));
    }
    validate_new_password(&req.new_password)?;

    let user = load_user(&state, auth.user_id)
        .await?
        .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.current_password, &user.password_hash) {
        return Err(ApiError::BadRequest(
            "INCORRECT_PASSWORD",
            "Incorrect current password".into(),
        ));
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE app_user
        SET password_hash = $1
        WHERE user_id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let revoked = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        user_id = %auth.user_id,
        revoked_sessions = revoked.rows_affected(),
        "password changed"
    );

    Ok(Json(ApiOk { data: OkData { ok: true } }))
}
