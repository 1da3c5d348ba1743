// src/routes/user_routes.rs

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::de::Deserializer;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Role, UserProfile, UserRow},
    routes::auth_routes::{clean_optional, load_user},
};

const MAX_FIELD_LEN: usize = 120;

pub fn router() -> Router<AppState> {
    Router::new()
        // /api/v1/users/{user_id}
        .route("/{user_id}", get(get_user).put(update_user))
}

fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // Only called when the field is present:
    // null => Some(None), value => Some(Some(value)).
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

/// Absent field = keep, `null` = clear, value = set.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub place: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub specialization: Option<Option<String>>,
}

/// Flattens a patch field into (present, cleaned value) for SQL binding.
fn patch_field(field: Option<Option<String>>, name: &str) -> Result<(bool, Option<String>), ApiError> {
    match field {
        None => Ok((false, None)),
        Some(v) => {
            let v = clean_optional(v);
            if v.as_ref().is_some_and(|s| s.chars().count() > MAX_FIELD_LEN) {
                return Err(ApiError::validation(format!(
                    "{name} is too long (max {MAX_FIELD_LEN})"
                )));
            }
            Ok((true, v))
        }
    }
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    auth.ensure_self(user_id, "profile")?;

    let user = load_user(&state, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("USER_NOT_FOUND", "User not found".into()))?;

    Ok(Json(ApiOk { data: user.into() }))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateProfileRequest>, ApiError>,
) -> Result<Json<ApiOk<UserProfile>>, ApiError> {
    auth.ensure_self(user_id, "profile")?;

    if auth.role != Role::Doctor && req.specialization.as_ref().is_some_and(|s| s.is_some()) {
        return Err(ApiError::validation("only doctors have a specialization"));
    }

    let (set_phone, phone) = patch_field(req.phone, "phone")?;
    let (set_place, place) = patch_field(req.place, "place")?;
    let (set_spec, specialization) = patch_field(req.specialization, "specialization")?;

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        UPDATE app_user
        SET
          phone          = CASE WHEN $2 THEN $3 ELSE phone END,
          place          = CASE WHEN $4 THEN $5 ELSE place END,
          specialization = CASE WHEN $6 THEN $7 ELSE specialization END
        WHERE user_id = $1
        RETURNING user_id, name, email, password_hash, role, phone, place, specialization
        "#,
    )
    .bind(user_id)
    .bind(set_phone)
    .bind(phone)
    .bind(set_place)
    .bind(place)
    .bind(set_spec)
    .bind(specialization)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::NotFound("USER_NOT_FOUND", "User not found".into()))?;

    tracing::info!(user_id = %user_id, "profile updated");

    Ok(Json(ApiOk { data: user.into() }))
}
