use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role};

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub session_token_id: Uuid,
}

impl AuthContext {
    pub fn is_doctor(&self) -> bool {
        self.role == Role::Doctor
    }

    pub fn is_patient(&self) -> bool {
        self.role == Role::Patient
    }

    /// Callers may only act on their own user id.
    pub fn ensure_self(&self, user_id: Uuid, what: &str) -> Result<(), ApiError> {
        if self.user_id == user_id {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                format!("You can only manage your own {what}"),
            ))
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    role: Role,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
            TypedHeader::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::session_expired())?;

        let token_hash = hash_access_token(authz.token());

        let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
            r#"
            SELECT st.session_token_id, st.user_id, u.role
            FROM session_token st
            JOIN app_user u ON u.user_id = st.user_id
            WHERE st.session_token_hash = $1
              AND st.revoked_at IS NULL
              AND st.expires_at > now()
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(ApiError::session_expired)?;

        // best-effort
        if let Err(e) = sqlx::query(
            r#"
            UPDATE session_token
            SET last_seen_at = now()
            WHERE session_token_id = $1
            "#,
        )
        .bind(row.session_token_id)
        .execute(&state.db)
        .await
        {
            tracing::warn!(error = %e, session_token_id = %row.session_token_id, "failed to touch session");
        }

        Ok(AuthContext {
            user_id: row.user_id,
            role: row.role,
            session_token_id: row.session_token_id,
        })
    }
}
