use axum::{Json, Router, extract::State, routing::get};
use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{APPOINTMENT_COLUMNS, ApiOk, AppState, AppointmentDto, AppointmentRow, AppointmentStatus, Role},
    routes::today,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub cancelled: i64,
    pub completed: i64,
}

impl StatusCounts {
    fn from_rows(rows: &[(AppointmentStatus, i64)]) -> Self {
        let mut c = StatusCounts::default();
        for (status, n) in rows {
            c.total += n;
            match status {
                AppointmentStatus::Pending => c.pending += n,
                AppointmentStatus::Confirmed => c.confirmed += n,
                AppointmentStatus::Cancelled => c.cancelled += n,
                AppointmentStatus::Completed => c.completed += n,
            }
        }
        c
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum DashboardData {
    Doctor {
        counts: StatusCounts,
        confirmed_today: i64,
        pending_requests: Vec<AppointmentDto>,
        upcoming_leaves: Vec<NaiveDate>,
    },
    Patient {
        counts: StatusCounts,
        next_appointment: Option<AppointmentDto>,
    },
}

async fn status_counts(state: &AppState, column: &str, auth: &AuthContext) -> Result<StatusCounts, ApiError> {
    let sql = format!(
        r#"
        SELECT status, count(*)
        FROM appointment
        WHERE {column} = $1
        GROUP BY status
        "#
    );
    let rows: Vec<(AppointmentStatus, i64)> = sqlx::query_as(&sql)
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(StatusCounts::from_rows(&rows))
}

pub async fn dashboard(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<DashboardData>>, ApiError> {
    let today = today();

    let data = match auth.role {
        Role::Doctor => {
            let counts = status_counts(&state, "doctor_id", &auth).await?;

            let confirmed_today: i64 = sqlx::query_scalar(
                r#"
                SELECT count(*)
                FROM appointment
                WHERE doctor_id = $1 AND appointment_date = $2 AND status = 1
                "#,
            )
            .bind(auth.user_id)
            .bind(today)
            .fetch_one(&state.db)
            .await
            .map_err(ApiError::db)?;

            let sql = format!(
                r#"
                SELECT {APPOINTMENT_COLUMNS}
                FROM appointment a
                JOIN app_user d ON d.user_id = a.doctor_id
                WHERE a.doctor_id = $1 AND a.status = 0
                ORDER BY a.created_at ASC
                "#
            );
            let pending: Vec<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&sql)
                .bind(auth.user_id)
                .fetch_all(&state.db)
                .await
                .map_err(ApiError::db)?;

            let upcoming_leaves: Vec<NaiveDate> = sqlx::query_scalar(
                r#"
                SELECT leave_date
                FROM doctor_leave
                WHERE doctor_id = $1 AND leave_date >= $2
                ORDER BY leave_date ASC
                "#,
            )
            .bind(auth.user_id)
            .bind(today)
            .fetch_all(&state.db)
            .await
            .map_err(ApiError::db)?;

            DashboardData::Doctor {
                counts,
                confirmed_today,
                pending_requests: pending.into_iter().map(AppointmentDto::from).collect(),
                upcoming_leaves,
            }
        }
        Role::Patient => {
            let counts = status_counts(&state, "patient_id", &auth).await?;

            let sql = format!(
                r#"
                SELECT {APPOINTMENT_COLUMNS}
                FROM appointment a
                JOIN app_user d ON d.user_id = a.doctor_id
                WHERE a.patient_id = $1
                  AND a.appointment_date >= $2
                  AND a.status IN (0, 1)
                ORDER BY a.appointment_date ASC, a.slot_time ASC
                LIMIT 1
                "#
            );
            let next: Option<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&sql)
                .bind(auth.user_id)
                .bind(today)
                .fetch_optional(&state.db)
                .await
                .map_err(ApiError::db)?;

            DashboardData::Patient {
                counts,
                next_appointment: next.map(AppointmentDto::from),
            }
        }
    };

    Ok(Json(ApiOk { data }))
}
