// src/routes/doctor_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, DoctorSummary},
    routes::{parse_date, today},
    schedule::format_slot,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctors", get(list_doctors))
        .route("/doctors/leaves", get(list_upcoming_leaves))
        .route("/doctors/{doctor_id}/leaves", get(list_doctor_leaves))
        .route("/doctors/{doctor_id}/leave", put(update_leave))
        .route("/doctors/{doctor_id}/booked", get(get_booked_slots))
        .route("/doctors/{doctor_id}/slots", get(get_slot_grid))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UpcomingLeaveDto {
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct LeaveDto {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaveRequest {
    pub date: Option<String>,
    pub is_on_leave: bool,
}

#[derive(Debug, Serialize)]
pub struct LeaveUpdateData {
    pub is_on_leave: bool,
    pub date: Option<NaiveDate>,
    pub changed: u64,
    /// Non-cancelled appointments already booked on the new leave day.
    pub conflicting_appointments: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BookedData {
    pub date: NaiveDate,
    pub is_on_leave: bool,
    pub slots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SlotDto {
    pub time: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct SlotGridData {
    pub date: NaiveDate,
    pub is_on_leave: bool,
    pub slots: Vec<SlotDto>,
}

/* ============================================================
   Shared lookups
   ============================================================ */

fn doctor_not_found() -> ApiError {
    ApiError::NotFound("DOCTOR_NOT_FOUND", "Doctor not found".into())
}

pub(crate) async fn ensure_doctor(state: &AppState, doctor_id: Uuid) -> Result<(), ApiError> {
    let found: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id
        FROM app_user
        WHERE user_id = $1
          AND role = 1
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?;

    found.map(|_| ()).ok_or_else(doctor_not_found)
}

async fn is_on_leave(state: &AppState, doctor_id: Uuid, date: NaiveDate) -> Result<bool, ApiError> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1 FROM doctor_leave
          WHERE doctor_id = $1 AND leave_date = $2
        )
        "#,
    )
    .bind(doctor_id)
    .bind(date)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)
}

async fn booked_times(state: &AppState, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<NaiveTime>, ApiError> {
    sqlx::query_scalar(
        r#"
        SELECT slot_time
        FROM appointment
        WHERE doctor_id = $1
          AND appointment_date = $2
          AND status <> 2
        ORDER BY slot_time ASC
        "#,
    )
    .bind(doctor_id)
    .bind(date)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

fn required_date(q: &DateQuery) -> Result<NaiveDate, ApiError> {
    match q.date.as_deref() {
        Some(s) => parse_date(s, "date"),
        None => Err(ApiError::validation("date is required (YYYY-MM-DD)")),
    }
}

/* ============================================================
   GET /doctors
   ============================================================ */

pub async fn list_doctors(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<DoctorSummary>>>, ApiError> {
    let rows: Vec<DoctorSummary> = sqlx::query_as::<_, DoctorSummary>(
        r#"
        SELECT user_id AS id, name, specialization
        FROM app_user
        WHERE role = 1
        ORDER BY name ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   Leaves
   ============================================================ */

pub async fn list_upcoming_leaves(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<UpcomingLeaveDto>>>, ApiError> {
    let rows: Vec<UpcomingLeaveDto> = sqlx::query_as::<_, UpcomingLeaveDto>(
        r#"
        SELECT l.doctor_id, u.name AS doctor_name, l.leave_date AS date
        FROM doctor_leave l
        JOIN app_user u ON u.user_id = l.doctor_id
        WHERE l.leave_date >= $1
        ORDER BY l.leave_date ASC, u.name ASC
        "#,
    )
    .bind(today())
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn list_doctor_leaves(
    State(state): State<AppState>,
    _auth: AuthContext,
    WithRejection(Path(doctor_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<Json<ApiOk<Vec<LeaveDto>>>, ApiError> {
    ensure_doctor(&state, doctor_id).await?;

    let dates: Vec<NaiveDate> = sqlx::query_scalar(
        r#"
        SELECT leave_date
        FROM doctor_leave
        WHERE doctor_id = $1
        ORDER BY leave_date ASC
        "#,
    )
    .bind(doctor_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: dates.into_iter().map(|date| LeaveDto { date }).collect(),
    }))
}

/// PUT /doctors/{doctor_id}/leave
///
/// - `is_on_leave: true` + date: mark the day as leave (idempotent)
/// - `is_on_leave: false` + date: remove that day
/// - `is_on_leave: false` without date: clear every leave day
pub async fn update_leave(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Path(doctor_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(req), _): WithRejection<Json<LeaveRequest>, ApiError>,
) -> Result<Json<ApiOk<LeaveUpdateData>>, ApiError> {
    if !auth.is_doctor() {
        return Err(ApiError::Forbidden("FORBIDDEN", "Only doctors can manage leave".into()));
    }
    auth.ensure_self(doctor_id, "leave")?;

    let date = req
        .date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_date(s, "date"))
        .transpose()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    // Serializes with bookings for the same doctor.
    let locked: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id FROM app_user
        WHERE user_id = $1 AND role = 1
        FOR UPDATE
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    if locked.is_none() {
        return Err(doctor_not_found());
    }

    let data = match (req.is_on_leave, date) {
        (true, None) => {
            return Err(ApiError::validation("date is required when applying leave"));
        }
        (true, Some(date)) => {
            if date < today() {
                return Err(ApiError::validation("cannot apply leave for a past date"));
            }
            let res = sqlx::query(
                r#"
                INSERT INTO doctor_leave (doctor_id, leave_date)
                VALUES ($1, $2)
                ON CONFLICT (doctor_id, leave_date) DO NOTHING
                "#,
            )
            .bind(doctor_id)
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db)?;

            let conflicting: i64 = sqlx::query_scalar(
                r#"
                SELECT count(*)
                FROM appointment
                WHERE doctor_id = $1
                  AND appointment_date = $2
                  AND status IN (0, 1)
                "#,
            )
            .bind(doctor_id)
            .bind(date)
            .fetch_one(&mut *tx)
            .await
            .map_err(ApiError::db)?;

            LeaveUpdateData {
                is_on_leave: true,
                date: Some(date),
                changed: res.rows_affected(),
                conflicting_appointments: conflicting,
                message: format!("Leave added for {date}"),
            }
        }
        (false, Some(date)) => {
            let res = sqlx::query(
                r#"
                DELETE FROM doctor_leave
                WHERE doctor_id = $1 AND leave_date = $2
                "#,
            )
            .bind(doctor_id)
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db)?;

            LeaveUpdateData {
                is_on_leave: false,
                date: Some(date),
                changed: res.rows_affected(),
                conflicting_appointments: 0,
                message: format!("Leave removed for {date}"),
            }
        }
        (false, None) => {
            let res = sqlx::query(r#"DELETE FROM doctor_leave WHERE doctor_id = $1"#)
                .bind(doctor_id)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::db)?;

            LeaveUpdateData {
                is_on_leave: false,
                date: None,
                changed: res.rows_affected(),
                conflicting_appointments: 0,
                message: "All leaves cleared".into(),
            }
        }
    };

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        doctor_id = %doctor_id,
        is_on_leave = data.is_on_leave,
        date = ?data.date,
        changed = data.changed,
        "leave updated"
    );

    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Slots
   ============================================================ */

pub async fn get_booked_slots(
    State(state): State<AppState>,
    _auth: AuthContext,
    WithRejection(Path(doctor_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Query(q), _): WithRejection<Query<DateQuery>, ApiError>,
) -> Result<Json<ApiOk<BookedData>>, ApiError> {
    let date = required_date(&q)?;
    ensure_doctor(&state, doctor_id).await?;

    if is_on_leave(&state, doctor_id, date).await? {
        return Ok(Json(ApiOk {
            data: BookedData {
                date,
                is_on_leave: true,
                slots: vec![],
            },
        }));
    }

    let slots = booked_times(&state, doctor_id, date)
        .await?
        .into_iter()
        .map(format_slot)
        .collect();

    Ok(Json(ApiOk {
        data: BookedData {
            date,
            is_on_leave: false,
            slots,
        },
    }))
}

pub async fn get_slot_grid(
    State(state): State<AppState>,
    _auth: AuthContext,
    WithRejection(Path(doctor_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Query(q), _): WithRejection<Query<DateQuery>, ApiError>,
) -> Result<Json<ApiOk<SlotGridData>>, ApiError> {
    let date = required_date(&q)?;
    ensure_doctor(&state, doctor_id).await?;

    let on_leave = is_on_leave(&state, doctor_id, date).await?;
    let booked = if on_leave {
        vec![]
    } else {
        booked_times(&state, doctor_id, date).await?
    };

    Ok(Json(ApiOk {
        data: SlotGridData {
            date,
            is_on_leave: on_leave,
            slots: build_grid(&state.clinic.slots(), &booked, on_leave),
        },
    }))
}

fn build_grid(grid: &[NaiveTime], booked: &[NaiveTime], on_leave: bool) -> Vec<SlotDto> {
    grid.iter()
        .map(|t| SlotDto {
            time: format_slot(*t),
            available: !on_leave && !booked.contains(t),
        })
        .collect()
}
