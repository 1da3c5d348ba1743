// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    booking::{BookingError, Party, check_transition, validate_booking},
    db::is_unique_violation,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{APPOINTMENT_COLUMNS, ApiOk, AppState, AppointmentDto, AppointmentRow, AppointmentStatus, Role},
    routes::{parse_date, parse_uuid, today},
    schedule::parse_slot,
};

const LIVE_SLOT_INDEX: &str = "appointment_live_slot_uq";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/{appointment_id}", get(get_appointment).put(update_status))
}

fn slot_taken() -> ApiError {
    ApiError::BadRequest("SLOT_TAKEN", "Slot already booked.".into())
}

fn not_found() -> ApiError {
    ApiError::NotFound("APPOINTMENT_NOT_FOUND", "Appointment not found".into())
}

async fn fetch_appointment<'e, E>(executor: E, appointment_id: Uuid) -> Result<Option<AppointmentRow>, ApiError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointment a
        JOIN app_user d ON d.user_id = a.doctor_id
        WHERE a.appointment_id = $1
        "#
    );
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .fetch_optional(executor)
        .await
        .map_err(ApiError::db)
}

/* ============================================================
   GET /appointments
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub doctor_id: Option<String>,
    pub patient_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct ListFilter {
    doctor_id: Option<Uuid>,
    patient_id: Option<Uuid>,
    status: Option<AppointmentStatus>,
}

/// Narrows the requested filter to what the caller may see: patients only
/// their own bookings, doctors only their own schedule.
fn scoped_filter(auth: &AuthContext, q: &ListQuery) -> Result<ListFilter, ApiError> {
    let doctor_id = q.doctor_id.as_deref().map(|s| parse_uuid(s, "doctor_id")).transpose()?;
    let patient_id = q.patient_id.as_deref().map(|s| parse_uuid(s, "patient_id")).transpose()?;
    let status = q
        .status
        .as_deref()
        .map(|s| s.parse::<AppointmentStatus>().map_err(ApiError::validation))
        .transpose()?;

    let forbidden = || {
        ApiError::Forbidden("FORBIDDEN", "You can only view your own appointments".into())
    };

    match auth.role {
        Role::Patient => {
            if patient_id.is_some_and(|id| id != auth.user_id) {
                return Err(forbidden());
            }
            Ok(ListFilter {
                doctor_id,
                patient_id: Some(auth.user_id),
                status,
            })
        }
        Role::Doctor => {
            if doctor_id.is_some_and(|id| id != auth.user_id) {
                return Err(forbidden());
            }
            Ok(ListFilter {
                doctor_id: Some(auth.user_id),
                patient_id,
                status,
            })
        }
    }
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Query(q), _): WithRejection<Query<ListQuery>, ApiError>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let filter = scoped_filter(&auth, &q)?;

    let sql = format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointment a
        JOIN app_user d ON d.user_id = a.doctor_id
        WHERE ($1::uuid IS NULL OR a.doctor_id = $1)
          AND ($2::uuid IS NULL OR a.patient_id = $2)
          AND ($3::smallint IS NULL OR a.status = $3)
        ORDER BY a.appointment_date DESC, a.slot_time ASC
        "#
    );
    let rows: Vec<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(filter.doctor_id)
        .bind(filter.patient_id)
        .bind(filter.status)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(AppointmentDto::from).collect(),
    }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Path(appointment_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let row = fetch_appointment(&state.db, appointment_id)
        .await?
        .ok_or_else(not_found)?;

    if Party::of(auth.user_id, auth.role, row.doctor_id, row.patient_id) == Party::Outsider {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "You can only view your own appointments".into(),
        ));
    }

    Ok(Json(ApiOk { data: row.into() }))
}

/* ============================================================
   POST /appointments (book)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: String,
    pub time: String,
    pub age: i32,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Json(req), _): WithRejection<Json<CreateAppointmentRequest>, ApiError>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentDto>>), ApiError> {
    if !auth.is_patient() {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only patients can book appointments".into(),
        ));
    }
    auth.ensure_self(req.patient_id, "appointments")?;

    let date = parse_date(&req.date, "date")?;
    let time = parse_slot(&req.time).map_err(|e| ApiError::validation(e.to_string()))?;
    let age = i16::try_from(req.age).map_err(|_| BookingError::InvalidAge)?;
    validate_booking(&state.clinic, today(), date, time, age)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    // Lock the doctor so leave changes and competing bookings for this
    // doctor wait for us.
    let locked: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT user_id FROM app_user
        WHERE user_id = $1 AND role = 1
        FOR UPDATE
        "#,
    )
    .bind(req.doctor_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    if locked.is_none() {
        return Err(ApiError::NotFound("DOCTOR_NOT_FOUND", "Doctor not found".into()));
    }

    let on_leave: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1 FROM doctor_leave
          WHERE doctor_id = $1 AND leave_date = $2
        )
        "#,
    )
    .bind(req.doctor_id)
    .bind(date)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    if on_leave {
        tracing::warn!(doctor_id = %req.doctor_id, %date, "booking rejected: doctor on leave");
        return Err(ApiError::BadRequest(
            "DOCTOR_ON_LEAVE",
            format!("Doctor is on leave on {date}."),
        ));
    }

    let taken: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1 FROM appointment
          WHERE doctor_id = $1
            AND appointment_date = $2
            AND slot_time = $3
            AND status <> 2
        )
        "#,
    )
    .bind(req.doctor_id)
    .bind(date)
    .bind(time)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    if taken {
        tracing::warn!(doctor_id = %req.doctor_id, %date, %time, "booking rejected: slot taken");
        return Err(slot_taken());
    }

    let patient_name: String = sqlx::query_scalar(r#"SELECT name FROM app_user WHERE user_id = $1"#)
        .bind(auth.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment
          (doctor_id, patient_id, patient_name, appointment_date, slot_time, age, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING appointment_id
        "#,
    )
    .bind(req.doctor_id)
    .bind(auth.user_id)
    .bind(&patient_name)
    .bind(date)
    .bind(time)
    .bind(age)
    .bind(AppointmentStatus::Pending)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e, LIVE_SLOT_INDEX) {
            slot_taken()
        } else {
            ApiError::db(e)
        }
    })?;

    let row = fetch_appointment(&mut *tx, appointment_id)
        .await?
        .ok_or_else(not_found)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        %appointment_id,
        doctor_id = %req.doctor_id,
        patient_id = %auth.user_id,
        %date,
        %time,
        "appointment booked"
    );

    Ok((StatusCode::CREATED, Json(ApiOk { data: row.into() })))
}

/* ============================================================
   PUT /appointments/{id} (status)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct StatusLockRow {
    doctor_id: Uuid,
    patient_id: Uuid,
    status: AppointmentStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    WithRejection(Path(appointment_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateStatusRequest>, ApiError>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let to: AppointmentStatus = req.status.parse().map_err(ApiError::validation)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current: StatusLockRow = sqlx::query_as::<_, StatusLockRow>(
        r#"
        SELECT doctor_id, patient_id, status
        FROM appointment
        WHERE appointment_id = $1
        FOR UPDATE
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(not_found)?;

    let party = Party::of(auth.user_id, auth.role, current.doctor_id, current.patient_id);
    check_transition(party, current.status, to)?;

    sqlx::query(
        r#"
        UPDATE appointment
        SET status = $2, updated_at = now()
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(to)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let row = fetch_appointment(&mut *tx, appointment_id)
        .await?
        .ok_or_else(not_found)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        %appointment_id,
        from = %current.status,
        to = %to,
        by = %auth.user_id,
        "appointment status changed"
    );

    Ok(Json(ApiOk { data: row.into() }))
}
