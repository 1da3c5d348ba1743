use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::schedule::{ClinicHours, format_slot};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub clinic: ClinicHours,
}

/* -------------------------
   Enums stored as smallint
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Doctor = 1,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            _ => Err(format!("invalid role {s:?}, expected patient or doctor")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[repr(i16)]
pub enum AppointmentStatus {
    Pending = 0,
    Confirmed = 1,
    Cancelled = 2,
    Completed = 3,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pending",
            AppointmentStatus::Confirmed => "Confirmed",
            AppointmentStatus::Cancelled => "Cancelled",
            AppointmentStatus::Completed => "Completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "cancelled" | "canceled" => Ok(AppointmentStatus::Cancelled),
            "completed" => Ok(AppointmentStatus::Completed),
            _ => Err(format!(
                "invalid status {s:?}, expected Pending, Confirmed, Cancelled or Completed"
            )),
        }
    }
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub phone: Option<String>,
    pub place: Option<String>,
    pub specialization: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct DoctorSummary {
    pub id: Uuid,
    pub name: String,
    pub specialization: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub date: NaiveDate,
    pub slot_time: String,
    pub age: i16,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub place: Option<String>,
    pub specialization: Option<String>,
}

impl From<UserRow> for UserProfile {
    fn from(u: UserRow) -> Self {
        UserProfile {
            id: u.user_id,
            name: u.name,
            email: u.email,
            role: u.role,
            phone: u.phone,
            place: u.place,
            specialization: u.specialization,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub appointment_date: NaiveDate,
    pub slot_time: NaiveTime,
    pub age: i16,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AppointmentRow> for AppointmentDto {
    fn from(r: AppointmentRow) -> Self {
        AppointmentDto {
            id: r.appointment_id,
            doctor_id: r.doctor_id,
            doctor_name: r.doctor_name,
            patient_id: r.patient_id,
            patient_name: r.patient_name,
            date: r.appointment_date,
            slot_time: format_slot(r.slot_time),
            age: r.age,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Columns for `AppointmentRow`; callers alias appointment as `a` and the
/// doctor's app_user row as `d`.
pub const APPOINTMENT_COLUMNS: &str = r#"
    a.appointment_id,
    a.doctor_id,
    d.name AS doctor_name,
    a.patient_id,
    a.patient_name,
    a.appointment_date,
    a.slot_time,
    a.age,
    a.status,
    a.created_at,
    a.updated_at
"#;
