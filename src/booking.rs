//! Booking rules that do not need the database: request validation and the
//! appointment status state machine.

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AppointmentStatus, Role};
use crate::schedule::{ClinicHours, format_slot};

pub const MIN_AGE: i16 = 1;
pub const MAX_AGE: i16 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("age must be between 1 and 120")]
    InvalidAge,
    #[error("cannot book {0}, it is in the past")]
    PastDate(NaiveDate),
    #[error("{0} is not a bookable slot")]
    OffGrid(String),
    #[error("only the appointment's doctor or patient can change it")]
    NotParticipant,
    #[error("{party} cannot move an appointment from {from} to {to}")]
    InvalidTransition {
        party: &'static str,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::InvalidAge | BookingError::PastDate(_) | BookingError::OffGrid(_) => {
                ApiError::validation(e.to_string())
            }
            BookingError::NotParticipant => ApiError::Forbidden("FORBIDDEN", e.to_string()),
            BookingError::InvalidTransition { .. } => {
                ApiError::BadRequest("INVALID_TRANSITION", e.to_string())
            }
        }
    }
}

pub fn validate_booking(
    clinic: &ClinicHours,
    today: NaiveDate,
    date: NaiveDate,
    time: NaiveTime,
    age: i16,
) -> Result<(), BookingError> {
    if !(MIN_AGE..=MAX_AGE).contains(&age) {
        return Err(BookingError::InvalidAge);
    }
    if date < today {
        return Err(BookingError::PastDate(date));
    }
    if !clinic.is_slot(time) {
        return Err(BookingError::OffGrid(format_slot(time)));
    }
    Ok(())
}

/// How the caller relates to an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Doctor,
    Patient,
    Outsider,
}

impl Party {
    pub fn of(user_id: Uuid, role: Role, doctor_id: Uuid, patient_id: Uuid) -> Party {
        match role {
            Role::Doctor if user_id == doctor_id => Party::Doctor,
            Role::Patient if user_id == patient_id => Party::Patient,
            _ => Party::Outsider,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Party::Doctor => "doctor",
            Party::Patient => "patient",
            Party::Outsider => "outsider",
        }
    }
}

/// Doctors triage requests and close visits; patients may only withdraw.
pub fn check_transition(
    party: Party,
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), BookingError> {
    use AppointmentStatus::*;

    let allowed = match party {
        Party::Outsider => return Err(BookingError::NotParticipant),
        _ if from.is_terminal() => false,
        Party::Doctor => matches!(
            (from, to),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        ),
        Party::Patient => matches!((from, to), (Pending, Cancelled) | (Confirmed, Cancelled)),
    };

    if allowed {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition {
            party: party.label(),
            from,
            to,
        })
    }
}
