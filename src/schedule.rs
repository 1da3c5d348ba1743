//! Clinic slot grid.
//!
//! The clinic works in fixed-length slots starting at opening time. A slot is
//! only offered if it ends by closing time, so with the default 09:00-12:20
//! hours and 20-minute slots the last bookable slot is 12:00.

use chrono::{Duration, NaiveTime, Timelike};
use thiserror::Error;

const DEFAULT_OPEN_MIN: u32 = 9 * 60;
const DEFAULT_CLOSE_MIN: u32 = 12 * 60 + 20;
const DEFAULT_SLOT_MINUTES: u32 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("slot length must be greater than zero")]
    ZeroSlot,
    #[error("no {slot_minutes}-minute slot fits between {open} and {close}")]
    NoRoom {
        open: String,
        close: String,
        slot_minutes: u32,
    },
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicHours {
    open_min: u32,
    close_min: u32,
    slot_minutes: u32,
}

impl Default for ClinicHours {
    fn default() -> Self {
        Self {
            open_min: DEFAULT_OPEN_MIN,
            close_min: DEFAULT_CLOSE_MIN,
            slot_minutes: DEFAULT_SLOT_MINUTES,
        }
    }
}

fn minutes_of(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

fn time_of(minutes: u32) -> NaiveTime {
    NaiveTime::default() + Duration::minutes(i64::from(minutes))
}

impl ClinicHours {
    pub fn new(open: NaiveTime, close: NaiveTime, slot_minutes: u32) -> Result<Self, ScheduleError> {
        if slot_minutes == 0 {
            return Err(ScheduleError::ZeroSlot);
        }
        let open_min = minutes_of(open);
        let close_min = minutes_of(close);
        if open_min + slot_minutes > close_min {
            return Err(ScheduleError::NoRoom {
                open: format_slot(open),
                close: format_slot(close),
                slot_minutes,
            });
        }
        Ok(Self {
            open_min,
            close_min,
            slot_minutes,
        })
    }

    pub fn open(&self) -> NaiveTime {
        time_of(self.open_min)
    }

    pub fn close(&self) -> NaiveTime {
        time_of(self.close_min)
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    /// Start times of every bookable slot, in order.
    pub fn slots(&self) -> Vec<NaiveTime> {
        (self.open_min..)
            .step_by(self.slot_minutes as usize)
            .take_while(|m| m + self.slot_minutes <= self.close_min)
            .map(time_of)
            .collect()
    }

    /// True when `t` is the start of a bookable slot.
    pub fn is_slot(&self, t: NaiveTime) -> bool {
        if t.second() != 0 || t.nanosecond() != 0 {
            return false;
        }
        let m = minutes_of(t);
        m >= self.open_min
            && (m - self.open_min) % self.slot_minutes == 0
            && m + self.slot_minutes <= self.close_min
    }
}

pub fn format_slot(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_slot(s: &str) -> Result<NaiveTime, ScheduleError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ScheduleError::InvalidTime(s.to_string()))
}
