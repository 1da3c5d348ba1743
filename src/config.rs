use std::env;

use anyhow::Context;

use crate::schedule::{ClinicHours, parse_slot};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub db_max_connections: u32,
    pub clinic: ClinicHours,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = session_ttl_hours(env::var("SESSION_TTL_HOURS").ok().as_deref())?;
        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);

        let clinic = clinic_hours(
            env::var("CLINIC_OPEN").ok().as_deref(),
            env::var("CLINIC_CLOSE").ok().as_deref(),
            env::var("SLOT_MINUTES").ok().as_deref(),
        )?;

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            db_max_connections,
            clinic,
        })
    }
}

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

/// Session lifetime in hours. Anything outside 1..=MAX_SESSION_TTL_HOURS
/// fails startup; an out-of-range value would overflow the expiry timestamp.
fn session_ttl_hours(raw: Option<&str>) -> anyhow::Result<i64> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_SESSION_TTL_HOURS);
    };
    let hours = raw
        .trim()
        .parse::<i64>()
        .with_context(|| format!("SESSION_TTL_HOURS must be a whole number, got {raw:?}"))?;
    if !(1..=MAX_SESSION_TTL_HOURS).contains(&hours) {
        anyhow::bail!("SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}, got {hours}");
    }
    Ok(hours)
}

/// Builds clinic hours from optional overrides, falling back to the defaults
/// for anything unset. Malformed values are an error rather than a silent default.
fn clinic_hours(
    open: Option<&str>,
    close: Option<&str>,
    slot_minutes: Option<&str>,
) -> anyhow::Result<ClinicHours> {
    let defaults = ClinicHours::default();
    if open.is_none() && close.is_none() && slot_minutes.is_none() {
        return Ok(defaults);
    }

    let open = match open {
        Some(s) => parse_slot(s).context("CLINIC_OPEN")?,
        None => defaults.open(),
    };
    let close = match close {
        Some(s) => parse_slot(s).context("CLINIC_CLOSE")?,
        None => defaults.close(),
    };
    let slot_minutes = match slot_minutes {
        Some(s) => s
            .trim()
            .parse::<u32>()
            .with_context(|| format!("SLOT_MINUTES must be a whole number, got {s:?}"))?,
        None => defaults.slot_minutes(),
    };

    Ok(ClinicHours::new(open, close, slot_minutes)?)
}
