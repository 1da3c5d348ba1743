//! End-to-end request flows against a real Postgres.
//!
//! `#[sqlx::test]` creates a fresh database per test from `DATABASE_URL` and
//! applies `./migrations`. Run with `cargo test -- --ignored`.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Duration;
use serde_json::{Value, json};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use super::{router, today};
use crate::{models::AppState, schedule::ClinicHours};

fn app(pool: PgPool) -> Router {
    router(AppState {
        db: pool,
        session_ttl_hours: 24,
        clinic: ClinicHours::default(),
    })
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

struct Account {
    id: Uuid,
    token: String,
}

async fn signup(app: &Router, name: &str, role: &str) -> Account {
    let mut body = json!({
        "name": name,
        "email": format!("{}@clinic.test", name.to_lowercase()),
        "password": "password123",
        "role": role,
    });
    if role == "doctor" {
        body["specialization"] = json!("General Medicine");
    }
    let (status, resp) = call(app, "POST", "/api/v1/auth/signup", None, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{resp}");

    Account {
        id: resp["data"]["user"]["id"].as_str().unwrap().parse().unwrap(),
        token: resp["data"]["access_token"].as_str().unwrap().to_string(),
    }
}

fn day(offset: i64) -> String {
    (today() + Duration::days(offset)).format("%Y-%m-%d").to_string()
}

fn booking(patient: &Account, doctor: &Account, date: &str, time: &str) -> Value {
    json!({
        "patient_id": patient.id,
        "doctor_id": doctor.id,
        "date": date,
        "time": time,
        "age": 34,
    })
}

async fn book(app: &Router, patient: &Account, doctor: &Account, date: &str, time: &str) -> (StatusCode, Value) {
    call(
        app,
        "POST",
        "/api/v1/appointments",
        Some(&patient.token),
        Some(booking(patient, doctor, date, time)),
    )
    .await
}

async fn set_status(app: &Router, who: &Account, appointment_id: &str, status: &str) -> (StatusCode, Value) {
    call(
        app,
        "PUT",
        &format!("/api/v1/appointments/{appointment_id}"),
        Some(&who.token),
        Some(json!({ "status": status })),
    )
    .await
}

async fn set_leave(app: &Router, doctor: &Account, body: Value) -> (StatusCode, Value) {
    call(
        app,
        "PUT",
        &format!("/api/v1/doctors/{}/leave", doctor.id),
        Some(&doctor.token),
        Some(body),
    )
    .await
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn a_live_slot_can_be_booked_once(pool: PgPool) {
    let app = app(pool);
    let doctor = signup(&app, "Mehta", "doctor").await;
    let asha = signup(&app, "Asha", "patient").await;
    let ravi = signup(&app, "Ravi", "patient").await;
    let date = day(7);

    let (status, first) = book(&app, &asha, &doctor, &date, "09:20").await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["data"]["status"], "Pending");
    assert_eq!(first["data"]["patient_name"], "Asha");
    assert_eq!(first["data"]["slot_time"], "09:20");

    let (status, resp) = book(&app, &ravi, &doctor, &date, "09:20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"]["code"], "SLOT_TAKEN");

    let (_, booked) = call(
        &app,
        "GET",
        &format!("/api/v1/doctors/{}/booked?date={date}", doctor.id),
        Some(&ravi.token),
        None,
    )
    .await;
    assert_eq!(booked["data"]["slots"], json!(["09:20"]));

    // A cancelled booking frees the slot.
    let id = first["data"]["id"].as_str().unwrap();
    let (status, _) = set_status(&app, &asha, id, "cancelled").await;
    assert_eq!(status, StatusCode::OK);
    let (status, resp) = book(&app, &ravi, &doctor, &date, "09:20").await;
    assert_eq!(status, StatusCode::CREATED, "{resp}");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn concurrent_bookings_for_one_slot_admit_exactly_one(pool: PgPool) {
    let app = app(pool);
    let doctor = signup(&app, "Mehta", "doctor").await;
    let patient = signup(&app, "Asha", "patient").await;
    let body = booking(&patient, &doctor, &day(3), "09:20");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = app.clone();
        let token = patient.token.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            call(&app, "POST", "/api/v1/appointments", Some(&token), Some(body)).await
        }));
    }

    let mut created = 0;
    let mut taken = 0;
    for handle in handles {
        let (status, resp) = handle.await.unwrap();
        match status {
            StatusCode::CREATED => created += 1,
            StatusCode::BAD_REQUEST => {
                assert_eq!(resp["error"]["code"], "SLOT_TAKEN");
                taken += 1;
            }
            other => panic!("unexpected {other}: {resp}"),
        }
    }
    assert_eq!((created, taken), (1, 9));

    let (_, list) = call(&app, "GET", "/api/v1/appointments", Some(&doctor.token), None).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn leave_day_blocks_booking(pool: PgPool) {
    let app = app(pool);
    let doctor = signup(&app, "Mehta", "doctor").await;
    let patient = signup(&app, "Asha", "patient").await;
    let date = day(5);

    let (status, _) = set_leave(&app, &doctor, json!({ "date": date, "is_on_leave": true })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, resp) = book(&app, &patient, &doctor, &date, "10:00").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"]["code"], "DOCTOR_ON_LEAVE");

    let (_, grid) = call(
        &app,
        "GET",
        &format!("/api/v1/doctors/{}/slots?date={date}", doctor.id),
        Some(&patient.token),
        None,
    )
    .await;
    assert_eq!(grid["data"]["is_on_leave"], true);
    let slots = grid["data"]["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 10);
    assert!(slots.iter().all(|s| s["available"] == false));

    // The day after is unaffected.
    let (status, _) = book(&app, &patient, &doctor, &day(6), "10:00").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn only_patients_book_and_only_for_themselves(pool: PgPool) {
    let app = app(pool);
    let doctor = signup(&app, "Mehta", "doctor").await;
    let asha = signup(&app, "Asha", "patient").await;
    let ravi = signup(&app, "Ravi", "patient").await;
    let date = day(2);

    let (status, resp) = call(
        &app,
        "POST",
        "/api/v1/appointments",
        Some(&doctor.token),
        Some(booking(&doctor, &doctor, &date, "09:00")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(resp["error"]["code"], "FORBIDDEN");

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/appointments",
        Some(&asha.token),
        Some(booking(&ravi, &doctor, &date, "09:00")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A patient id in the doctor slot is not a doctor.
    let (status, resp) = book(&app, &asha, &ravi, &date, "09:00").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(resp["error"]["code"], "DOCTOR_NOT_FOUND");

    let (status, resp) = book(&app, &asha, &doctor, &day(-1), "09:00").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"]["code"], "VALIDATION_ERROR");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn leave_add_remove_and_clear(pool: PgPool) {
    let app = app(pool);
    let doctor = signup(&app, "Mehta", "doctor").await;
    let other = signup(&app, "Nair", "doctor").await;
    let patient = signup(&app, "Asha", "patient").await;
    let date = day(4);

    let (status, _) = book(&app, &patient, &doctor, &date, "11:00").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, resp) = set_leave(&app, &doctor, json!({ "date": date, "is_on_leave": true })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["data"]["changed"], 1);
    assert_eq!(resp["data"]["conflicting_appointments"], 1);

    let (_, resp) = set_leave(&app, &doctor, json!({ "date": date, "is_on_leave": true })).await;
    assert_eq!(resp["data"]["changed"], 0);

    let (status, resp) = set_leave(&app, &doctor, json!({ "date": day(-1), "is_on_leave": true })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/api/v1/doctors/{}/leave", doctor.id),
        Some(&other.token),
        Some(json!({ "date": date, "is_on_leave": false })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/api/v1/doctors/{}/leave", doctor.id),
        Some(&patient.token),
        Some(json!({ "date": date, "is_on_leave": true })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, resp) = set_leave(&app, &doctor, json!({ "date": date, "is_on_leave": false })).await;
    assert_eq!(resp["data"]["changed"], 1);

    for offset in [8, 9] {
        set_leave(&app, &doctor, json!({ "date": day(offset), "is_on_leave": true })).await;
    }
    let (_, upcoming) = call(&app, "GET", "/api/v1/doctors/leaves", Some(&patient.token), None).await;
    assert_eq!(upcoming["data"].as_array().unwrap().len(), 2);

    let (_, resp) = set_leave(&app, &doctor, json!({ "is_on_leave": false })).await;
    assert_eq!(resp["data"]["changed"], 2);
    assert_eq!(resp["data"]["message"], "All leaves cleared");

    let (_, leaves) = call(
        &app,
        "GET",
        &format!("/api/v1/doctors/{}/leaves", doctor.id),
        Some(&patient.token),
        None,
    )
    .await;
    assert_eq!(leaves["data"], json!([]));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn appointment_list_is_scoped_to_the_caller(pool: PgPool) {
    let app = app(pool);
    let mehta = signup(&app, "Mehta", "doctor").await;
    let nair = signup(&app, "Nair", "doctor").await;
    let asha = signup(&app, "Asha", "patient").await;
    let ravi = signup(&app, "Ravi", "patient").await;
    let date = day(3);

    book(&app, &asha, &mehta, &date, "09:00").await;
    book(&app, &asha, &nair, &date, "09:00").await;
    let (_, ravis) = book(&app, &ravi, &mehta, &date, "09:20").await;

    let (_, list) = call(&app, "GET", "/api/v1/appointments", Some(&asha.token), None).await;
    let rows = list["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["patient_id"] == asha.id.to_string()));

    let (_, list) = call(&app, "GET", "/api/v1/appointments", Some(&mehta.token), None).await;
    let rows = list["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["doctor_id"] == mehta.id.to_string()));

    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/v1/appointments?patient_id={}", ravi.id),
        Some(&asha.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/v1/appointments?doctor_id={}", nair.id),
        Some(&mehta.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, list) = call(
        &app,
        "GET",
        &format!("/api/v1/appointments?patient_id={}&status=pending", ravi.id),
        Some(&mehta.token),
        None,
    )
    .await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let ravis_id = ravis["data"]["id"].as_str().unwrap();
    let (status, _) = call(&app, "GET", &format!("/api/v1/appointments/{ravis_id}"), Some(&asha.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "GET", &format!("/api/v1/appointments/{ravis_id}"), Some(&nair.token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "GET", &format!("/api/v1/appointments/{ravis_id}"), Some(&ravi.token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn status_changes_follow_the_state_machine(pool: PgPool) {
    let app = app(pool);
    let doctor = signup(&app, "Mehta", "doctor").await;
    let other = signup(&app, "Nair", "doctor").await;
    let patient = signup(&app, "Asha", "patient").await;

    let (_, created) = book(&app, &patient, &doctor, &day(1), "10:20").await;
    let id = created["data"]["id"].as_str().unwrap();

    let (status, resp) = set_status(&app, &doctor, id, "completed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"]["code"], "INVALID_TRANSITION");

    let (status, resp) = set_status(&app, &patient, id, "confirmed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"]["code"], "INVALID_TRANSITION");

    let (status, _) = set_status(&app, &other, id, "confirmed").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, resp) = set_status(&app, &doctor, id, "confirmed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["data"]["status"], "Confirmed");

    let (status, resp) = set_status(&app, &doctor, id, "completed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["data"]["status"], "Completed");

    let (status, resp) = set_status(&app, &patient, id, "cancelled").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"]["code"], "INVALID_TRANSITION");

    let (status, resp) = set_status(&app, &doctor, &Uuid::new_v4().to_string(), "confirmed").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(resp["error"]["code"], "APPOINTMENT_NOT_FOUND");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn logout_revokes_the_session(pool: PgPool) {
    let app = app(pool);
    let patient = signup(&app, "Asha", "patient").await;

    let (status, me) = call(&app, "GET", "/api/v1/auth/me", Some(&patient.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["user"]["email"], "asha@clinic.test");

    let (status, _) = call(&app, "POST", "/api/v1/auth/logout", Some(&patient.token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, resp) = call(&app, "GET", "/api/v1/auth/me", Some(&patient.token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp["error"]["code"], "SESSION_EXPIRED");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn bad_path_values_get_the_error_envelope(pool: PgPool) {
    let app = app(pool);
    let patient = signup(&app, "Asha", "patient").await;

    for uri in [
        "/api/v1/appointments/not-a-uuid",
        "/api/v1/doctors/42/slots?date=2026-01-05",
        "/api/v1/users/abc",
    ] {
        let (status, resp) = call(&app, "GET", uri, Some(&patient.token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(resp["error"]["code"], "VALIDATION_ERROR", "{uri}");
        assert!(resp["error"]["message"].as_str().unwrap().starts_with("invalid path parameter"), "{uri}");
    }
}
