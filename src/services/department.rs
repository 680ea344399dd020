use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::models::{Department, Doctor};
use crate::services::{ServiceError, ServiceResult};

/// Bookable consultation slots, identical for every doctor and day.
pub const SLOTS: [&str; 12] = [
    "09:00 AM", "09:30 AM", "10:00 AM", "10:30 AM", "11:00 AM", "11:30 AM", "12:00 PM",
    "12:30 PM", "02:00 PM", "02:30 PM", "03:00 PM", "03:30 PM",
];

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub id: String,
    pub time: String,
    pub available: bool,
}

pub fn is_valid_slot(slot: &str) -> bool {
    SLOTS.contains(&slot)
}

/// Marks every slot in the table, taking the ones in `booked` out of service.
pub fn mark_slots(booked: &HashSet<String>) -> Vec<TimeSlot> {
    SLOTS
        .iter()
        .enumerate()
        .map(|(i, time)| TimeSlot {
            id: format!("slot-{}", i),
            time: time.to_string(),
            available: !booked.contains(*time),
        })
        .collect()
}

pub async fn list_departments(pool: &PgPool) -> Vec<Department> {
    sqlx::query_as::<_, Department>("SELECT * FROM departments ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap_or_else(|e| {
            log::error!("Error fetching departments: {}", e);
            vec![]
        })
}

pub async fn list_doctors(pool: &PgPool, department_id: Option<Uuid>) -> Vec<Doctor> {
    let result = match department_id {
        Some(department_id) => {
            sqlx::query_as::<_, Doctor>(
                "SELECT * FROM doctors WHERE department_id = $1 ORDER BY name",
            )
            .bind(department_id)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Doctor>("SELECT * FROM doctors ORDER BY name")
                .fetch_all(pool)
                .await
        }
    };

    result.unwrap_or_else(|e| {
        log::error!("Error fetching doctors: {}", e);
        vec![]
    })
}

pub async fn get_doctor<'e, E>(executor: E, doctor_id: Uuid) -> ServiceResult<Doctor>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Doctor>("SELECT * FROM doctors WHERE id = $1")
        .bind(doctor_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Doctor {}", doctor_id)))
}

/// Slots still held by a non-cancelled appointment of the doctor on `date`.
pub async fn booked_slots<'e, E>(
    executor: E,
    doctor_id: Uuid,
    date: NaiveDate,
) -> Result<HashSet<String>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let slots: Vec<String> = sqlx::query_scalar(
        "SELECT time_slot FROM appointments \
         WHERE doctor_id = $1 AND date = $2 AND status <> 'cancelled'",
    )
    .bind(doctor_id)
    .bind(date)
    .fetch_all(executor)
    .await?;

    Ok(slots.into_iter().collect())
}

/// The slot table for a doctor and day. Without both, every slot is shown
/// as available.
pub async fn time_slots(
    pool: &PgPool,
    doctor_id: Option<Uuid>,
    date: Option<NaiveDate>,
) -> Vec<TimeSlot> {
    let booked = match (doctor_id, date) {
        (Some(doctor_id), Some(date)) => booked_slots(pool, doctor_id, date)
            .await
            .unwrap_or_else(|e| {
                log::error!("Error fetching booked slots: {}", e);
                HashSet::new()
            }),
        _ => HashSet::new(),
    };

    mark_slots(&booked)
}
