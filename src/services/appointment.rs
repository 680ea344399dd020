use chrono::NaiveDate;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::models::{Appointment, AppointmentStatus};
use crate::services::{audit, department, queue, ServiceError, ServiceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub department_id: Uuid,
    pub date: NaiveDate,
    pub time_slot: String,
}

pub async fn book_appointment(
    pool: &PgPool,
    new: NewAppointment,
    performed_by: &str,
) -> ServiceResult<Appointment> {
    let slot = new.time_slot.trim();
    if !department::is_valid_slot(slot) {
        return Err(ServiceError::InvalidInput(format!(
            "{} is not a bookable slot",
            slot
        )));
    }

    let mut tx = pool.begin().await?;
    let doctor = queue::lock_doctor(&mut *tx, new.doctor_id).await?;
    if doctor.department_id != new.department_id {
        return Err(ServiceError::InvalidInput(format!(
            "{} does not work in the selected department",
            doctor.name
        )));
    }

    let booked = department::booked_slots(&mut *tx, doctor.id, new.date).await?;
    if booked.contains(slot) {
        return Err(ServiceError::SlotTaken(slot.to_string()));
    }

    let appointment = sqlx::query_as::<_, Appointment>(
        "INSERT INTO appointments \
         (id, patient_id, doctor_id, department_id, date, time_slot, status) \
         VALUES ($1, $2, $3, $4, $5, $6, 'scheduled') \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(new.patient_id)
    .bind(doctor.id)
    .bind(new.department_id)
    .bind(new.date)
    .bind(slot)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        let (unknown_patient, slot_held) = match &e {
            sqlx::Error::Database(db) => (db.is_foreign_key_violation(), db.is_unique_violation()),
            _ => (false, false),
        };
        if unknown_patient {
            ServiceError::NotFound(format!("Patient {}", new.patient_id))
        } else if slot_held {
            ServiceError::SlotTaken(slot.to_string())
        } else {
            ServiceError::Sqlx(e)
        }
    })?;

    audit::record(
        &mut *tx,
        audit::BOOK_APPOINTMENT,
        performed_by,
        &format!("Appointment {}", appointment.id),
        &format!("{} {} with {}", appointment.date, appointment.time_slot, doctor.name),
    )
    .await?;

    tx.commit().await?;

    log::info!(
        "Booked {} on {} with doctor {}",
        appointment.time_slot,
        appointment.date,
        appointment.doctor_id
    );
    Ok(appointment)
}

/// Closes the still-scheduled appointments of patients who have been seen,
/// so the evening no-show sweep leaves them alone.
pub(crate) async fn complete_for_patients<'e, E>(
    executor: E,
    patient_ids: &[Uuid],
) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE appointments SET status = 'completed' \
         WHERE patient_id = ANY($1) AND status = 'scheduled'",
    )
    .bind(patient_ids)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Newest bookings first, optionally for one doctor.
pub async fn list_appointments(pool: &PgPool, doctor_id: Option<Uuid>) -> ServiceResult<Vec<Appointment>> {
    let appointments = sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments \
         WHERE ($1::uuid IS NULL OR doctor_id = $1) \
         ORDER BY created_at DESC",
    )
    .bind(doctor_id)
    .fetch_all(pool)
    .await?;

    Ok(appointments)
}

pub async fn update_appointment_status(
    pool: &PgPool,
    appointment_id: Uuid,
    status: AppointmentStatus,
    performed_by: &str,
) -> ServiceResult<Appointment> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = $1")
        .bind(appointment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Appointment {}", appointment_id)))?;

    // A cancelled booking gave its slot up; taking it back needs the slot free.
    if current.status == AppointmentStatus::Cancelled && status != AppointmentStatus::Cancelled {
        queue::lock_doctor(&mut *tx, current.doctor_id).await?;
        let booked = department::booked_slots(&mut *tx, current.doctor_id, current.date).await?;
        if booked.contains(&current.time_slot) {
            return Err(ServiceError::SlotTaken(current.time_slot));
        }
    }

    let appointment = sqlx::query_as::<_, Appointment>(
        "UPDATE appointments SET status = $2 WHERE id = $1 RETURNING *",
    )
    .bind(appointment_id)
    .bind(status.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        let slot_held = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
        if slot_held {
            ServiceError::SlotTaken(current.time_slot.clone())
        } else {
            ServiceError::Sqlx(e)
        }
    })?;

    audit::record(
        &mut *tx,
        audit::UPDATE_APPOINTMENT_STATUS,
        performed_by,
        &format!("Appointment {}", appointment.id),
        &format!("Status changed to {}", status),
    )
    .await?;

    tx.commit().await?;
    Ok(appointment)
}

/// Slot labels the doctor can still take on `date`, in table order.
pub async fn available_slots(
    pool: &PgPool,
    doctor_id: Uuid,
    date: NaiveDate,
) -> ServiceResult<Vec<String>> {
    let booked = department::booked_slots(pool, doctor_id, date).await?;
    Ok(department::mark_slots(&booked)
        .into_iter()
        .filter(|slot| slot.available)
        .map(|slot| slot.time)
        .collect())
}

/// Scheduled appointments dated before `before` are marked as no-shows.
pub async fn mark_no_shows(pool: &PgPool, before: NaiveDate) -> ServiceResult<u64> {
    let result = sqlx::query(
        "UPDATE appointments SET status = 'no-show' \
         WHERE status = 'scheduled' AND date < $1",
    )
    .bind(before)
    .execute(pool)
    .await?;

    let count = result.rows_affected();
    if count > 0 {
        audit::log(
            pool,
            audit::MARK_NO_SHOWS,
            "SYSTEM",
            &format!("Appointments before {}", before),
            &format!("{} appointment(s) marked no-show", count),
        )
        .await;
    }
    Ok(count)
}
