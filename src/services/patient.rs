use std::collections::HashSet;

use chrono::Local;
use rand::Rng;
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::models::{NotificationPreferences, Patient, PatientStatus, VisitType};
use crate::services::{
    appointment, audit, department, queue, required, ServiceError, ServiceResult,
};

pub const TOKEN_MIN: i32 = 100;
pub const TOKEN_MAX: i32 = 999;

/// Random draws tried before falling back to picking among the free numbers.
const TOKEN_DRAWS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct NewPatient {
    pub name: String,
    pub phone: String,
    pub department_id: Uuid,
    pub doctor_id: Uuid,
    pub visit_type: VisitType,
    pub appointment_time: Option<String>,
    pub notifications: NotificationPreferences,
    pub chat_id: Option<i64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RegistrationResult {
    pub success: bool,
    pub patient: Patient,
}

/// Draws a token in `[TOKEN_MIN, TOKEN_MAX]` that is not in `taken`.
pub fn pick_token<R: Rng>(rng: &mut R, taken: &HashSet<i32>) -> ServiceResult<i32> {
    for _ in 0..TOKEN_DRAWS {
        let candidate = rng.gen_range(TOKEN_MIN..=TOKEN_MAX);
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }

    let free: Vec<i32> = (TOKEN_MIN..=TOKEN_MAX)
        .filter(|n| !taken.contains(n))
        .collect();
    if free.is_empty() {
        return Err(ServiceError::TokenSpaceExhausted);
    }
    Ok(free[rng.gen_range(0..free.len())])
}

/// The slot an appointment visit books. Walk-ins never hold a slot.
pub fn resolve_slot(
    visit_type: VisitType,
    appointment_time: Option<&str>,
) -> ServiceResult<Option<String>> {
    match visit_type {
        VisitType::WalkIn => Ok(None),
        VisitType::Appointment => {
            let slot = appointment_time.map(str::trim).unwrap_or_default();
            if slot.is_empty() {
                return Err(ServiceError::InvalidInput(
                    "an appointment visit needs a time slot".to_string(),
                ));
            }
            if !department::is_valid_slot(slot) {
                return Err(ServiceError::InvalidInput(format!(
                    "{} is not a bookable slot",
                    slot
                )));
            }
            Ok(Some(slot.to_string()))
        }
    }
}

pub async fn register_patient(pool: &PgPool, new: NewPatient) -> ServiceResult<RegistrationResult> {
    let name = required("name", &new.name)?;
    let phone = required("phone", &new.phone)?;
    let slot = resolve_slot(new.visit_type, new.appointment_time.as_deref())?;

    log::info!("Registering patient {}", name);

    let mut tx = pool.begin().await?;
    let doctor = queue::lock_doctor(&mut *tx, new.doctor_id).await?;
    if doctor.department_id != new.department_id {
        return Err(ServiceError::InvalidInput(format!(
            "{} does not work in the selected department",
            doctor.name
        )));
    }

    let today = Local::now().date_naive();
    if let Some(slot) = &slot {
        let booked = department::booked_slots(&mut *tx, doctor.id, today).await?;
        if booked.contains(slot) {
            return Err(ServiceError::SlotTaken(slot.clone()));
        }
    }

    let taken = open_token_numbers(&mut *tx, doctor.id, None).await?;
    let token = pick_token(&mut rand::thread_rng(), &taken)?;

    let patient = sqlx::query_as::<_, Patient>(
        "INSERT INTO patients \
         (id, name, phone, department_id, doctor_id, type, appointment_time, status, \
          token_number, sms, whatsapp, chat_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'waiting', $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(phone)
    .bind(new.department_id)
    .bind(doctor.id)
    .bind(new.visit_type.as_str())
    .bind(slot.as_deref())
    .bind(token)
    .bind(new.notifications.sms)
    .bind(new.notifications.whatsapp)
    .bind(new.chat_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO queue_tokens (id, doctor_id, patient_id, token_number, status) \
         VALUES ($1, $2, $3, $4, 'waiting')",
    )
    .bind(Uuid::new_v4())
    .bind(doctor.id)
    .bind(patient.id)
    .bind(token)
    .execute(&mut *tx)
    .await?;

    if let Some(slot) = &slot {
        sqlx::query(
            "INSERT INTO appointments \
             (id, patient_id, doctor_id, department_id, date, time_slot, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'scheduled')",
        )
        .bind(Uuid::new_v4())
        .bind(patient.id)
        .bind(doctor.id)
        .bind(new.department_id)
        .bind(today)
        .bind(slot)
        .execute(&mut *tx)
        .await?;
    }

    audit::record(
        &mut *tx,
        audit::REGISTER_PATIENT,
        "PATIENT",
        &patient.audit_label(),
        &format!("Registered as {} with {}", new.visit_type, doctor.name),
    )
    .await?;

    tx.commit().await?;

    log::info!("Patient registered with token {}", token);
    Ok(RegistrationResult {
        success: true,
        patient,
    })
}

/// Newest registrations first, optionally narrowed to a department and/or doctor.
pub async fn list_patients(
    pool: &PgPool,
    department_id: Option<Uuid>,
    doctor_id: Option<Uuid>,
) -> Vec<Patient> {
    sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients \
         WHERE ($1::uuid IS NULL OR department_id = $1) \
           AND ($2::uuid IS NULL OR doctor_id = $2) \
         ORDER BY registered_at DESC",
    )
    .bind(department_id)
    .bind(doctor_id)
    .fetch_all(pool)
    .await
    .unwrap_or_else(|e| {
        log::error!("Error fetching patients: {}", e);
        vec![]
    })
}

pub async fn get_patient(pool: &PgPool, patient_id: Uuid) -> ServiceResult<Patient> {
    sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1")
        .bind(patient_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Patient {}", patient_id)))
}

/// Numbers held by the doctor's non-completed tokens, optionally leaving
/// one patient's own token out.
async fn open_token_numbers<'e, E>(
    executor: E,
    doctor_id: Uuid,
    except_patient: Option<Uuid>,
) -> Result<HashSet<i32>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let numbers: Vec<i32> = sqlx::query_scalar(
        "SELECT token_number FROM queue_tokens \
         WHERE doctor_id = $1 AND status <> 'completed' \
           AND ($2::uuid IS NULL OR patient_id <> $2)",
    )
    .bind(doctor_id)
    .bind(except_patient)
    .fetch_all(executor)
    .await?;

    Ok(numbers.into_iter().collect())
}

/// Moves a patient and its queue token to `status` together.
///
/// Reopening a completed patient can find their old number handed out again
/// in the meantime; they then get a fresh one so open numbers stay unique.
/// Completing a patient also closes their scheduled appointment.
pub async fn update_patient_status(
    pool: &PgPool,
    patient_id: Uuid,
    status: PatientStatus,
    performed_by: &str,
) -> ServiceResult<Patient> {
    let mut tx = pool.begin().await?;

    let doctor_id: Uuid = sqlx::query_scalar("SELECT doctor_id FROM patients WHERE id = $1")
        .bind(patient_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Patient {}", patient_id)))?;
    queue::lock_doctor(&mut *tx, doctor_id).await?;

    let current = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1 FOR UPDATE")
        .bind(patient_id)
        .fetch_one(&mut *tx)
        .await?;

    let mut token_number = current.token_number;
    if status != PatientStatus::Completed {
        let taken = open_token_numbers(&mut *tx, doctor_id, Some(patient_id)).await?;
        if taken.contains(&token_number) {
            token_number = pick_token(&mut rand::thread_rng(), &taken)?;
            log::warn!(
                "Token {} was reissued while {} was completed; reopening with {}",
                current.token_number,
                current.name,
                token_number
            );
        }
    }

    let patient = sqlx::query_as::<_, Patient>(
        "UPDATE patients SET status = $2, token_number = $3 WHERE id = $1 RETURNING *",
    )
    .bind(patient_id)
    .bind(status.as_str())
    .bind(token_number)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE queue_tokens SET status = $2, token_number = $3, \
             called_at = CASE WHEN $2 = 'waiting' THEN NULL ELSE COALESCE(called_at, now()) END, \
             completed_at = CASE WHEN $2 = 'completed' THEN now() ELSE NULL END \
         WHERE patient_id = $1",
    )
    .bind(patient_id)
    .bind(status.as_str())
    .bind(token_number)
    .execute(&mut *tx)
    .await?;

    if status == PatientStatus::Completed {
        appointment::complete_for_patients(&mut *tx, &[patient_id]).await?;
    }

    audit::record(
        &mut *tx,
        audit::UPDATE_PATIENT_STATUS,
        performed_by,
        &patient.audit_label(),
        &format!("Status changed to {}", status),
    )
    .await?;

    tx.commit().await?;

    log::info!("Patient {} is now {}", patient.id, status);
    Ok(patient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;
    use chrono::Days;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn tokens_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let taken = HashSet::new();
        for _ in 0..2_000 {
            let token = pick_token(&mut rng, &taken).unwrap();
            assert!((TOKEN_MIN..=TOKEN_MAX).contains(&token));
        }
    }

    #[test]
    fn taken_tokens_are_never_reissued() {
        let mut rng = StdRng::seed_from_u64(42);
        let taken: HashSet<i32> = (TOKEN_MIN..=TOKEN_MAX).filter(|n| n % 10 != 3).collect();
        for _ in 0..200 {
            let token = pick_token(&mut rng, &taken).unwrap();
            assert_eq!(token % 10, 3);
        }
    }

    #[test]
    fn last_free_token_is_found() {
        let mut rng = StdRng::seed_from_u64(1);
        let taken: HashSet<i32> = (TOKEN_MIN..=TOKEN_MAX).filter(|n| *n != 618).collect();
        assert_eq!(pick_token(&mut rng, &taken).unwrap(), 618);
    }

    #[test]
    fn full_token_space_is_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let taken: HashSet<i32> = (TOKEN_MIN..=TOKEN_MAX).collect();
        assert!(matches!(
            pick_token(&mut rng, &taken),
            Err(ServiceError::TokenSpaceExhausted)
        ));
    }

    #[test]
    fn walk_in_ignores_any_slot() {
        assert_eq!(resolve_slot(VisitType::WalkIn, Some("09:00 AM")).unwrap(), None);
        assert_eq!(resolve_slot(VisitType::WalkIn, None).unwrap(), None);
    }

    #[test]
    fn appointment_requires_a_real_slot() {
        assert_eq!(
            resolve_slot(VisitType::Appointment, Some(" 10:30 AM ")).unwrap(),
            Some("10:30 AM".to_string())
        );
        assert!(matches!(
            resolve_slot(VisitType::Appointment, None),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            resolve_slot(VisitType::Appointment, Some("07:15 PM")),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    async fn open_numbers(pool: &PgPool, doctor_id: Uuid) -> Vec<i32> {
        sqlx::query_scalar(
            "SELECT token_number FROM queue_tokens \
             WHERE doctor_id = $1 AND status <> 'completed' ORDER BY token_number",
        )
        .bind(doctor_id)
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn registration_writes_patient_token_appointment_and_audit(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;

        let result = register_patient(
            &pool,
            testing::appointment_visit("Maya Patel", department_id, doctor_id, "09:30 AM"),
        )
        .await
        .unwrap();
        let patient = result.patient;

        assert!(result.success);
        assert_eq!(patient.status, PatientStatus::Waiting);
        assert_eq!(patient.appointment_time.as_deref(), Some("09:30 AM"));
        assert_eq!(open_numbers(&pool, doctor_id).await, vec![patient.token_number]);
        assert_eq!(testing::token_status(&pool, patient.id).await, "waiting");
        assert_eq!(testing::appointment_status(&pool, patient.id).await, "scheduled");

        let audited: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs WHERE action = $1 AND target = $2",
        )
        .bind(audit::REGISTER_PATIENT)
        .bind(patient.audit_label())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(audited, 1);
    }

    #[sqlx::test]
    async fn registration_refuses_a_slot_already_held(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        register_patient(
            &pool,
            testing::appointment_visit("Ines", department_id, doctor_id, "10:00 AM"),
        )
        .await
        .unwrap();

        let second = register_patient(
            &pool,
            testing::appointment_visit("Omar", department_id, doctor_id, "10:00 AM"),
        )
        .await;
        assert!(matches!(second, Err(ServiceError::SlotTaken(slot)) if slot == "10:00 AM"));

        let patients: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(patients, 1);

        // Walk-ins never compete for slots.
        let mut walk_in = testing::walk_in("Omar", department_id, doctor_id);
        walk_in.appointment_time = Some("10:00 AM".to_string());
        let patient = register_patient(&pool, walk_in).await.unwrap().patient;
        assert_eq!(patient.appointment_time, None);
    }

    #[sqlx::test]
    async fn registration_checks_the_doctor_department(pool: PgPool) {
        let (_, doctor_id) = testing::clinic(&pool).await;
        let pediatrics = testing::department(&pool, "Pediatrics").await;

        let result = register_patient(&pool, testing::walk_in("Lena", pediatrics, doctor_id)).await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));

        let result =
            register_patient(&pool, testing::walk_in("Lena", pediatrics, Uuid::new_v4())).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[sqlx::test]
    async fn open_tokens_of_a_doctor_are_distinct(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        for i in 0..40 {
            let name = format!("Patient {}", i);
            register_patient(&pool, testing::walk_in(&name, department_id, doctor_id))
                .await
                .unwrap();
        }

        let numbers = open_numbers(&pool, doctor_id).await;
        let distinct: HashSet<i32> = numbers.iter().copied().collect();
        assert_eq!(numbers.len(), 40);
        assert_eq!(distinct.len(), 40);
    }

    #[sqlx::test]
    async fn status_change_moves_the_token_with_the_patient(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        let patient = register_patient(&pool, testing::walk_in("Jonas", department_id, doctor_id))
            .await
            .unwrap()
            .patient;

        let updated = update_patient_status(&pool, patient.id, PatientStatus::InProgress, "desk")
            .await
            .unwrap();
        assert_eq!(updated.status, PatientStatus::InProgress);
        assert_eq!(testing::token_status(&pool, patient.id).await, "in-progress");

        update_patient_status(&pool, patient.id, PatientStatus::Waiting, "desk")
            .await
            .unwrap();
        assert_eq!(testing::token_status(&pool, patient.id).await, "waiting");

        let missing =
            update_patient_status(&pool, Uuid::new_v4(), PatientStatus::Completed, "desk").await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }

    #[sqlx::test]
    async fn completing_a_patient_closes_their_appointment(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        let patient = register_patient(
            &pool,
            testing::appointment_visit("Maya", department_id, doctor_id, "09:00 AM"),
        )
        .await
        .unwrap()
        .patient;

        update_patient_status(&pool, patient.id, PatientStatus::Completed, "desk")
            .await
            .unwrap();
        assert_eq!(testing::appointment_status(&pool, patient.id).await, "completed");

        let tomorrow = Local::now().date_naive() + Days::new(1);
        assert_eq!(appointment::mark_no_shows(&pool, tomorrow).await.unwrap(), 0);
        assert_eq!(testing::appointment_status(&pool, patient.id).await, "completed");
    }

    #[sqlx::test]
    async fn reopening_a_patient_whose_number_was_reissued_draws_a_new_one(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        let first = register_patient(&pool, testing::walk_in("Ravi", department_id, doctor_id))
            .await
            .unwrap()
            .patient;
        update_patient_status(&pool, first.id, PatientStatus::Completed, "desk")
            .await
            .unwrap();

        // Someone else now holds the completed patient's number.
        let second = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO patients (id, name, phone, department_id, doctor_id, type, status, token_number) \
             VALUES ($1, 'Jonas', '555-0101', $2, $3, 'walk-in', 'waiting', $4)",
        )
        .bind(second)
        .bind(department_id)
        .bind(doctor_id)
        .bind(first.token_number)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO queue_tokens (id, doctor_id, patient_id, token_number, status) \
             VALUES ($1, $2, $3, $4, 'waiting')",
        )
        .bind(Uuid::new_v4())
        .bind(doctor_id)
        .bind(second)
        .bind(first.token_number)
        .execute(&pool)
        .await
        .unwrap();

        let reopened = update_patient_status(&pool, first.id, PatientStatus::Waiting, "desk")
            .await
            .unwrap();
        assert_ne!(reopened.token_number, first.token_number);

        let numbers = open_numbers(&pool, doctor_id).await;
        assert_eq!(numbers.len(), 2);
        assert!(numbers.contains(&first.token_number));
        assert!(numbers.contains(&reopened.token_number));

        let token: i32 =
            sqlx::query_scalar("SELECT token_number FROM queue_tokens WHERE patient_id = $1")
                .bind(first.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(token, reopened.token_number);
    }

    #[sqlx::test]
    async fn reopening_keeps_the_number_when_it_is_still_free(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        let patient = register_patient(&pool, testing::walk_in("Ravi", department_id, doctor_id))
            .await
            .unwrap()
            .patient;
        update_patient_status(&pool, patient.id, PatientStatus::Completed, "desk")
            .await
            .unwrap();

        let reopened = update_patient_status(&pool, patient.id, PatientStatus::Waiting, "desk")
            .await
            .unwrap();
        assert_eq!(reopened.token_number, patient.token_number);
    }
}
