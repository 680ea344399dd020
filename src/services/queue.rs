use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::models::{Doctor, Patient, PatientStatus, QueueToken, VisitType};
use crate::services::{appointment, audit, ServiceError, ServiceResult};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub current_token: i32,
    pub waiting_count: usize,
    pub total_registered: usize,
    pub estimated_wait_minutes: u32,
    pub department_id: Option<Uuid>,
    pub doctor_id: Uuid,
}

impl QueueState {
    pub fn empty(doctor_id: Uuid) -> Self {
        Self {
            current_token: 0,
            waiting_count: 0,
            total_registered: 0,
            estimated_wait_minutes: 0,
            department_id: None,
            doctor_id,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub token_number: i32,
    pub patient_name: String,
    #[serde(rename = "type")]
    pub visit_type: VisitType,
    pub appointment_time: Option<String>,
    pub status: PatientStatus,
    pub estimated_wait_minutes: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalledPatient {
    pub token: QueueToken,
    /// Missing only if the patient row vanished underneath its token.
    pub patient: Option<Patient>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallNextOutcome {
    pub completed_tokens: Vec<i32>,
    pub called: Option<CalledPatient>,
}

impl CallNextOutcome {
    /// The token now being seen, 0 when nobody was waiting.
    pub fn new_token(&self) -> i32 {
        self.called
            .as_ref()
            .map(|called| called.token.token_number)
            .unwrap_or(0)
    }
}

/// Row of the token/patient join behind the queue board.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EntryRow {
    pub token_number: i32,
    #[sqlx(try_from = "String")]
    pub status: PatientStatus,
    pub patient_name: Option<String>,
    pub visit_type: Option<String>,
    pub appointment_time: Option<String>,
}

/// Summarises a doctor's open tokens, given in creation order.
pub fn summarize(
    doctor_id: Uuid,
    department_id: Option<Uuid>,
    open_tokens: &[QueueToken],
    consultation_minutes: u32,
) -> QueueState {
    let current = open_tokens
        .iter()
        .find(|t| t.status == PatientStatus::InProgress)
        .or_else(|| open_tokens.first());
    let waiting = open_tokens
        .iter()
        .filter(|t| t.status == PatientStatus::Waiting)
        .count();

    QueueState {
        current_token: current.map(|t| t.token_number).unwrap_or(0),
        waiting_count: waiting,
        total_registered: open_tokens.len(),
        estimated_wait_minutes: waiting as u32 * consultation_minutes,
        department_id,
        doctor_id,
    }
}

/// Turns join rows into board entries; the wait grows by one consultation
/// per position.
pub fn build_entries(rows: Vec<EntryRow>, consultation_minutes: u32) -> Vec<QueueEntry> {
    rows.into_iter()
        .enumerate()
        .map(|(position, row)| QueueEntry {
            token_number: row.token_number,
            patient_name: row.patient_name.unwrap_or_else(|| "Unknown".to_string()),
            visit_type: row
                .visit_type
                .and_then(|tag| tag.parse().ok())
                .unwrap_or(VisitType::WalkIn),
            appointment_time: row.appointment_time,
            status: row.status,
            estimated_wait_minutes: position as u32 * consultation_minutes,
        })
        .collect()
}

/// Locks the doctor row until the surrounding transaction ends. Every
/// write that hands out or advances this doctor's tokens goes through here
/// first, so those writes run one at a time per doctor.
pub(crate) async fn lock_doctor<'e, E>(executor: E, doctor_id: Uuid) -> ServiceResult<Doctor>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Doctor>("SELECT * FROM doctors WHERE id = $1 FOR UPDATE")
        .bind(doctor_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Doctor {}", doctor_id)))
}

async fn open_tokens(pool: &PgPool, doctor_id: Uuid) -> Result<Vec<QueueToken>, sqlx::Error> {
    sqlx::query_as::<_, QueueToken>(
        "SELECT * FROM queue_tokens \
         WHERE doctor_id = $1 AND status <> 'completed' \
         ORDER BY created_at, id",
    )
    .bind(doctor_id)
    .fetch_all(pool)
    .await
}

pub async fn queue_status(pool: &PgPool, doctor_id: Uuid, consultation_minutes: u32) -> QueueState {
    let tokens = match open_tokens(pool, doctor_id).await {
        Ok(tokens) => tokens,
        Err(e) => {
            log::error!("Error fetching queue status: {}", e);
            return QueueState::empty(doctor_id);
        }
    };

    let department_id: Option<Uuid> =
        sqlx::query_scalar("SELECT department_id FROM doctors WHERE id = $1")
            .bind(doctor_id)
            .fetch_optional(pool)
            .await
            .unwrap_or_else(|e| {
                log::error!("Error fetching doctor department: {}", e);
                None
            });

    summarize(doctor_id, department_id, &tokens, consultation_minutes)
}

pub async fn queue_entries(
    pool: &PgPool,
    doctor_id: Uuid,
    consultation_minutes: u32,
) -> Vec<QueueEntry> {
    let rows = sqlx::query_as::<_, EntryRow>(
        "SELECT t.token_number, t.status, p.name AS patient_name, \
                p.type AS visit_type, p.appointment_time \
         FROM queue_tokens t \
         LEFT JOIN patients p ON p.id = t.patient_id \
         WHERE t.doctor_id = $1 AND t.status <> 'completed' \
         ORDER BY t.created_at, t.id",
    )
    .bind(doctor_id)
    .fetch_all(pool)
    .await;

    match rows {
        Ok(rows) => build_entries(rows, consultation_minutes),
        Err(e) => {
            log::error!("Error fetching queue entries: {}", e);
            vec![]
        }
    }
}

/// Finishes whoever the doctor is seeing and calls the oldest waiting token.
///
/// Token and patient rows move together, and the audit entry is written in
/// the same transaction. The doctor row lock makes concurrent callers for one
/// doctor queue up behind each other instead of calling the same token twice.
pub async fn call_next_patient(
    pool: &PgPool,
    doctor_id: Uuid,
    performed_by: &str,
) -> ServiceResult<CallNextOutcome> {
    log::info!("Calling next patient for doctor {}", doctor_id);

    let mut tx = pool.begin().await?;
    lock_doctor(&mut *tx, doctor_id).await?;

    let finished: Vec<(Uuid, i32)> = sqlx::query_as(
        "UPDATE queue_tokens SET status = 'completed', completed_at = now() \
         WHERE doctor_id = $1 AND status = 'in-progress' \
         RETURNING patient_id, token_number",
    )
    .bind(doctor_id)
    .fetch_all(&mut *tx)
    .await?;

    if !finished.is_empty() {
        let patient_ids: Vec<Uuid> = finished.iter().map(|(id, _)| *id).collect();
        sqlx::query("UPDATE patients SET status = 'completed' WHERE id = ANY($1)")
            .bind(&patient_ids)
            .execute(&mut *tx)
            .await?;
        appointment::complete_for_patients(&mut *tx, &patient_ids).await?;
    }

    let next = sqlx::query_as::<_, QueueToken>(
        "SELECT * FROM queue_tokens \
         WHERE doctor_id = $1 AND status = 'waiting' \
         ORDER BY created_at, id LIMIT 1",
    )
    .bind(doctor_id)
    .fetch_optional(&mut *tx)
    .await?;

    let called = match next {
        Some(token) => {
            let token = sqlx::query_as::<_, QueueToken>(
                "UPDATE queue_tokens SET status = 'in-progress', called_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(token.id)
            .fetch_one(&mut *tx)
            .await?;

            let patient = sqlx::query_as::<_, Patient>(
                "UPDATE patients SET status = 'in-progress' WHERE id = $1 RETURNING *",
            )
            .bind(token.patient_id)
            .fetch_optional(&mut *tx)
            .await?;

            audit::record(
                &mut *tx,
                audit::CALL_NEXT_PATIENT,
                performed_by,
                &format!("Token {}", token.token_number),
                "Called next patient in queue",
            )
            .await?;

            Some(CalledPatient { token, patient })
        }
        None => None,
    };

    tx.commit().await?;

    let outcome = CallNextOutcome {
        completed_tokens: finished.into_iter().map(|(_, token)| token).collect(),
        called,
    };
    log::info!(
        "Doctor {} now seeing token {}",
        doctor_id,
        outcome.new_token()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::patient::register_patient;
    use crate::services::testing;
    use chrono::{Days, Duration, Local, Utc};
    use futures::future;

    fn token(number: i32, status: PatientStatus, offset_secs: i64) -> QueueToken {
        QueueToken {
            id: Uuid::new_v4(),
            doctor_id: Uuid::nil(),
            patient_id: Uuid::new_v4(),
            token_number: number,
            status,
            created_at: Utc::now() + Duration::seconds(offset_secs),
            called_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn empty_queue_summarizes_to_zero() {
        let doctor = Uuid::new_v4();
        assert_eq!(summarize(doctor, None, &[], 7), QueueState::empty(doctor));
    }

    #[test]
    fn in_progress_token_is_current_even_when_not_first() {
        let tokens = vec![
            token(512, PatientStatus::Waiting, 0),
            token(238, PatientStatus::InProgress, 1),
            token(901, PatientStatus::Waiting, 2),
        ];
        let dept = Uuid::new_v4();
        let state = summarize(Uuid::nil(), Some(dept), &tokens, 7);

        assert_eq!(state.current_token, 238);
        assert_eq!(state.waiting_count, 2);
        assert_eq!(state.total_registered, 3);
        assert_eq!(state.estimated_wait_minutes, 14);
        assert_eq!(state.department_id, Some(dept));
    }

    #[test]
    fn first_token_is_current_when_nobody_is_being_seen() {
        let tokens = vec![
            token(140, PatientStatus::Waiting, 0),
            token(777, PatientStatus::Waiting, 1),
        ];
        let state = summarize(Uuid::nil(), None, &tokens, 10);
        assert_eq!(state.current_token, 140);
        assert_eq!(state.estimated_wait_minutes, 20);
    }

    #[test]
    fn entries_wait_grows_with_position() {
        let rows = vec![
            EntryRow {
                token_number: 300,
                status: PatientStatus::InProgress,
                patient_name: Some("Ines".to_string()),
                visit_type: Some("appointment".to_string()),
                appointment_time: Some("09:30 AM".to_string()),
            },
            EntryRow {
                token_number: 301,
                status: PatientStatus::Waiting,
                patient_name: None,
                visit_type: None,
                appointment_time: None,
            },
        ];
        let entries = build_entries(rows, 7);

        assert_eq!(entries[0].estimated_wait_minutes, 0);
        assert_eq!(entries[0].visit_type, VisitType::Appointment);
        assert_eq!(entries[0].appointment_time.as_deref(), Some("09:30 AM"));
        assert_eq!(entries[1].estimated_wait_minutes, 7);
        assert_eq!(entries[1].patient_name, "Unknown");
        assert_eq!(entries[1].visit_type, VisitType::WalkIn);
    }

    #[test]
    fn new_token_is_zero_for_an_empty_call() {
        let outcome = CallNextOutcome {
            completed_tokens: vec![455],
            called: None,
        };
        assert_eq!(outcome.new_token(), 0);

        let outcome = CallNextOutcome {
            completed_tokens: vec![],
            called: Some(CalledPatient {
                token: token(612, PatientStatus::InProgress, 0),
                patient: None,
            }),
        };
        assert_eq!(outcome.new_token(), 612);
    }

    async fn patient_status(pool: &PgPool, patient_id: Uuid) -> String {
        sqlx::query_scalar("SELECT status FROM patients WHERE id = $1")
            .bind(patient_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn call_next_walks_the_queue_in_registration_order(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        let first = register_patient(&pool, testing::walk_in("Ines", department_id, doctor_id))
            .await
            .unwrap()
            .patient;
        let second = register_patient(&pool, testing::walk_in("Omar", department_id, doctor_id))
            .await
            .unwrap()
            .patient;

        let outcome = call_next_patient(&pool, doctor_id, "doc@hospital.com").await.unwrap();
        assert!(outcome.completed_tokens.is_empty());
        assert_eq!(outcome.new_token(), first.token_number);
        assert_eq!(patient_status(&pool, first.id).await, "in-progress");
        assert_eq!(testing::token_status(&pool, first.id).await, "in-progress");

        let state = queue_status(&pool, doctor_id, 7).await;
        assert_eq!(state.current_token, first.token_number);
        assert_eq!(state.waiting_count, 1);
        assert_eq!(state.total_registered, 2);
        assert_eq!(state.estimated_wait_minutes, 7);
        assert_eq!(state.department_id, Some(department_id));

        let outcome = call_next_patient(&pool, doctor_id, "doc@hospital.com").await.unwrap();
        assert_eq!(outcome.completed_tokens, vec![first.token_number]);
        assert_eq!(outcome.new_token(), second.token_number);
        assert_eq!(patient_status(&pool, first.id).await, "completed");
        assert_eq!(testing::token_status(&pool, first.id).await, "completed");

        let outcome = call_next_patient(&pool, doctor_id, "doc@hospital.com").await.unwrap();
        assert_eq!(outcome.completed_tokens, vec![second.token_number]);
        assert!(outcome.called.is_none());
        assert_eq!(outcome.new_token(), 0);
        assert_eq!(queue_status(&pool, doctor_id, 7).await, QueueState {
            department_id: Some(department_id),
            ..QueueState::empty(doctor_id)
        });

        let audited: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = $1")
                .bind(audit::CALL_NEXT_PATIENT)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(audited, 2);
    }

    #[sqlx::test]
    async fn unknown_doctor_cannot_be_advanced(pool: PgPool) {
        let result = call_next_patient(&pool, Uuid::new_v4(), "doc@hospital.com").await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[sqlx::test]
    async fn concurrent_calls_for_one_doctor_never_share_a_token(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        for i in 0..8 {
            let name = format!("Patient {}", i);
            register_patient(&pool, testing::walk_in(&name, department_id, doctor_id))
                .await
                .unwrap();
        }

        let calls = (0..8).map(|_| call_next_patient(&pool, doctor_id, "doc@hospital.com"));
        let outcomes: Vec<CallNextOutcome> = future::join_all(calls)
            .await
            .into_iter()
            .map(|outcome| outcome.unwrap())
            .collect();

        let mut called: Vec<i32> = outcomes.iter().map(CallNextOutcome::new_token).collect();
        called.sort_unstable();
        called.dedup();
        assert_eq!(called.len(), 8);
        assert!(!called.contains(&0));

        let (in_progress, completed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE status = 'in-progress'), \
                    COUNT(*) FILTER (WHERE status = 'completed') \
             FROM queue_tokens WHERE doctor_id = $1",
        )
        .bind(doctor_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!((in_progress, completed), (1, 7));

        let diverged: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM patients p JOIN queue_tokens t ON t.patient_id = p.id \
             WHERE p.status <> t.status",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(diverged, 0);
    }

    #[sqlx::test]
    async fn seen_appointment_patients_are_not_swept_as_no_shows(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        let patient = register_patient(
            &pool,
            testing::appointment_visit("Maya", department_id, doctor_id, "09:00 AM"),
        )
        .await
        .unwrap()
        .patient;

        call_next_patient(&pool, doctor_id, "doc@hospital.com").await.unwrap();
        call_next_patient(&pool, doctor_id, "doc@hospital.com").await.unwrap();
        assert_eq!(patient_status(&pool, patient.id).await, "completed");
        assert_eq!(testing::appointment_status(&pool, patient.id).await, "completed");

        let tomorrow = Local::now().date_naive() + Days::new(1);
        let swept = appointment::mark_no_shows(&pool, tomorrow).await.unwrap();
        assert_eq!(swept, 0);
        assert_eq!(testing::appointment_status(&pool, patient.id).await, "completed");
    }

    #[sqlx::test]
    async fn board_lists_open_tokens_with_growing_waits(pool: PgPool) {
        let (department_id, doctor_id) = testing::clinic(&pool).await;
        let first = register_patient(&pool, testing::walk_in("Ines", department_id, doctor_id))
            .await
            .unwrap()
            .patient;
        register_patient(&pool, testing::walk_in("Omar", department_id, doctor_id))
            .await
            .unwrap();
        call_next_patient(&pool, doctor_id, "doc@hospital.com").await.unwrap();

        let entries = queue_entries(&pool, doctor_id, 5).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].token_number, first.token_number);
        assert_eq!(entries[0].status, PatientStatus::InProgress);
        assert_eq!(entries[1].patient_name, "Omar");
        assert_eq!(entries[1].estimated_wait_minutes, 5);
    }
}
