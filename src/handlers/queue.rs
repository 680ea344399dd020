use chrono::Local;
use sqlx::PgPool;
use teloxide::prelude::*;
use uuid::Uuid;

use crate::db::models::{Department, Doctor, PatientStatus};
use crate::handlers::{error_text, lang_of, require_staff, require_uuid, AppState, Error};
use crate::i18n;
use crate::services::auth::Permission;
use crate::services::department::TimeSlot;
use crate::services::queue::{CalledPatient, QueueEntry, QueueState};
use crate::services::{department, notifications, queue};
use crate::utils::{format_date, parse_date, parse_uuid, split_args};

pub fn render_departments(departments: &[Department]) -> String {
    departments
        .iter()
        .enumerate()
        .map(|(i, d)| {
            if d.description.is_empty() {
                format!("{}. {}", i + 1, d.name)
            } else {
                format!("{}. {} - {}", i + 1, d.name, d.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_doctors(doctors: &[Doctor]) -> String {
    doctors
        .iter()
        .map(|d| {
            let availability = if d.available { "" } else { " (unavailable)" };
            format!(
                "👩‍⚕️ {}{}\n   {}\n   id: {}",
                d.name, availability, d.specialization, d.id
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_slots(slots: &[TimeSlot]) -> String {
    slots
        .iter()
        .map(|s| format!("{} {}", if s.available { "🟢" } else { "🔴" }, s.time))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_status(state: &QueueState) -> String {
    format!(
        "🎫 Current token: {}\n👥 Waiting patients: {}\n📋 Registered today: {}\n⏱ Estimated wait: {} min",
        state.current_token,
        state.waiting_count,
        state.total_registered,
        state.estimated_wait_minutes
    )
}

fn status_label(status: PatientStatus) -> &'static str {
    match status {
        PatientStatus::Waiting => "Waiting",
        PatientStatus::InProgress => "In Progress",
        PatientStatus::Completed => "Completed",
    }
}

pub fn render_board(entries: &[QueueEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let time = e.appointment_time.as_deref().unwrap_or("-");
            format!(
                "{} · {} · {} · {} · ~{} min · {}",
                e.token_number,
                e.patient_name,
                e.visit_type,
                time,
                e.estimated_wait_minutes,
                status_label(e.status)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Staff reply to a successful call; it only claims a notification when one
/// was delivered.
pub fn called_reply(called: &CalledPatient, notified: bool) -> String {
    let name = called
        .patient
        .as_ref()
        .map(|p| p.name.as_str())
        .unwrap_or("Unknown");
    let mut reply = format!("Token {} called ({}).", called.token.token_number, name);
    if notified {
        reply.push_str(" The patient has been notified.");
    }
    reply
}

pub async fn list_departments(bot: &Bot, msg: &Message, pool: &PgPool) -> Result<(), Error> {
    log::info!("Listing departments");
    let lang = lang_of(msg);
    let departments = department::list_departments(pool).await;

    let text = if departments.is_empty() {
        i18n::text(&lang, "no_departments").to_string()
    } else {
        format!(
            "{}:\n\n{}",
            i18n::text(&lang, "departments"),
            render_departments(&departments)
        )
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// `/doctors` lists everyone; `/doctors <n>` narrows to the n-th department
/// of the `/departments` listing, `/doctors <department-id>` by id.
pub async fn list_doctors(bot: &Bot, msg: &Message, pool: &PgPool, arg: &str) -> Result<(), Error> {
    log::info!("Listing doctors");
    let lang = lang_of(msg);
    let arg = arg.trim();

    let department_id = if arg.is_empty() {
        None
    } else if let Some(id) = parse_uuid(arg) {
        Some(id)
    } else {
        let departments = department::list_departments(pool).await;
        match arg.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
            Some(index) if index < departments.len() => Some(departments[index].id),
            _ => {
                bot.send_message(msg.chat.id, "Usage: /doctors [department number]")
                    .await?;
                return Ok(());
            }
        }
    };

    let doctors = department::list_doctors(pool, department_id).await;
    let text = if doctors.is_empty() {
        i18n::text(&lang, "no_doctors").to_string()
    } else {
        format!("{}:\n\n{}", i18n::text(&lang, "doctors"), render_doctors(&doctors))
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn list_slots(bot: &Bot, msg: &Message, pool: &PgPool, arg: &str) -> Result<(), Error> {
    let args = split_args(arg);
    let usage = "/slots <doctor-id> [YYYY-MM-DD]";
    let Some(doctor_id) = require_uuid(bot, msg, args.first().copied(), usage).await? else {
        return Ok(());
    };
    let date = match args.get(1) {
        Some(text) => match parse_date(text) {
            Some(date) => date,
            None => {
                bot.send_message(msg.chat.id, format!("Usage: {}", usage))
                    .await?;
                return Ok(());
            }
        },
        None => Local::now().date_naive(),
    };

    let doctor = match department::get_doctor(pool, doctor_id).await {
        Ok(doctor) => doctor,
        Err(e) => {
            bot.send_message(msg.chat.id, error_text(&lang_of(msg), &e))
                .await?;
            return Ok(());
        }
    };

    let slots = department::time_slots(pool, Some(doctor.id), Some(date)).await;
    bot.send_message(
        msg.chat.id,
        format!(
            "Slots with {} on {}:\n\n{}",
            doctor.name,
            format_date(date),
            render_slots(&slots)
        ),
    )
    .await?;
    Ok(())
}

async fn send_status(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    doctor_id: Uuid,
) -> Result<(), Error> {
    let status = queue::queue_status(pool, doctor_id, state.settings.consultation_minutes).await;
    bot.send_message(msg.chat.id, render_status(&status)).await?;
    Ok(())
}

async fn send_board(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    doctor_id: Uuid,
) -> Result<(), Error> {
    let entries =
        queue::queue_entries(pool, doctor_id, state.settings.consultation_minutes).await;
    let text = if entries.is_empty() {
        i18n::text(&lang_of(msg), "queue_empty").to_string()
    } else {
        render_board(&entries)
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn show_status(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let Some(doctor_id) = require_uuid(bot, msg, Some(arg), "/status <doctor-id>").await? else {
        return Ok(());
    };
    send_status(bot, msg, pool, state, doctor_id).await
}

pub async fn show_board(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let Some(doctor_id) = require_uuid(bot, msg, Some(arg), "/queue <doctor-id>").await? else {
        return Ok(());
    };
    send_board(bot, msg, pool, state, doctor_id).await
}

/// `/next <doctor-id>`; doctor accounts may leave the id out to advance
/// their own queue.
pub async fn call_next(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let Some(user) = require_staff(bot, msg, state, Permission::CallNext).await? else {
        return Ok(());
    };
    let lang = lang_of(msg);

    let doctor_id = match (arg.trim().is_empty(), user.doctor_id) {
        (true, Some(own)) => own,
        _ => match require_uuid(bot, msg, Some(arg), "/next <doctor-id>").await? {
            Some(id) => id,
            None => return Ok(()),
        },
    };

    match queue::call_next_patient(pool, doctor_id, &user.email).await {
        Ok(outcome) => {
            let text = match &outcome.called {
                Some(called) => {
                    let notified = notifications::notify_called(bot, called).await;
                    called_reply(called, notified)
                }
                None => i18n::text(&lang, "queue_empty").to_string(),
            };
            bot.send_message(msg.chat.id, text).await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, error_text(&lang, &e)).await?;
        }
    }
    Ok(())
}

pub async fn my_queue(bot: &Bot, msg: &Message, pool: &PgPool, state: &AppState) -> Result<(), Error> {
    let Some(user) = require_staff(bot, msg, state, Permission::CallNext).await? else {
        return Ok(());
    };
    let Some(doctor_id) = user.doctor_id else {
        bot.send_message(
            msg.chat.id,
            "Your account is not linked to a doctor. Use /queue <doctor-id> instead.",
        )
        .await?;
        return Ok(());
    };

    send_status(bot, msg, pool, state, doctor_id).await?;
    send_board(bot, msg, pool, state, doctor_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::VisitType;

    #[test]
    fn status_shows_all_four_figures() {
        let state = QueueState {
            current_token: 412,
            waiting_count: 3,
            total_registered: 4,
            estimated_wait_minutes: 21,
            department_id: None,
            doctor_id: Uuid::nil(),
        };
        let text = render_status(&state);
        assert!(text.contains("Current token: 412"));
        assert!(text.contains("Waiting patients: 3"));
        assert!(text.contains("Estimated wait: 21 min"));
    }

    #[test]
    fn board_rows_show_dash_for_walk_ins() {
        let entries = vec![QueueEntry {
            token_number: 118,
            patient_name: "Jonas".to_string(),
            visit_type: VisitType::WalkIn,
            appointment_time: None,
            status: PatientStatus::InProgress,
            estimated_wait_minutes: 0,
        }];
        assert_eq!(
            render_board(&entries),
            "118 · Jonas · walk-in · - · ~0 min · In Progress"
        );
    }

    #[test]
    fn slots_mark_booked_ones() {
        let slots = vec![
            TimeSlot {
                id: "slot-0".to_string(),
                time: "09:00 AM".to_string(),
                available: false,
            },
            TimeSlot {
                id: "slot-1".to_string(),
                time: "09:30 AM".to_string(),
                available: true,
            },
        ];
        assert_eq!(render_slots(&slots), "🔴 09:00 AM\n🟢 09:30 AM");
    }

    #[test]
    fn departments_are_numbered_for_doctors_lookup() {
        let departments = vec![
            Department {
                id: Uuid::new_v4(),
                name: "Cardiology".to_string(),
                description: String::new(),
            },
            Department {
                id: Uuid::new_v4(),
                name: "Pediatrics".to_string(),
                description: "Children".to_string(),
            },
        ];
        assert_eq!(
            render_departments(&departments),
            "1. Cardiology\n2. Pediatrics - Children"
        );
    }

    fn called(chat_id: Option<i64>) -> CalledPatient {
        use crate::db::models::QueueToken;
        use chrono::Utc;

        let token = QueueToken {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            token_number: 733,
            status: PatientStatus::InProgress,
            created_at: Utc::now(),
            called_at: Some(Utc::now()),
            completed_at: None,
        };
        let patient = crate::db::models::Patient {
            id: token.patient_id,
            name: "Ines".to_string(),
            phone: "555-0102".to_string(),
            token_number: 733,
            department_id: Uuid::new_v4(),
            doctor_id: token.doctor_id,
            visit_type: VisitType::WalkIn,
            appointment_time: None,
            status: PatientStatus::InProgress,
            registered_at: Utc::now(),
            sms: false,
            whatsapp: false,
            chat_id,
            notified: false,
        };
        CalledPatient {
            token,
            patient: Some(patient),
        }
    }

    #[test]
    fn call_reply_mentions_notification_only_when_sent() {
        assert_eq!(
            called_reply(&called(Some(5)), true),
            "Token 733 called (Ines). The patient has been notified."
        );
        assert_eq!(called_reply(&called(None), false), "Token 733 called (Ines).");

        let mut unknown = called(None);
        unknown.patient = None;
        assert_eq!(called_reply(&unknown, false), "Token 733 called (Unknown).");
    }
}
