use sqlx::PgPool;
use teloxide::prelude::*;

use crate::db::models::{
    Appointment, AppointmentStatus, AuditLogEntry, NotificationPreferences, Patient, PatientStatus,
    Role,
};
use crate::handlers::{error_text, lang_of, require_staff, require_uuid, AppState, Error};
use crate::i18n;
use crate::services::appointment::{self, NewAppointment};
use crate::services::auth::{self, NewStaff, Permission};
use crate::services::{audit, patient};
use crate::utils::{format_date, format_timestamp, parse_date, parse_uuid, split_args};

const DEFAULT_AUDIT_LIMIT: i64 = 20;
const MAX_AUDIT_LIMIT: i64 = 200;

pub fn parse_login(arg: &str) -> Option<(&str, &str)> {
    match split_args(arg).as_slice() {
        [email, password] => Some((*email, *password)),
        _ => None,
    }
}

/// `<email> <password> <ROLE> [doctor-id] <name...>`
pub fn parse_new_staff(arg: &str) -> Result<NewStaff, String> {
    let args = split_args(arg);
    let [email, password, role, rest @ ..] = args.as_slice() else {
        return Err("Usage: /adduser <email> <password> <ROLE> [doctor-id] <name>".to_string());
    };

    let role: Role = role
        .to_uppercase()
        .parse()
        .map_err(|_| "Role must be SUPER_ADMIN, DOCTOR or RECEPTIONIST".to_string())?;

    let (doctor_id, name_parts) = match rest {
        [first, tail @ ..] if parse_uuid(first).is_some() => (parse_uuid(first), tail),
        _ => (None, rest),
    };
    if name_parts.is_empty() {
        return Err("A name is required".to_string());
    }

    Ok(NewStaff {
        email: email.to_string(),
        password: password.to_string(),
        name: name_parts.join(" "),
        role,
        doctor_id,
    })
}

pub fn parse_audit_limit(arg: &str) -> i64 {
    arg.trim()
        .parse::<i64>()
        .map(|n| n.clamp(1, MAX_AUDIT_LIMIT))
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
}

pub fn render_patients(patients: &[Patient]) -> String {
    patients
        .iter()
        .map(|p| {
            let alerts = match p.notification_preferences() {
                NotificationPreferences {
                    sms: true,
                    whatsapp: true,
                } => "SMS+WhatsApp",
                NotificationPreferences { sms: true, .. } => "SMS",
                NotificationPreferences { whatsapp: true, .. } => "WhatsApp",
                _ => "chat only",
            };
            format!(
                "🎫 {} · {} · {} · {}\n   📞 {} ({}) · registered {}\n   id: {}",
                p.token_number,
                p.name,
                p.visit_type,
                p.status,
                p.phone,
                alerts,
                format_timestamp(p.registered_at),
                p.id
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_appointments(appointments: &[Appointment]) -> String {
    appointments
        .iter()
        .map(|a| {
            format!(
                "📅 {} {} · {}\n   id: {}",
                format_date(a.date),
                a.time_slot,
                a.status,
                a.id
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_audit(entries: &[AuditLogEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "{} · {} by {}\n   {}: {}",
                format_timestamp(e.timestamp),
                e.action,
                e.performed_by,
                e.target,
                e.details
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub async fn login(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let lang = lang_of(msg);

    // The message carries a password; take it out of the chat history.
    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        log::warn!("Could not delete login message: {}", e);
    }

    let Some((email, password)) = parse_login(arg) else {
        bot.send_message(msg.chat.id, "Usage: /login <email> <password>")
            .await?;
        return Ok(());
    };

    match auth::login(pool, email, password).await {
        Ok(user) => {
            let text = format!("Signed in as {} ({})", user.name, user.role);
            if state.sessions.is_authenticated(msg.chat.id.0) {
                log::info!("Replacing the session in chat {}", msg.chat.id);
            }
            state.sessions.sign_in(msg.chat.id.0, user);
            bot.send_message(msg.chat.id, text).await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, error_text(&lang, &e)).await?;
        }
    }
    Ok(())
}

pub async fn logout(bot: &Bot, msg: &Message, state: &AppState) -> Result<(), Error> {
    let lang = lang_of(msg);
    let key = match state.sessions.sign_out(msg.chat.id.0) {
        Some(user) => {
            log::info!("{} signed out", user.email);
            "logged_out"
        }
        None => "login_required",
    };
    bot.send_message(msg.chat.id, i18n::text(&lang, key)).await?;
    Ok(())
}

pub async fn whoami(bot: &Bot, msg: &Message, state: &AppState) -> Result<(), Error> {
    let text = match state.sessions.current(msg.chat.id.0) {
        Some(user) => {
            let mut text = format!("{} <{}>\nRole: {}", user.name, user.email, user.role);
            if let Some(doctor_id) = user.doctor_id {
                text.push_str(&format!("\nDoctor: {}", doctor_id));
            }
            text
        }
        None => i18n::text(&lang_of(msg), "login_required").to_string(),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn list_patients(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    if require_staff(bot, msg, state, Permission::ManagePatients)
        .await?
        .is_none()
    {
        return Ok(());
    }

    let doctor_id = if arg.trim().is_empty() {
        None
    } else {
        match require_uuid(bot, msg, Some(arg), "/patients [doctor-id]").await? {
            Some(id) => Some(id),
            None => return Ok(()),
        }
    };

    let patients = patient::list_patients(pool, None, doctor_id).await;
    let text = if patients.is_empty() {
        "No patients registered.".to_string()
    } else {
        render_patients(&patients)
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn set_status(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let Some(user) = require_staff(bot, msg, state, Permission::ManagePatients).await? else {
        return Ok(());
    };
    let lang = lang_of(msg);
    let usage = "/setstatus <patient-id> <waiting|in-progress|completed>";

    let args = split_args(arg);
    let Some(patient_id) = require_uuid(bot, msg, args.first().copied(), usage).await? else {
        return Ok(());
    };
    let Some(status) = args.get(1).and_then(|s| s.parse::<PatientStatus>().ok()) else {
        bot.send_message(msg.chat.id, format!("Usage: {}", usage))
            .await?;
        return Ok(());
    };

    let text = match patient::update_patient_status(pool, patient_id, status, &user.email).await {
        Ok(patient) => format!("{} is now {}", patient.audit_label(), status),
        Err(e) => error_text(&lang, &e),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn list_appointments(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    if require_staff(bot, msg, state, Permission::ManageAppointments)
        .await?
        .is_none()
    {
        return Ok(());
    }
    let lang = lang_of(msg);

    let doctor_id = if arg.trim().is_empty() {
        None
    } else {
        match require_uuid(bot, msg, Some(arg), "/appointments [doctor-id]").await? {
            Some(id) => Some(id),
            None => return Ok(()),
        }
    };

    let text = match appointment::list_appointments(pool, doctor_id).await {
        Ok(appointments) if appointments.is_empty() => "No appointments found.".to_string(),
        Ok(appointments) => render_appointments(&appointments),
        Err(e) => error_text(&lang, &e),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// `/book <patient-id> <YYYY-MM-DD> <slot>`; the doctor and department come
/// from the patient's registration.
pub async fn book(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let Some(user) = require_staff(bot, msg, state, Permission::ManageAppointments).await? else {
        return Ok(());
    };
    let lang = lang_of(msg);
    let usage = "/book <patient-id> <YYYY-MM-DD> <slot, e.g. 09:30 AM>";

    let args = split_args(arg);
    let Some(patient_id) = require_uuid(bot, msg, args.first().copied(), usage).await? else {
        return Ok(());
    };
    let date = args.get(1).and_then(|d| parse_date(d));
    let slot = args.get(2..).map(|parts| parts.join(" ")).unwrap_or_default();
    let Some(date) = date.filter(|_| !slot.is_empty()) else {
        bot.send_message(msg.chat.id, format!("Usage: {}", usage))
            .await?;
        return Ok(());
    };

    let result = match patient::get_patient(pool, patient_id).await {
        Ok(patient) => {
            appointment::book_appointment(
                pool,
                NewAppointment {
                    patient_id,
                    doctor_id: patient.doctor_id,
                    department_id: patient.department_id,
                    date,
                    time_slot: slot,
                },
                &user.email,
            )
            .await
        }
        Err(e) => Err(e),
    };

    let text = match result {
        Ok(appointment) => format!(
            "Booked {} on {}.\nid: {}",
            appointment.time_slot,
            format_date(appointment.date),
            appointment.id
        ),
        Err(e) => error_text(&lang, &e),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn set_appointment_status(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let Some(user) = require_staff(bot, msg, state, Permission::ManageAppointments).await? else {
        return Ok(());
    };
    let lang = lang_of(msg);
    let usage = "/apptstatus <appointment-id> <scheduled|completed|cancelled|no-show>";

    let args = split_args(arg);
    let Some(appointment_id) = require_uuid(bot, msg, args.first().copied(), usage).await? else {
        return Ok(());
    };
    let Some(status) = args.get(1).and_then(|s| s.parse::<AppointmentStatus>().ok()) else {
        bot.send_message(msg.chat.id, format!("Usage: {}", usage))
            .await?;
        return Ok(());
    };

    let text =
        match appointment::update_appointment_status(pool, appointment_id, status, &user.email)
            .await
        {
            Ok(appointment) => format!("Appointment {} is now {}", appointment.id, status),
            Err(e) => error_text(&lang, &e),
        };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn show_audit(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    if require_staff(bot, msg, state, Permission::ViewAudit)
        .await?
        .is_none()
    {
        return Ok(());
    }

    let entries = audit::audit_log(pool, parse_audit_limit(arg)).await;
    let text = if entries.is_empty() {
        "The audit log is empty.".to_string()
    } else {
        render_audit(&entries)
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn add_user(
    bot: &Bot,
    msg: &Message,
    pool: &PgPool,
    state: &AppState,
    arg: &str,
) -> Result<(), Error> {
    let Some(admin) = require_staff(bot, msg, state, Permission::ManageStaff).await? else {
        return Ok(());
    };
    let lang = lang_of(msg);

    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        log::warn!("Could not delete account message: {}", e);
    }

    let new = match parse_new_staff(arg) {
        Ok(new) => new,
        Err(usage) => {
            bot.send_message(msg.chat.id, usage).await?;
            return Ok(());
        }
    };

    let text = match auth::register(pool, new, &admin.email).await {
        Ok(user) => format!("Created {} account for {} <{}>", user.role, user.name, user.email),
        Err(e) => error_text(&lang, &e),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}
