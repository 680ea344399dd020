use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Raised when a text column holds a tag none of the status enums know.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} tag: {value:?}")]
pub struct ParseTagError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed set of tags stored as text columns.
///
/// Every tag type gets `as_str`, `Display`, `FromStr` and `TryFrom<String>`,
/// the last one so rows can decode it with `#[sqlx(try_from = "String")]`.
macro_rules! text_tag {
    ($name:ident, $kind:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseTagError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err(ParseTagError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseTagError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum VisitType {
    WalkIn,
    Appointment,
}

text_tag!(VisitType, "visit type", {
    WalkIn => "walk-in",
    Appointment => "appointment",
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PatientStatus {
    Waiting,
    InProgress,
    Completed,
}

text_tag!(PatientStatus, "patient status", {
    Waiting => "waiting",
    InProgress => "in-progress",
    Completed => "completed",
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

text_tag!(AppointmentStatus, "appointment status", {
    Scheduled => "scheduled",
    Completed => "completed",
    Cancelled => "cancelled",
    NoShow => "no-show",
});

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    Doctor,
    Receptionist,
}

text_tag!(Role, "role", {
    SuperAdmin => "SUPER_ADMIN",
    Doctor => "DOCTOR",
    Receptionist => "RECEPTIONIST",
});

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub department_id: Uuid,
    pub specialization: String,
    pub available: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationPreferences {
    pub sms: bool,
    pub whatsapp: bool,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub token_number: i32,
    pub department_id: Uuid,
    pub doctor_id: Uuid,
    #[sqlx(rename = "type", try_from = "String")]
    #[serde(rename = "type")]
    pub visit_type: VisitType,
    pub appointment_time: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: PatientStatus,
    pub registered_at: DateTime<Utc>,
    pub sms: bool,
    pub whatsapp: bool,
    pub chat_id: Option<i64>,
    pub notified: bool,
}

impl Patient {
    pub fn notification_preferences(&self) -> NotificationPreferences {
        NotificationPreferences {
            sms: self.sms,
            whatsapp: self.whatsapp,
        }
    }

    /// Label used as the audit target for anything touching this patient.
    pub fn audit_label(&self) -> String {
        format!("{} (Token {})", self.name, self.token_number)
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueToken {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub token_number: i32,
    #[sqlx(try_from = "String")]
    pub status: PatientStatus,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub department_id: Uuid,
    pub date: NaiveDate,
    pub time_slot: String,
    #[sqlx(try_from = "String")]
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub performed_by: String,
    pub target: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}
